//! Staged pipeline: trajectory -> reslice -> denoise -> radial gradient
//! -> surface profile, keeping every intermediate.
//!
//! The typed API makes it a compile-time error to skip a stage:
//!
//! ```rust
//! # use meltpool_pipeline::{Pipeline, PipelineConfig, PipelineError, TrajectorySource};
//! # fn run(stack: ndarray::Array3<u16>) -> Result<(), PipelineError> {
//! let staged = Pipeline::new(stack.view(), TrajectorySource::Estimate, PipelineConfig::default())
//!     .locate()?
//!     .reslice()?
//!     .denoise()?
//!     .radial_gradient()?
//!     .extract_surface()?
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! [`Stage`] wraps the typed states for callers that drive the pipeline
//! in a loop, and [`StagedResult::recompute`] reruns the pipeline from a
//! given [`StageKind`] after a parameter change, reusing everything
//! computed before it.

use log::{debug, info};
use ndarray::{Array2, Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::diagnostics::StageMetrics;
use crate::layers::{Layer, estimate_layers, window_annotations};
use crate::radial::calculate_radial_gradient;
use crate::reslice::reslice;
use crate::stack::Sample;
use crate::surface::{incomplete_frames, surface_image};
use crate::trajectory::{self, TrajectoryEstimate};
use crate::types::{LinearTrajectory, PipelineError, WindowPositions};

/// Where the laser trajectory comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrajectorySource {
    /// Fit the trajectory automatically from the stack.
    Estimate,
    /// Use a known line.
    Manual(LinearTrajectory),
    /// Derive the line from exactly one `(2, 2)` line annotation drawn on
    /// the projection image.
    Lines(Vec<Array2<f64>>),
}

/// Names of the pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Trajectory estimation or fitting.
    Trajectory,
    /// Moving-window reslicing.
    Reslice,
    /// Median denoising.
    Denoise,
    /// Radial gradient.
    RadialGradient,
    /// Surface profile extraction.
    Surface,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [Self; 5] = [
        Self::Trajectory,
        Self::Reslice,
        Self::Denoise,
        Self::RadialGradient,
        Self::Surface,
    ];

    /// Human-readable stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Trajectory => "trajectory",
            Self::Reslice => "reslice",
            Self::Denoise => "denoise",
            Self::RadialGradient => "radial gradient",
            Self::Surface => "surface",
        }
    }
}

/// Trajectory together with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
struct Track {
    source: TrajectorySource,
    estimate: Option<TrajectoryEstimate>,
    trajectory: LinearTrajectory,
}

// ───────────────────────── Pending ──────────────────────────

/// Pipeline state before any processing.
#[must_use = "pipeline stages are consumed by advancing, call .locate() to continue"]
pub struct Pending<'a, T> {
    config: PipelineConfig,
    stack: ArrayView3<'a, T>,
    source: TrajectorySource,
}

impl<'a, T: Sample> Pending<'a, T> {
    /// Validate the config and resolve the trajectory.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an invalid config and
    /// the errors of [`trajectory::estimate`] or [`trajectory::from_lines`]
    /// depending on the source.
    pub fn locate(self) -> Result<Located<'a, T>, PipelineError> {
        self.config.validate()?;
        let (estimate, line) = match &self.source {
            TrajectorySource::Estimate => {
                let estimate = trajectory::estimate(self.stack, &self.config.estimator)?;
                let line = estimate.trajectory;
                (Some(estimate), line)
            }
            TrajectorySource::Manual(line) => (None, *line),
            TrajectorySource::Lines(lines) => (
                None,
                trajectory::from_lines(lines, self.config.estimator.orientation)?,
            ),
        };
        debug!(
            "trajectory: coef={:.4} intercept={:.2} ({:?})",
            line.coef, line.intercept, line.orientation
        );
        Ok(Located {
            config: self.config,
            stack: self.stack,
            track: Track {
                source: self.source,
                estimate,
                trajectory: line,
            },
        })
    }
}

// ───────────────────────── Located ──────────────────────────

/// Pipeline state once the trajectory is known.
#[must_use = "pipeline stages are consumed by advancing, call .reslice() to continue"]
pub struct Located<'a, T> {
    config: PipelineConfig,
    stack: ArrayView3<'a, T>,
    track: Track,
}

impl<T: Sample> Located<'_, T> {
    /// The trajectory used for reslicing.
    #[must_use]
    pub const fn trajectory(&self) -> &LinearTrajectory {
        &self.track.trajectory
    }

    /// Estimator intermediates, if the trajectory was estimated.
    #[must_use]
    pub const fn estimate(&self) -> Option<&TrajectoryEstimate> {
        self.track.estimate.as_ref()
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Trajectory {
            estimated: self.track.estimate.is_some(),
            coef: self.track.trajectory.coef,
            intercept: self.track.trajectory.intercept,
        }
    }

    /// Reslice the stack along the trajectory.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`crate::reslice::reslice`].
    pub fn reslice(self) -> Result<Windowed<T>, PipelineError> {
        let out = reslice(self.stack, &self.track.trajectory, &self.config.reslice)?;
        Ok(Windowed {
            config: self.config,
            track: self.track,
            resliced: out.stack,
            positions: out.positions,
        })
    }
}

// ───────────────────────── Windowed ──────────────────────────

/// Pipeline state after reslicing.
#[must_use = "pipeline stages are consumed by advancing, call .denoise() to continue"]
pub struct Windowed<T> {
    config: PipelineConfig,
    track: Track,
    resliced: Array3<T>,
    positions: WindowPositions,
}

impl<T: Sample> Windowed<T> {
    /// The co-moving stack.
    #[must_use]
    pub const fn resliced(&self) -> &Array3<T> {
        &self.resliced
    }

    /// Window position log.
    #[must_use]
    pub const fn positions(&self) -> &WindowPositions {
        &self.positions
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Reslice {
            retained_frames: self.positions.len(),
            window_offset: self.config.reslice.window_offset,
            window_size: self.config.reslice.window_size,
        }
    }

    /// Median-filter the resliced stack.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero kernel extent.
    pub fn denoise(self) -> Result<Denoised<T>, PipelineError> {
        let filtered = crate::denoise::denoise(self.resliced.view(), &self.config.denoise)?;
        Ok(Denoised {
            windowed: self,
            filtered,
        })
    }
}

// ───────────────────────── Denoised ──────────────────────────

/// Pipeline state after denoising.
#[must_use = "pipeline stages are consumed by advancing, call .radial_gradient() to continue"]
pub struct Denoised<T> {
    windowed: Windowed<T>,
    filtered: Array3<f64>,
}

impl<T: Sample> Denoised<T> {
    /// The denoised stack.
    #[must_use]
    pub const fn filtered(&self) -> &Array3<f64> {
        &self.filtered
    }

    fn metrics(&self) -> StageMetrics {
        let denoise = &self.windowed.config.denoise;
        StageMetrics::Denoise {
            kernel: denoise.kernel(),
            normalized: denoise.normalize,
        }
    }

    /// Compute the radial gradient of the denoised stack.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`calculate_radial_gradient`].
    pub fn radial_gradient(self) -> Result<GradientComputed<T>, PipelineError> {
        let config = &self.windowed.config;
        let radial_gradient = calculate_radial_gradient(
            self.filtered.view(),
            &config.radial,
            config.background_marker,
        )?;
        Ok(GradientComputed {
            denoised: self,
            radial_gradient,
        })
    }
}

// ───────────────────────── GradientComputed ──────────────────────────

/// Pipeline state after the radial gradient.
#[must_use = "pipeline stages are consumed by advancing, call .extract_surface() to continue"]
pub struct GradientComputed<T> {
    denoised: Denoised<T>,
    radial_gradient: Array3<f64>,
}

impl<T: Sample> GradientComputed<T> {
    /// The radial gradient stack.
    #[must_use]
    pub const fn radial_gradient(&self) -> &Array3<f64> {
        &self.radial_gradient
    }

    fn metrics(&self) -> StageMetrics {
        let radial = &self.denoised.windowed.config.radial;
        StageMetrics::RadialGradient {
            filter: radial.filter.name().to_string(),
            column: radial.xpos,
            non_finite_pixels: self.radial_gradient.iter().filter(|v| !v.is_finite()).count(),
        }
    }

    /// Extract the surface profile.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`surface_image`].
    pub fn extract_surface(self) -> Result<SurfaceExtracted<T>, PipelineError> {
        let config = &self.denoised.windowed.config;
        let surface_profile = surface_image(
            self.denoised.filtered.view(),
            self.radial_gradient.view(),
            &config.surface,
            config.background_marker,
        )?;
        Ok(SurfaceExtracted {
            gradient: self,
            surface_profile,
        })
    }
}

// ───────────────────────── SurfaceExtracted ──────────────────────────

/// Final pipeline state.
#[must_use = "call .into_result() to collect the intermediates"]
pub struct SurfaceExtracted<T> {
    gradient: GradientComputed<T>,
    surface_profile: Array2<f64>,
}

impl<T: Sample> SurfaceExtracted<T> {
    /// The surface profile.
    #[must_use]
    pub const fn surface_profile(&self) -> &Array2<f64> {
        &self.surface_profile
    }

    fn metrics(&self) -> StageMetrics {
        let filtered = &self.gradient.denoised.filtered;
        StageMetrics::Surface {
            input_frames: filtered.dim().0,
            incomplete_frames: incomplete_frames(filtered.view())
                .into_iter()
                .filter(|&incomplete| incomplete)
                .count(),
            profile_frames: self.surface_profile.nrows(),
        }
    }

    /// Collect every intermediate into a [`StagedResult`].
    pub fn into_result(self) -> StagedResult<T> {
        let GradientComputed {
            denoised,
            radial_gradient,
        } = self.gradient;
        let Denoised { windowed, filtered } = denoised;
        let Windowed {
            config,
            track,
            resliced,
            positions,
        } = windowed;
        info!(
            "pipeline complete: {} windows, surface profile {:?}",
            positions.len(),
            self.surface_profile.dim()
        );
        StagedResult {
            config,
            source: track.source,
            estimate: track.estimate,
            trajectory: track.trajectory,
            resliced,
            positions,
            filtered,
            radial_gradient,
            surface_profile: self.surface_profile,
        }
    }
}

// ───────────────────────── Dynamic stage ──────────────────────────

/// Any pipeline state, for callers that advance in a loop.
#[must_use]
pub enum Stage<'a, T> {
    /// See [`Pending`].
    Pending(Pending<'a, T>),
    /// See [`Located`].
    Located(Located<'a, T>),
    /// See [`Windowed`].
    Windowed(Windowed<T>),
    /// See [`Denoised`].
    Denoised(Denoised<T>),
    /// See [`GradientComputed`].
    GradientComputed(GradientComputed<T>),
    /// See [`SurfaceExtracted`].
    SurfaceExtracted(SurfaceExtracted<T>),
}

impl<'a, T: Sample> Stage<'a, T> {
    /// The most recently completed stage, `None` before any processing.
    #[must_use]
    pub const fn kind(&self) -> Option<StageKind> {
        match self {
            Self::Pending(_) => None,
            Self::Located(_) => Some(StageKind::Trajectory),
            Self::Windowed(_) => Some(StageKind::Reslice),
            Self::Denoised(_) => Some(StageKind::Denoise),
            Self::GradientComputed(_) => Some(StageKind::RadialGradient),
            Self::SurfaceExtracted(_) => Some(StageKind::Surface),
        }
    }

    /// Metrics of the most recently completed stage.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        match self {
            Self::Pending(_) => None,
            Self::Located(s) => Some(s.metrics()),
            Self::Windowed(s) => Some(s.metrics()),
            Self::Denoised(s) => Some(s.metrics()),
            Self::GradientComputed(s) => Some(s.metrics()),
            Self::SurfaceExtracted(s) => Some(s.metrics()),
        }
    }

    /// Whether every stage has run.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::SurfaceExtracted(_))
    }

    /// Run one more stage. A complete pipeline is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the error of the stage that was run.
    pub fn next(self) -> Result<Self, PipelineError> {
        Ok(match self {
            Self::Pending(s) => Self::Located(s.locate()?),
            Self::Located(s) => Self::Windowed(s.reslice()?),
            Self::Windowed(s) => Self::Denoised(s.denoise()?),
            Self::Denoised(s) => Self::GradientComputed(s.radial_gradient()?),
            Self::GradientComputed(s) => Self::SurfaceExtracted(s.extract_surface()?),
            done @ Self::SurfaceExtracted(_) => done,
        })
    }

    /// Run all remaining stages.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage.
    pub fn complete(self) -> Result<StagedResult<T>, PipelineError> {
        let mut stage = self;
        loop {
            if let Self::SurfaceExtracted(done) = stage {
                return Ok(done.into_result());
            }
            stage = stage.next()?;
        }
    }
}

impl<'a, T> From<Pending<'a, T>> for Stage<'a, T> {
    fn from(s: Pending<'a, T>) -> Self {
        Self::Pending(s)
    }
}

/// Entry point for the typed pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Store the inputs; nothing is computed until the first stage runs.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new<T>(
        stack: ArrayView3<'_, T>,
        source: TrajectorySource,
        config: PipelineConfig,
    ) -> Pending<'_, T> {
        Pending {
            config,
            stack,
            source,
        }
    }
}

// ───────────────────────── Result ──────────────────────────

/// Every intermediate of a complete pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedResult<T> {
    /// Configuration the result was computed with.
    pub config: PipelineConfig,
    /// Trajectory source.
    pub source: TrajectorySource,
    /// Estimator intermediates, `Some` only for [`TrajectorySource::Estimate`].
    pub estimate: Option<TrajectoryEstimate>,
    /// Trajectory used for reslicing.
    pub trajectory: LinearTrajectory,
    /// Co-moving stack in the input sample type.
    pub resliced: Array3<T>,
    /// Window position log.
    pub positions: WindowPositions,
    /// Denoised stack.
    pub filtered: Array3<f64>,
    /// Radial gradient of `filtered`.
    pub radial_gradient: Array3<f64>,
    /// Flattened surface profile, `(frames, width)`.
    pub surface_profile: Array2<f64>,
}

impl<T: Sample> StagedResult<T> {
    /// Pipeline state from which `from` and every later stage rerun with
    /// `config`, reusing this result's earlier intermediates.
    ///
    /// `stack` must be the stack this result was computed from; it is
    /// only read when `from` is [`StageKind::Trajectory`] or
    /// [`StageKind::Reslice`].
    pub fn resume<'a>(
        &self,
        stack: ArrayView3<'a, T>,
        config: PipelineConfig,
        from: StageKind,
    ) -> Stage<'a, T> {
        let track = Track {
            source: self.source.clone(),
            estimate: self.estimate.clone(),
            trajectory: self.trajectory,
        };
        if from == StageKind::Trajectory {
            return Stage::Pending(Pipeline::new(stack, track.source, config));
        }
        if from == StageKind::Reslice {
            return Stage::Located(Located {
                config,
                stack,
                track,
            });
        }
        let windowed = Windowed {
            config,
            track,
            resliced: self.resliced.clone(),
            positions: self.positions.clone(),
        };
        if from == StageKind::Denoise {
            return Stage::Windowed(windowed);
        }
        let denoised = Denoised {
            windowed,
            filtered: self.filtered.clone(),
        };
        if from == StageKind::RadialGradient {
            return Stage::Denoised(denoised);
        }
        Stage::GradientComputed(GradientComputed {
            denoised,
            radial_gradient: self.radial_gradient.clone(),
        })
    }

    /// Rerun the pipeline from `from` with a new config.
    ///
    /// `self` is left untouched, so a failed recompute keeps the previous
    /// result available.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an invalid config and
    /// the error of the first failing stage otherwise.
    pub fn recompute(
        &self,
        stack: ArrayView3<'_, T>,
        config: &PipelineConfig,
        from: StageKind,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        debug!("recomputing from the {} stage", from.name());
        self.resume(stack, config.clone(), from).complete()
    }

    /// Viewer layers for every intermediate.
    #[must_use]
    pub fn layers(&self) -> Vec<Layer> {
        let mut layers = self.estimate.as_ref().map(estimate_layers).unwrap_or_default();
        let height = self.resliced.dim().1;
        layers.extend([
            Layer::image("resliced", self.resliced.mapv(Into::into)),
            Layer::LineAnnotation {
                name: "windows".to_string(),
                lines: window_annotations(&self.positions, height),
            },
            Layer::image("filtered", self.filtered.clone()),
            Layer::image("radial gradient", self.radial_gradient.clone()),
            Layer::image("surface profile", self.surface_profile.clone()),
        ]);
        layers
    }
}
