//! Pipeline diagnostics: timing and per-stage metrics.
//!
//! Every call to [`process_staged_with_diagnostics`] or
//! [`recompute_with_diagnostics`] collects diagnostics alongside the
//! pipeline results. Timestamps come from a caller-supplied [`Clock`],
//! so the core stays free of platform time sources.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::pipeline::{Pipeline, Stage, StageKind, StagedResult, TrajectorySource};
use crate::stack::Sample;
use crate::types::PipelineError;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
///
/// Stage fields are `None` when the stage was not executed, which
/// happens for stages reused by a recompute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Trajectory estimation or fitting.
    pub trajectory: Option<StageDiagnostics>,
    /// Moving-window reslicing.
    pub reslice: Option<StageDiagnostics>,
    /// Median denoising.
    pub denoise: Option<StageDiagnostics>,
    /// Radial gradient.
    pub radial_gradient: Option<StageDiagnostics>,
    /// Surface profile extraction.
    pub surface: Option<StageDiagnostics>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Trajectory metrics.
    Trajectory {
        /// Whether the line was fitted from the stack.
        estimated: bool,
        /// Slope of the line.
        coef: f64,
        /// Intercept of the line.
        intercept: f64,
    },
    /// Reslicing metrics.
    Reslice {
        /// Frames (or positions) written to the position log.
        retained_frames: usize,
        /// Window offset in pixels.
        window_offset: i64,
        /// Window width in pixels.
        window_size: usize,
    },
    /// Denoising metrics.
    Denoise {
        /// Kernel extents `[t, y, x]`.
        kernel: [usize; 3],
        /// Whether the stack was clipped and rescaled first.
        normalized: bool,
    },
    /// Radial gradient metrics.
    RadialGradient {
        /// Filter family name.
        filter: String,
        /// Reference column.
        column: usize,
        /// Pixels with a non-finite gradient (reference pixels).
        non_finite_pixels: usize,
    },
    /// Surface extraction metrics.
    Surface {
        /// Frames entering the stage.
        input_frames: usize,
        /// Frames dropped as incomplete.
        incomplete_frames: usize,
        /// Rows of the surface profile.
        profile_frames: usize,
    },
}

/// High-level summary of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Input stack shape `(t, y, x)`.
    pub input_shape: [usize; 3],
    /// Rows in the window position log.
    pub window_count: usize,
    /// Surface profile shape `(frames, width)`.
    pub profile_shape: [usize; 2],
}

impl PipelineDiagnostics {
    /// Diagnostics of one stage, if it ran.
    #[must_use]
    pub const fn stage(&self, kind: StageKind) -> Option<&StageDiagnostics> {
        match kind {
            StageKind::Trajectory => self.trajectory.as_ref(),
            StageKind::Reslice => self.reslice.as_ref(),
            StageKind::Denoise => self.denoise.as_ref(),
            StageKind::RadialGradient => self.radial_gradient.as_ref(),
            StageKind::Surface => self.surface.as_ref(),
        }
    }

    const fn slot_mut(&mut self, kind: StageKind) -> &mut Option<StageDiagnostics> {
        match kind {
            StageKind::Trajectory => &mut self.trajectory,
            StageKind::Reslice => &mut self.reslice,
            StageKind::Denoise => &mut self.denoise,
            StageKind::RadialGradient => &mut self.radial_gradient,
            StageKind::Surface => &mut self.surface,
        }
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        let [t, y, x] = self.summary.input_shape;
        lines.push(format!("Stack: {t} frames of {y}x{x}"));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for kind in StageKind::ALL {
            let Some(diag) = self.stage(kind) else {
                lines.push(format!("{:<24} {:>10}", kind.name(), "reused"));
                continue;
            };
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{:<24} {ms:>8.3}ms {pct:>9.1}%  {details}", kind.name()));
        }

        lines.push(String::new());
        let [frames, width] = self.summary.profile_shape;
        lines.push(format!(
            "Windows: {}  |  Surface profile: {frames}x{width}",
            self.summary.window_count,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Trajectory {
            estimated,
            coef,
            intercept,
        } => {
            let how = if *estimated { "estimated" } else { "given" };
            format!("{how} coef={coef:.4} intercept={intercept:.2}")
        }
        StageMetrics::Reslice {
            retained_frames,
            window_offset,
            window_size,
        } => format!("{retained_frames} windows, offset={window_offset} size={window_size}"),
        StageMetrics::Denoise { kernel, normalized } => {
            let [kt, ky, kx] = kernel;
            let prefix = if *normalized { "otsu+" } else { "" };
            format!("{prefix}median {kt}x{ky}x{kx}")
        }
        StageMetrics::RadialGradient {
            filter,
            column,
            non_finite_pixels,
        } => format!("{filter} around column {column}, {non_finite_pixels} non-finite"),
        StageMetrics::Surface {
            input_frames,
            incomplete_frames,
            profile_frames,
        } => format!(
            "{input_frames} frames, {incomplete_frames} incomplete -> {profile_frames} profile rows"
        ),
    }
}

/// Advance `stage` to completion, timing every stage that runs.
fn run_timed<T: Sample, C: Clock>(
    mut stage: Stage<'_, T>,
    input_shape: [usize; 3],
    clock: &C,
) -> Result<(StagedResult<T>, PipelineDiagnostics), PipelineError> {
    let total_start = clock.now();
    let mut diagnostics = PipelineDiagnostics::default();

    while !stage.is_complete() {
        let start = clock.now();
        stage = stage.next()?;
        let duration = clock.elapsed(&start);
        if let (Some(kind), Some(metrics)) = (stage.kind(), stage.metrics()) {
            *diagnostics.slot_mut(kind) = Some(StageDiagnostics { duration, metrics });
        }
    }
    let staged = stage.complete()?;

    diagnostics.total_duration = clock.elapsed(&total_start);
    let (frames, width) = staged.surface_profile.dim();
    diagnostics.summary = PipelineSummary {
        input_shape,
        window_count: staged.positions.len(),
        profile_shape: [frames, width],
    };
    Ok((staged, diagnostics))
}

/// Run the full pipeline, collecting diagnostics.
///
/// # Errors
///
/// Returns the error of the first failing stage.
pub fn process_staged_with_diagnostics<T: Sample, C: Clock>(
    stack: ArrayView3<'_, T>,
    source: TrajectorySource,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult<T>, PipelineDiagnostics), PipelineError> {
    let (t, y, x) = stack.dim();
    let pending = Pipeline::new(stack, source, config.clone());
    run_timed(pending.into(), [t, y, x], clock)
}

/// Rerun `previous` from `from` with `config`, collecting diagnostics.
///
/// Stages before `from` are reused and reported as `None`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid config and
/// the error of the first failing stage otherwise.
pub fn recompute_with_diagnostics<T: Sample, C: Clock>(
    previous: &StagedResult<T>,
    stack: ArrayView3<'_, T>,
    config: &PipelineConfig,
    from: StageKind,
    clock: &C,
) -> Result<(StagedResult<T>, PipelineDiagnostics), PipelineError> {
    config.validate()?;
    let (t, y, x) = stack.dim();
    run_timed(previous.resume(stack, config.clone(), from), [t, y, x], clock)
}
