//! meltpool-pipeline: melt pool image stack processing (sans-IO).
//!
//! Turns a time-resolved stack of cross-section frames `(t, y, x)` of a
//! moving melt pool into a co-moving view and a surface profile through:
//! trajectory -> moving-window reslice -> median denoise -> radial
//! gradient -> surface extraction.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! `ndarray` stacks and returns structured data. Reading image files,
//! writing tables and displaying layers belong to the host application.

pub mod config;
pub mod denoise;
pub mod diagnostics;
pub mod edge;
pub mod layers;
pub mod pipeline;
pub mod radial;
mod rank;
pub mod reslice;
pub mod stack;
pub mod surface;
pub mod trajectory;
pub mod types;

use ndarray::ArrayView3;

pub use config::{
    DenoiseConfig, EstimatorConfig, PipelineConfig, RadialConfig, ResliceConfig, SurfaceConfig,
};
pub use edge::EdgeFilterKind;
pub use layers::Layer;
pub use pipeline::{Pipeline, StageKind, StagedResult, TrajectorySource};
pub use stack::Sample;
pub use trajectory::TrajectoryEstimate;
pub use types::{
    LinearTrajectory, Orientation, PipelineError, Point, SurfaceProfile, WindowPosition,
    WindowPositions,
};

/// Run the full pipeline and keep every intermediate.
///
/// # Pipeline steps
///
/// 1. Resolve the trajectory from `source` (estimate, manual line, or
///    line annotation)
/// 2. Reslice along the trajectory into a fixed-width co-moving window
/// 3. Median denoise, optionally after Otsu clipping and rescaling
/// 4. Radial gradient around the laser reference point of every frame
/// 5. Surface profile below the detected material boundary
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid config and the
/// error of the first failing stage otherwise.
pub fn process<T: Sample>(
    stack: ArrayView3<'_, T>,
    source: TrajectorySource,
    config: &PipelineConfig,
) -> Result<StagedResult<T>, PipelineError> {
    pipeline::Stage::from(Pipeline::new(stack, source, config.clone())).complete()
}
