//! Viewer-facing outputs.
//!
//! The core never talks to a viewer. Instead every stage result can be
//! turned into a [`Layer`]: a named image, set of line annotations, or
//! point cloud, which a host application maps onto whatever its display
//! toolkit offers.

use ndarray::{Array2, ArrayD, ArrayView3, array};
use serde::{Deserialize, Serialize};

use crate::stack::split_at;
use crate::trajectory::{TrajectoryEstimate, line_endpoints};
use crate::types::{PipelineError, WindowPositions};

/// One displayable output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Layer {
    /// Dense 2D or 3D samples.
    Image {
        /// Display name.
        name: String,
        /// Sample data.
        data: ArrayD<f64>,
    },
    /// Straight line segments, each a `(2, d)` array of end points.
    LineAnnotation {
        /// Display name.
        name: String,
        /// One array per line.
        lines: Vec<Array2<f64>>,
    },
    /// Scattered points, one row per point.
    PointCloud {
        /// Display name.
        name: String,
        /// `(n, d)` coordinates.
        points: Array2<f64>,
    },
}

impl Layer {
    /// Display name of the layer.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Image { name, .. }
            | Self::LineAnnotation { name, .. }
            | Self::PointCloud { name, .. } => name,
        }
    }

    /// Image layer from any owned array.
    #[must_use]
    pub fn image<D: ndarray::Dimension>(name: impl Into<String>, data: ndarray::Array<f64, D>) -> Self {
        Self::Image {
            name: name.into(),
            data: data.into_dyn(),
        }
    }
}

/// Estimator maxima as `(maxima[i], i)` points on the projection image.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn maxima_points(maxima: &[f64]) -> Array2<f64> {
    Array2::from_shape_fn((maxima.len(), 2), |(i, axis)| {
        if axis == 0 { maxima[i] } else { i as f64 }
    })
}

/// Layers describing a trajectory estimate: the edge-filtered
/// projection, the maxima and the fitted line clipped to the projection.
///
/// A stationary fit has no line to draw; the line layer is then left out.
#[must_use]
pub fn estimate_layers(estimate: &TrajectoryEstimate) -> Vec<Layer> {
    let (rows, cols) = estimate.projection.dim();
    let mut layers = vec![
        Layer::image("projection", estimate.projection.clone()),
        Layer::PointCloud {
            name: "maxima".to_string(),
            points: maxima_points(&estimate.maxima),
        },
    ];
    if let Ok(line) = line_endpoints(&estimate.trajectory, rows, cols) {
        layers.push(Layer::LineAnnotation {
            name: "trajectory".to_string(),
            lines: vec![line],
        });
    }
    layers
}

/// Three vertical lines per logged frame (laser position, window start,
/// window stop), each spanning rows `0..=height` of that frame as
/// `[[t, 0, x], [t, height, x]]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn window_annotations(positions: &WindowPositions, height: usize) -> Vec<Array2<f64>> {
    let bottom = height as f64;
    positions
        .iter()
        .flat_map(|row| {
            let t = row.time_frame as f64;
            [row.laser_position, row.window_start, row.window_stop]
                .map(|x| {
                    let x = x as f64;
                    array![[t, 0.0, x], [t, bottom, x]]
                })
        })
        .collect()
}

/// Split `stack` at frame `t` into two image layers named `{name}_0` and
/// `{name}_1`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `t` exceeds the frame
/// count.
pub fn split_layers(
    name: &str,
    stack: ArrayView3<'_, f64>,
    t: usize,
) -> Result<[Layer; 2], PipelineError> {
    let (head, tail) = split_at(stack, t)?;
    Ok([
        Layer::image(format!("{name}_0"), head),
        Layer::image(format!("{name}_1"), tail),
    ])
}
