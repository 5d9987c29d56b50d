//! Radial gradient transform around a per-frame reference point.
//!
//! The reference point of frame `t` is `(material_height[t], xpos)`:
//! the number of background samples in column `xpos` stands in for the
//! depth of the material surface under the laser. Gradients are then
//! projected onto the absolute radial unit vector pointing away from
//! that point, so edges in front of and behind the laser add up instead
//! of cancelling.

use log::{debug, warn};
use ndarray::{Array1, Array3, ArrayView3, Axis, Zip, s};
use serde::{Deserialize, Serialize};

use crate::config::RadialConfig;
use crate::edge::EdgeFilterKind;
use crate::stack::is_close;
use crate::types::PipelineError;

/// Output of [`radial_gradient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadialGradient {
    /// Gradient projected onto the absolute radial direction.
    pub gradient: Array3<f64>,
    /// `atan2(x_gradient, y_gradient)` per pixel.
    ///
    /// This is the gradient direction, not the radial angle.
    pub angles: Array3<f64>,
}

/// Per-frame count of samples in `column` that are close to `marker`.
///
/// A `column` past the right edge samples the last column instead. An
/// empty frame width yields zero for every frame.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn material_height(stack: ArrayView3<'_, f64>, column: usize, marker: f64) -> Array1<f64> {
    let (n_t, _, width) = stack.dim();
    if width == 0 {
        return Array1::zeros(n_t);
    }
    let sampled = if column < width {
        column
    } else {
        warn!("column {column} is outside a stack of width {width}; using {}", width - 1);
        width - 1
    };
    stack
        .slice(s![.., .., sampled])
        .map_axis(Axis(1), |lane| {
            lane.iter().filter(|&&v| is_close(v, marker)).count() as f64
        })
}

/// Radial gradient of every frame of `stack` around `centers[t] =
/// (row, col)`.
///
/// The reference pixel itself has a zero-length radial vector; its
/// gradient is NaN. Every other pixel is unaffected.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `centers` does not hold
/// exactly one point per frame.
#[allow(clippy::cast_precision_loss)]
pub fn radial_gradient(
    stack: ArrayView3<'_, f64>,
    centers: &[(f64, f64)],
    filter: EdgeFilterKind,
) -> Result<RadialGradient, PipelineError> {
    let n_t = stack.len_of(Axis(0));
    if centers.len() != n_t {
        return Err(PipelineError::InvalidConfig(format!(
            "{} reference points for {n_t} frames",
            centers.len()
        )));
    }

    let mut gradient = Array3::<f64>::zeros(stack.raw_dim());
    let mut angles = Array3::<f64>::zeros(stack.raw_dim());

    for (t, &(center_row, center_col)) in centers.iter().enumerate() {
        let frame = stack.index_axis(Axis(0), t);
        let x_grad = filter.vertical(frame);
        let y_grad = filter.horizontal(frame);

        Zip::indexed(gradient.index_axis_mut(Axis(0), t))
            .and(angles.index_axis_mut(Axis(0), t))
            .and(&x_grad)
            .and(&y_grad)
            .for_each(|(row, col), radial, angle, &gx, &gy| {
                let dx = col as f64 - center_col;
                let dy = row as f64 - center_row;
                let length = dx.hypot(dy);
                let ux = (dx / length).abs();
                let uy = (dy / length).abs();
                *radial = gx.mul_add(ux, gy * uy);
                *angle = gx.atan2(gy);
            });
    }

    Ok(RadialGradient { gradient, angles })
}

/// Radial gradient around `(material_height(stack, xpos), xpos)`.
///
/// # Errors
///
/// Propagates errors from [`radial_gradient`].
#[allow(clippy::cast_precision_loss)]
pub fn calculate_radial_gradient(
    stack: ArrayView3<'_, f64>,
    config: &RadialConfig,
    marker: f64,
) -> Result<Array3<f64>, PipelineError> {
    let heights = material_height(stack, config.xpos, marker);
    let column = config.xpos as f64;
    let centers: Vec<(f64, f64)> = heights.iter().map(|&h| (h, column)).collect();
    debug!(
        "radial gradient around column {} with {} filter",
        config.xpos, config.filter
    );
    Ok(radial_gradient(stack, &centers, config.filter)?.gradient)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Frames with background (`1.0`) above `surface` and material
    /// (`0.2`) below.
    fn layered(n_t: usize, height: usize, width: usize, surface: usize) -> Array3<f64> {
        Array3::from_shape_fn((n_t, height, width), |(_, y, _)| {
            if y < surface { 1.0 } else { 0.2 }
        })
    }

    #[test]
    fn material_height_counts_background() {
        let stack = layered(3, 10, 6, 4);
        let heights = material_height(stack.view(), 2, 1.0);
        assert_eq!(heights.to_vec(), vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn material_height_clamps_column() {
        let stack = layered(2, 10, 6, 7);
        let heights = material_height(stack.view(), 115, 1.0);
        assert_eq!(heights.to_vec(), vec![7.0, 7.0]);
    }

    #[test]
    fn uniform_ones_keep_shape() {
        let stack = Array3::<f64>::ones((10, 10, 10));
        let gradient = calculate_radial_gradient(stack.view(), &RadialConfig::default(), 1.0).unwrap();
        assert_eq!(gradient.dim(), (10, 10, 10));
        // Flat input: every pixel off the reference is exactly zero.
        assert!(gradient.iter().all(|v| v.is_nan() || *v == 0.0));
    }

    #[test]
    fn reference_pixel_is_nan_only() {
        let stack = layered(1, 8, 8, 3);
        let result = radial_gradient(stack.view(), &[(3.0, 4.0)], EdgeFilterKind::Sobel).unwrap();
        assert!(result.gradient[[0, 3, 4]].is_nan());
        let non_finite = result.gradient.iter().filter(|v| !v.is_finite()).count();
        assert_eq!(non_finite, 1);
    }

    #[test]
    fn fractional_center_has_no_nan() {
        let stack = layered(1, 8, 8, 3);
        let result = radial_gradient(stack.view(), &[(3.5, 4.5)], EdgeFilterKind::Prewitt).unwrap();
        assert!(result.gradient.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn surface_edge_projects_with_consistent_sign() {
        // The step from background to material decreases intensity
        // downwards, giving a negative horizontal-edge response.
        let stack = layered(1, 12, 12, 6);
        let result = radial_gradient(stack.view(), &[(0.0, 6.0)], EdgeFilterKind::Sobel).unwrap();
        let left = result.gradient[[0, 6, 1]];
        let right = result.gradient[[0, 6, 11]];
        assert!(left < 0.0 && right < 0.0);
        assert!((left - right).abs() < 1e-12);
    }

    #[test]
    fn angles_follow_gradient_components() {
        let stack = layered(1, 12, 12, 6);
        let result = radial_gradient(stack.view(), &[(0.0, 6.0)], EdgeFilterKind::Sobel).unwrap();
        // No vertical-edge response, negative horizontal-edge response.
        assert!((result.angles[[0, 6, 6]] - std::f64::consts::PI).abs() < 1e-12);
        // Far from the edge both components vanish: atan2(0, 0) = 0.
        assert!(result.angles[[0, 0, 0]].abs() < 1e-12);
    }

    #[test]
    fn center_count_must_match_frames() {
        let stack = layered(3, 4, 4, 2);
        let result = radial_gradient(stack.view(), &[(0.0, 0.0)], EdgeFilterKind::Farid);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn every_family_runs() {
        let stack = layered(2, 10, 10, 5);
        for filter in EdgeFilterKind::ALL {
            let config = RadialConfig { xpos: 5, filter };
            let gradient = calculate_radial_gradient(stack.view(), &config, 1.0).unwrap();
            assert_eq!(gradient.dim(), (2, 10, 10));
        }
    }
}
