//! Laser trajectory estimation.
//!
//! Two routes produce a [`LinearTrajectory`]:
//!
//! - [`estimate`] fits a line to the bright laser streak in a maximum
//!   projection of the stack.
//! - [`from_points`] (and [`from_lines`]) derive the line from a manual
//!   2-point annotation, for recordings too noisy for the automatic fit.
//!
//! Both return coefficients of `row = coef * column + intercept` on the
//! projection image, so an estimated line can be reviewed, corrected and
//! fed back through [`from_points`] without changing conventions.

use log::{debug, warn};
use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::config::EstimatorConfig;
use crate::edge::EdgeFilterKind;
use crate::rank;
use crate::stack::Sample;
use crate::types::{LinearTrajectory, Orientation, PipelineError, Point};

/// Residual magnitude below which all samples weigh the same in the
/// robust fit.
pub const FIT_EPSILON: f64 = 0.1;

const FIT_MAX_ITERATIONS: usize = 100;
const FIT_TOLERANCE: f64 = 1e-10;

/// Output of [`estimate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryEstimate {
    /// Edge-filtered maximum projection.
    ///
    /// Shape `(x, t)` for [`Orientation::PositionOverTime`] and `(t, x)`
    /// for [`Orientation::TimeOverPosition`].
    pub projection: Array2<f64>,
    /// Median-smoothed row of the strongest edge in every column of
    /// `projection`.
    pub maxima: Vec<f64>,
    /// Line fitted through `maxima`.
    pub trajectory: LinearTrajectory,
}

/// Estimate the laser trajectory from a stack.
///
/// 1. Maximum projection over height.
/// 2. Median filter with an anti-diagonal banded footprint of
///    `kernel_size_img`, which keeps the laser streak and drops noise
///    off it.
/// 3. Horizontal Sobel filter to accentuate the leading streak edge.
/// 4. Row of the maximum response per column, smoothed by a 1D median of
///    `kernel_size_max`.
/// 5. Robust line fit of those rows against the column index.
///
/// A flat stack yields a degenerate (typically stationary) fit rather
/// than an error.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if a kernel size is even or
/// zero, and [`PipelineError::EmptyStack`] if the stack has no frames or
/// no columns.
pub fn estimate<T: Sample>(
    stack: ArrayView3<'_, T>,
    config: &EstimatorConfig,
) -> Result<TrajectoryEstimate, PipelineError> {
    config.validate()?;
    let (n_t, _, n_x) = stack.dim();
    if n_t == 0 || n_x == 0 {
        return Err(PipelineError::EmptyStack);
    }

    let projection = max_projection(stack);
    let projection = match config.orientation {
        Orientation::PositionOverTime => projection.reversed_axes(),
        Orientation::TimeOverPosition => projection,
    };

    let footprint = rank::anti_diagonal_band(config.kernel_size_img);
    let smoothed = rank::footprint_median_2d(projection.view(), footprint.view());
    let projection = EdgeFilterKind::Sobel.horizontal(smoothed.view());

    let maxima = column_argmax(projection.view());
    let maxima = rank::median_filter_1d(&maxima, config.kernel_size_max);

    let (coef, intercept) = fit_robust_line(&maxima);
    debug!(
        "estimated trajectory over {} columns: coef={coef:.4}, intercept={intercept:.2}",
        maxima.len()
    );
    let trajectory = LinearTrajectory::new(coef, intercept, config.orientation);
    if trajectory.is_stationary() {
        warn!("estimated trajectory is stationary; the stack may be flat");
    }

    Ok(TrajectoryEstimate {
        projection,
        maxima,
        trajectory,
    })
}

/// Brightest sample over height, as a `(t, x)` image.
fn max_projection<T: Sample>(stack: ArrayView3<'_, T>) -> Array2<f64> {
    stack.map_axis(Axis(1), |column| {
        column
            .iter()
            .map(|&v| v.into())
            .fold(f64::NEG_INFINITY, f64::max)
    })
}

/// Row index of the first maximum in every column.
#[allow(clippy::cast_precision_loss)]
fn column_argmax(image: ArrayView2<'_, f64>) -> Vec<f64> {
    image
        .axis_iter(Axis(1))
        .map(|column| {
            let mut best = 0;
            for (row, &value) in column.iter().enumerate() {
                if value > column[best] {
                    best = row;
                }
            }
            best as f64
        })
        .collect()
}

/// Fit `value = coef * index + intercept` by iteratively reweighted least
/// squares on an absolute-deviation loss.
///
/// Residuals smaller than [`FIT_EPSILON`] share one weight, larger ones
/// are down-weighted by their magnitude, so isolated outliers pull the
/// line far less than in an ordinary least-squares fit. When the normal
/// equations are singular (fewer than two samples) the slope is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fit_robust_line(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut weights = vec![1.0; values.len()];
    let mut line = weighted_line(values, &weights);
    for _ in 0..FIT_MAX_ITERATIONS {
        for (i, (w, &v)) in weights.iter_mut().zip(values).enumerate() {
            let residual = v - line.0.mul_add(i as f64, line.1);
            *w = 1.0 / residual.abs().max(FIT_EPSILON);
        }
        let next = weighted_line(values, &weights);
        let shift = (next.0 - line.0).abs() + (next.1 - line.1).abs();
        line = next;
        if shift < FIT_TOLERANCE {
            break;
        }
    }
    line
}

/// Closed-form weighted least squares for a line over sample indices.
#[allow(clippy::cast_precision_loss)]
fn weighted_line(values: &[f64], weights: &[f64]) -> (f64, f64) {
    let mut sw = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, (&v, &w)) in values.iter().zip(weights).enumerate() {
        let x = i as f64;
        sw += w;
        sx += w * x;
        sy += w * v;
        sxx += w * x * x;
        sxy += w * x * v;
    }
    let det = sw.mul_add(sxx, -(sx * sx));
    if det.abs() <= f64::EPSILON * sw * sxx.max(1.0) {
        return (0.0, sy / sw);
    }
    let coef = sw.mul_add(sxy, -(sx * sy)) / det;
    let intercept = coef.mul_add(-sx, sy) / sw;
    (coef, intercept)
}

/// Line through two annotated points.
///
/// `coef = (y2 - y1) / (x2 - x1)`; the intercept is the mean of the
/// intercepts computed from each point, which absorbs rounding
/// differences between the two.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateTrajectory`] if both points share
/// the same `x`, where the slope is undefined.
#[allow(clippy::float_cmp)]
pub fn from_points(
    point1: Point,
    point2: Point,
    orientation: Orientation,
) -> Result<LinearTrajectory, PipelineError> {
    let dx = point2.x - point1.x;
    if dx == 0.0 {
        return Err(PipelineError::DegenerateTrajectory(format!(
            "points share the independent coordinate {}",
            point1.x
        )));
    }
    let coef = (point2.y - point1.y) / dx;
    if !coef.is_finite() {
        return Err(PipelineError::DegenerateTrajectory(format!(
            "slope between ({}, {}) and ({}, {}) is not finite",
            point1.y, point1.x, point2.y, point2.x
        )));
    }
    let intercept1 = coef.mul_add(-point1.x, point1.y);
    let intercept2 = coef.mul_add(-point2.x, point2.y);
    Ok(LinearTrajectory::new(
        coef,
        f64::midpoint(intercept1, intercept2),
        orientation,
    ))
}

/// Line from a set of 2-point line annotations.
///
/// Each annotation is a `(2, 2)` array of `(row, column)` points.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedAnnotation`] unless exactly one
/// annotation of shape `(2, 2)` is supplied, and the errors of
/// [`from_points`] otherwise.
pub fn from_lines(
    lines: &[Array2<f64>],
    orientation: Orientation,
) -> Result<LinearTrajectory, PipelineError> {
    let line = match lines {
        [] => {
            return Err(PipelineError::MalformedAnnotation(
                "no line annotation supplied".to_string(),
            ));
        }
        [line] => line,
        _ => {
            return Err(PipelineError::MalformedAnnotation(format!(
                "expected exactly one line annotation, got {}",
                lines.len()
            )));
        }
    };
    if line.dim() != (2, 2) {
        return Err(PipelineError::MalformedAnnotation(format!(
            "line annotation must have shape (2, 2), got {:?}",
            line.dim()
        )));
    }
    from_points(
        Point::new(line[[0, 0]], line[[0, 1]]),
        Point::new(line[[1, 0]], line[[1, 1]]),
        orientation,
    )
}

/// Segment of `trajectory` inside a `rows × cols` projection image, as a
/// `(2, 2)` array of `(row, column)` end points.
///
/// Starts where the line crosses row 0 and ends where it crosses the last
/// row boundary; either end that falls outside the column range is pulled
/// back onto the left or right image edge.
///
/// Both ends clamp against `cols`. Earlier versions of this tool clamped
/// the second end against `rows` instead, which only agrees for square
/// projections.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateTrajectory`] for a stationary line.
pub fn line_endpoints(
    trajectory: &LinearTrajectory,
    rows: usize,
    cols: usize,
) -> Result<Array2<f64>, PipelineError> {
    if trajectory.is_stationary() {
        return Err(PipelineError::DegenerateTrajectory(
            "a stationary trajectory never crosses the projection rows".to_string(),
        ));
    }
    #[allow(clippy::cast_precision_loss)]
    let (rows, cols) = (rows as f64, cols as f64);
    let crossing = |row: f64| {
        let col = ((row - trajectory.intercept) / trajectory.coef).clamp(0.0, cols);
        [trajectory.evaluate(col), col]
    };
    let [r0, c0] = crossing(0.0);
    let [r1, c1] = crossing(rows);
    Ok(ndarray::array![[r0, c0], [r1, c1]])
}
