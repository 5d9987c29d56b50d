//! Shared types for the melt pool tracking pipeline.

use serde::{Deserialize, Serialize};

/// Re-export the array types so downstream crates can name stacks and
/// profiles without depending on `ndarray` directly.
pub use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// A time-resolved image stack with axes `(t, y, x)`.
///
/// Every stage treats each `t`-slice as one 2D frame.
pub type Stack<T = f64> = Array3<T>;

/// A 2D profile with axes `(frame, x)`.
pub type SurfaceProfile = Array2<f64>;

/// A point of a 2-point line annotation, in `(row, column)` order.
///
/// `y` is the dependent coordinate (the row of the annotated image)
/// and `x` the independent one (the column). On a trajectory projection
/// the row is the laser position and the column the time frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Row coordinate (dependent).
    pub y: f64,
    /// Column coordinate (independent).
    pub x: f64,
}

impl Point {
    /// Create a new point from its row and column coordinates.
    #[must_use]
    pub const fn new(y: f64, x: f64) -> Self {
        Self { y, x }
    }
}

/// Which quantity a [`LinearTrajectory`] predicts from which.
///
/// The two conventions are not interchangeable: each pairs with one of
/// the reslicing variants in [`crate::reslice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    /// `position = coef * t + intercept`, iterated over time frames.
    #[default]
    PositionOverTime,
    /// `t = coef * position + intercept`, iterated over laser positions.
    TimeOverPosition,
}

/// Linear model of the laser trajectory.
///
/// A zero `coef` describes a stationary laser and is rejected by the
/// reslicing stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTrajectory {
    /// Slope of the line.
    pub coef: f64,
    /// Value of the dependent coordinate where the independent one is zero.
    pub intercept: f64,
    /// How to read the two coefficients.
    pub orientation: Orientation,
}

impl LinearTrajectory {
    /// Create a new trajectory.
    #[must_use]
    pub const fn new(coef: f64, intercept: f64, orientation: Orientation) -> Self {
        Self {
            coef,
            intercept,
            orientation,
        }
    }

    /// Evaluate the dependent coordinate at `independent`.
    #[must_use]
    pub fn evaluate(&self, independent: f64) -> f64 {
        self.coef.mul_add(independent, self.intercept)
    }

    /// Returns `true` if the laser does not move.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_stationary(&self) -> bool {
        self.coef == 0.0
    }
}

/// One row of the window position log.
///
/// All coordinates refer to the original (un-resliced) stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPosition {
    /// Time frame the window was cut from.
    #[serde(rename = "Time frame")]
    pub time_frame: i64,
    /// Rounded laser position in that frame.
    #[serde(rename = "Laser position")]
    pub laser_position: i64,
    /// First column of the window (clamped to the stack).
    #[serde(rename = "Window start")]
    pub window_start: i64,
    /// End column of the window (clamped to the stack).
    #[serde(rename = "Window stop")]
    pub window_stop: i64,
}

/// Ordered window position log, one row per retained frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPositions(Vec<WindowPosition>);

impl WindowPositions {
    /// Create an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a row.
    pub fn push(&mut self, position: WindowPosition) {
        self.0.push(position);
    }

    /// Returns `true` if no frame was retained.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of retained frames.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// All rows in insertion order.
    #[must_use]
    pub fn rows(&self) -> &[WindowPosition] {
        &self.0
    }

    /// Iterate over the rows.
    pub fn iter(&self) -> std::slice::Iter<'_, WindowPosition> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a WindowPositions {
    type Item = &'a WindowPosition;
    type IntoIter = std::slice::Iter<'a, WindowPosition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Errors that can occur during pipeline processing.
///
/// Every variant carries only plain data, so the enum serializes
/// directly for transfer to a host application.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// A parameter is out of range (even kernel, zero window, ...).
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The gradient filter family name is not recognized.
    #[error(
        "`method` can only be 'sobel', 'prewitt', 'scharr', or 'farid', not '{0}'"
    )]
    UnknownFilter(String),

    /// The trajectory is stationary or never enters the frame.
    #[error("degenerate trajectory: {0}")]
    DegenerateTrajectory(String),

    /// The reslicing window overhangs both sides of the stack.
    #[error(
        "window [{window_start}, {window_stop}) is wider than the stack width {width}"
    )]
    OversizedWindow {
        /// Unclamped window start.
        window_start: i64,
        /// Unclamped window stop.
        window_stop: i64,
        /// Width of the stack.
        width: i64,
    },

    /// No laser position leaves room for a full window.
    #[error("window size and/or offset too large")]
    WindowTooLarge,

    /// Line annotations were missing, duplicated or of the wrong shape.
    #[error("malformed annotation: {0}")]
    MalformedAnnotation(String),

    /// A column has no background sample, so no surface can be found.
    #[error("frame {frame}, column {column} contains no background sample")]
    NoBackground {
        /// Frame index (after incomplete frames were dropped).
        frame: usize,
        /// Column index.
        column: usize,
    },

    /// The input stack has no samples along a required axis.
    #[error("input stack is empty")]
    EmptyStack,
}
