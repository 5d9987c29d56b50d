//! Pipeline configuration.
//!
//! Every stage reads its own sub-config, so a host application can
//! change one group of parameters and recompute only the stages that
//! depend on it (see [`crate::pipeline::StageKind`]).

use serde::{Deserialize, Serialize};

use crate::edge::EdgeFilterKind;
use crate::types::{Orientation, PipelineError};

/// Round an even kernel size down to the nearest odd value.
///
/// Host sliders produce arbitrary integers; the core only accepts odd
/// kernel sizes. Zero stays zero and is rejected by validation.
#[must_use]
pub const fn round_down_to_odd(size: usize) -> usize {
    if size % 2 == 0 {
        size.saturating_sub(1)
    } else {
        size
    }
}

fn require_odd(name: &str, value: usize) -> Result<(), PipelineError> {
    if value % 2 == 1 {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "{name} must be a positive odd integer, got {value}"
        )))
    }
}

/// Parameters of the automatic trajectory estimator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Side length of the anti-diagonal median footprint. Odd.
    pub kernel_size_img: usize,
    /// Length of the median filter applied to the maxima. Odd.
    pub kernel_size_max: usize,
    /// Which coordinate the fitted line predicts.
    pub orientation: Orientation,
}

impl EstimatorConfig {
    /// Default footprint side length.
    pub const DEFAULT_KERNEL_SIZE_IMG: usize = 5;
    /// Default maxima median length.
    pub const DEFAULT_KERNEL_SIZE_MAX: usize = 9;

    /// Check that both kernel sizes are positive and odd.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        require_odd("kernel_size_img", self.kernel_size_img)?;
        require_odd("kernel_size_max", self.kernel_size_max)
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            kernel_size_img: Self::DEFAULT_KERNEL_SIZE_IMG,
            kernel_size_max: Self::DEFAULT_KERNEL_SIZE_MAX,
            orientation: Orientation::default(),
        }
    }
}

/// Geometry of the co-moving reslicing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResliceConfig {
    /// Distance from the window start to the laser position, in pixels.
    pub window_offset: i64,
    /// Width of the window, in pixels.
    pub window_size: usize,
}

impl ResliceConfig {
    /// Default window offset.
    pub const DEFAULT_WINDOW_OFFSET: i64 = 80;
    /// Default window width.
    pub const DEFAULT_WINDOW_SIZE: usize = 400;

    /// Window from margins on either side of the laser.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn from_margins(left_margin: usize, right_margin: usize) -> Self {
        Self {
            window_offset: left_margin as i64,
            window_size: left_margin + right_margin,
        }
    }

    /// Check that the window has a positive width.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero-width window.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.window_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "window_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ResliceConfig {
    fn default() -> Self {
        Self {
            window_offset: Self::DEFAULT_WINDOW_OFFSET,
            window_size: Self::DEFAULT_WINDOW_SIZE,
        }
    }
}

/// Parameters of the 3D median denoiser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Kernel extent along time.
    pub kernel_t: usize,
    /// Kernel extent along height.
    pub kernel_y: usize,
    /// Kernel extent along width.
    pub kernel_x: usize,
    /// Clip to an Otsu threshold and rescale to `[0, 1]` before filtering.
    pub normalize: bool,
}

impl DenoiseConfig {
    /// Default kernel extent along each axis.
    pub const DEFAULT_KERNEL: usize = 3;
    /// Largest extent offered by host sliders.
    pub const MAX_KERNEL: usize = 15;

    /// Kernel extents in `(t, y, x)` order.
    #[must_use]
    pub const fn kernel(&self) -> [usize; 3] {
        [self.kernel_t, self.kernel_y, self.kernel_x]
    }

    /// Check that every kernel extent is at least one.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero extent.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.kernel().contains(&0) {
            return Err(PipelineError::InvalidConfig(format!(
                "denoise kernel extents must be at least 1, got {:?}",
                self.kernel()
            )));
        }
        Ok(())
    }
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            kernel_t: Self::DEFAULT_KERNEL,
            kernel_y: Self::DEFAULT_KERNEL,
            kernel_x: Self::DEFAULT_KERNEL,
            normalize: true,
        }
    }
}

/// Parameters of the radial gradient engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialConfig {
    /// Column of the resliced stack where the laser sits.
    pub xpos: usize,
    /// Directional filter family.
    pub filter: EdgeFilterKind,
}

impl RadialConfig {
    /// Default reference column.
    pub const DEFAULT_XPOS: usize = 115;
}

impl Default for RadialConfig {
    fn default() -> Self {
        Self {
            xpos: Self::DEFAULT_XPOS,
            filter: EdgeFilterKind::default(),
        }
    }
}

/// Parameters of the surface extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Rows to skip below the detected surface.
    pub top_offset: usize,
    /// End of the band below the detected surface (exclusive).
    pub bottom_offset: usize,
}

impl SurfaceConfig {
    /// Default first band row.
    pub const DEFAULT_TOP_OFFSET: usize = 0;
    /// Default band end.
    pub const DEFAULT_BOTTOM_OFFSET: usize = 5;

    /// Number of rows in the extracted band.
    #[must_use]
    pub const fn band_height(&self) -> usize {
        self.bottom_offset.saturating_sub(self.top_offset)
    }

    /// Check that the band is at least one row tall.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `top_offset` is not
    /// below `bottom_offset`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.top_offset >= self.bottom_offset {
            return Err(PipelineError::InvalidConfig(format!(
                "top_offset ({}) must be below bottom_offset ({})",
                self.top_offset, self.bottom_offset
            )));
        }
        Ok(())
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            top_offset: Self::DEFAULT_TOP_OFFSET,
            bottom_offset: Self::DEFAULT_BOTTOM_OFFSET,
        }
    }
}

/// Configuration for the whole pipeline.
///
/// All parameters have defaults matching the interactive tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trajectory estimator parameters.
    pub estimator: EstimatorConfig,
    /// Reslicing window geometry.
    pub reslice: ResliceConfig,
    /// Denoiser parameters.
    pub denoise: DenoiseConfig,
    /// Radial gradient parameters.
    pub radial: RadialConfig,
    /// Surface extractor parameters.
    pub surface: SurfaceConfig,
    /// Sample value marking "outside material" in a normalized stack.
    pub background_marker: f64,
}

impl PipelineConfig {
    /// Default background marker: saturated background after
    /// normalization to `[0, 1]`.
    pub const DEFAULT_BACKGROUND_MARKER: f64 = 1.0;

    /// Validate every sub-config.
    ///
    /// # Errors
    ///
    /// Returns the first [`PipelineError::InvalidConfig`] encountered.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.estimator.validate()?;
        self.reslice.validate()?;
        self.denoise.validate()?;
        self.surface.validate()?;
        if !self.background_marker.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "background_marker must be finite, got {}",
                self.background_marker
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            reslice: ResliceConfig::default(),
            denoise: DenoiseConfig::default(),
            radial: RadialConfig::default(),
            surface: SurfaceConfig::default(),
            background_marker: Self::DEFAULT_BACKGROUND_MARKER,
        }
    }
}
