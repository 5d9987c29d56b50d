//! Surface profile extraction.
//!
//! In a normalized resliced stack every sample above the material reads
//! `1.0`. The deepest such sample of each column marks the surface; a
//! short band of a second, co-registered stack (usually the radial
//! gradient) is read just below it and summed into one value per
//! column, giving a `(frame, width)` profile.

use log::debug;
use ndarray::{Array2, Array3, ArrayView3, Axis, s};

use crate::config::SurfaceConfig;
use crate::stack::{ensure_same_shape, is_close};
use crate::types::PipelineError;

/// Frames with at least one column that sums to zero over its height.
///
/// These are frames where the reslicing window overhung the stack and
/// left zero padding behind.
#[must_use]
pub fn incomplete_frames(stack: ArrayView3<'_, f64>) -> Vec<bool> {
    stack
        .sum_axis(Axis(1))
        .outer_iter()
        .map(|columns| columns.iter().any(|&sum| is_close(sum, 0.0)))
        .collect()
}

/// Per-sample mask of background, i.e. samples close to `marker`.
#[must_use]
pub fn surface_mask(stack: ArrayView3<'_, f64>, marker: f64) -> Array3<bool> {
    stack.mapv(|v| is_close(v, marker))
}

fn take_frames(stack: ArrayView3<'_, f64>, frames: &[usize]) -> Array3<f64> {
    let (_, height, width) = stack.dim();
    Array3::from_shape_fn((frames.len(), height, width), |(i, y, x)| {
        stack[[frames[i], y, x]]
    })
}

/// Copy the band `[surface + top_offset, surface + bottom_offset)` of
/// `values` for every frame and column.
///
/// `surface` is the largest row index where `mask` is set. Rows of the
/// band that fall below the stack stay zero; a column whose band starts
/// below the stack contributes nothing.
///
/// # Errors
///
/// - [`PipelineError::InvalidConfig`] if the stacks differ in shape or
///   the band is empty.
/// - [`PipelineError::NoBackground`] if a column of `mask` has no set
///   sample.
pub fn surface_band(
    values: ArrayView3<'_, f64>,
    mask: ArrayView3<'_, bool>,
    top_offset: usize,
    bottom_offset: usize,
) -> Result<Array3<f64>, PipelineError> {
    ensure_same_shape(values, mask)?;
    if top_offset >= bottom_offset {
        return Err(PipelineError::InvalidConfig(format!(
            "top_offset ({top_offset}) must be below bottom_offset ({bottom_offset})"
        )));
    }
    let (n_t, height, width) = values.dim();
    let n_layers = bottom_offset - top_offset;
    let mut band = Array3::<f64>::zeros((n_t, n_layers, width));

    for frame in 0..n_t {
        for column in 0..width {
            let surface = mask
                .slice(s![frame, .., column])
                .iter()
                .rposition(|&outside| outside)
                .ok_or(PipelineError::NoBackground { frame, column })?;
            let first = surface + top_offset;
            if first >= height {
                continue;
            }
            let rows = n_layers.min(height - first);
            band.slice_mut(s![frame, ..rows, column])
                .assign(&values.slice(s![frame, first..first + rows, column]));
        }
    }
    Ok(band)
}

/// Flattened surface profile.
///
/// `mask_source` decides which frames are complete and where the
/// surface lies; `values` supplies the samples read below it. Both must
/// be co-registered. Incomplete frames are dropped, then the last
/// remaining frame; the band of every other frame is summed over its
/// height.
///
/// # Errors
///
/// See [`surface_band`].
pub fn surface_image(
    mask_source: ArrayView3<'_, f64>,
    values: ArrayView3<'_, f64>,
    config: &SurfaceConfig,
    marker: f64,
) -> Result<Array2<f64>, PipelineError> {
    ensure_same_shape(mask_source, values)?;
    config.validate()?;

    let keep: Vec<usize> = incomplete_frames(mask_source)
        .iter()
        .enumerate()
        .filter_map(|(t, &incomplete)| (!incomplete).then_some(t))
        .collect();
    let dropped = mask_source.len_of(Axis(0)) - keep.len();
    if dropped > 0 {
        debug!("dropping {dropped} incomplete frames");
    }
    // The last complete frame is left out of the profile.
    let used = &keep[..keep.len().saturating_sub(1)];

    let mask = surface_mask(take_frames(mask_source, used).view(), marker);
    let band = surface_band(
        take_frames(values, used).view(),
        mask.view(),
        config.top_offset,
        config.bottom_offset,
    )?;
    Ok(band.sum_axis(Axis(1)))
}
