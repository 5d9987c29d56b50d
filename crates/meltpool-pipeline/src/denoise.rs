//! 3D median denoising of a resliced stack.
//!
//! Optionally the stack is first clipped to `[0, threshold]`, with the
//! threshold picked by Otsu's method, and rescaled to `[0, 1]`. After
//! that step background saturates to exactly `1.0`, which is what the
//! radial gradient and surface stages look for.

use log::debug;
use ndarray::{Array3, ArrayView3};

use crate::config::DenoiseConfig;
use crate::rank::box_median_3d;
use crate::stack::{Sample, to_f64};
use crate::types::PipelineError;

/// Histogram bins used by [`otsu_threshold`].
pub const OTSU_BINS: usize = 256;

/// Widest value range [`otsu_threshold_integer`] bins one value per bin.
pub const MAX_INTEGER_BINS: usize = 1 << 20;

/// Finite `(min, max)` of `stack`, or `None` without finite samples.
fn finite_range(stack: ArrayView3<'_, f64>) -> Option<(f64, f64)> {
    let (min, max) = stack
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    (min <= max).then_some((min, max))
}

/// Centre of the first bin maximizing the between-class variance.
fn otsu_from_histogram(hist: &[f64], centers: &[f64]) -> f64 {
    let total: f64 = hist.iter().sum();
    let total_moment: f64 = hist.iter().zip(centers).map(|(h, c)| h * c).sum();

    // Class 1 holds bins 0..=i, class 2 bins i+1.. .
    let mut best = (f64::NEG_INFINITY, centers[0]);
    let mut weight1 = 0.0;
    let mut moment1 = 0.0;
    for i in 0..hist.len() - 1 {
        weight1 += hist[i];
        moment1 += hist[i] * centers[i];
        let weight2 = total - weight1;
        if weight1 == 0.0 || weight2 == 0.0 {
            continue;
        }
        let mean1 = moment1 / weight1;
        let mean2 = (total_moment - moment1) / weight2;
        let variance = weight1 * weight2 * (mean1 - mean2).powi(2);
        if variance > best.0 {
            best = (variance, centers[i]);
        }
    }
    best.1
}

/// Otsu's threshold over all finite samples of `stack`.
///
/// Samples are binned into [`OTSU_BINS`] equal bins spanning their
/// range; the returned threshold is the centre of the bin that maximizes
/// the between-class variance. A constant stack returns its value. A
/// stack without finite samples returns `0.0`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn otsu_threshold(stack: ArrayView3<'_, f64>) -> f64 {
    let Some((min, max)) = finite_range(stack) else {
        return 0.0;
    };
    #[allow(clippy::float_cmp)]
    if min == max {
        return min;
    }

    let bin_width = (max - min) / OTSU_BINS as f64;
    let mut hist = [0.0_f64; OTSU_BINS];
    for &v in stack.iter().filter(|v| v.is_finite()) {
        let bin = (((v - min) / bin_width) as usize).min(OTSU_BINS - 1);
        hist[bin] += 1.0;
    }
    let centers: Vec<f64> = (0..OTSU_BINS)
        .map(|i| (i as f64 + 0.5).mul_add(bin_width, min))
        .collect();
    otsu_from_histogram(&hist, &centers)
}

/// Otsu's threshold for integer-valued samples, one bin per value.
///
/// The threshold is therefore always one of the sample values. Ranges
/// wider than [`MAX_INTEGER_BINS`] fall back to [`otsu_threshold`].
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn otsu_threshold_integer(stack: ArrayView3<'_, f64>) -> f64 {
    let Some((min, max)) = finite_range(stack) else {
        return 0.0;
    };
    let bins = (max - min) as usize + 1;
    if bins > MAX_INTEGER_BINS {
        debug!("{bins} integer values exceed the histogram limit; binning");
        return otsu_threshold(stack);
    }
    if bins == 1 {
        return min;
    }

    let mut hist = vec![0.0_f64; bins];
    for &v in stack.iter().filter(|v| v.is_finite()) {
        hist[(v - min) as usize] += 1.0;
    }
    let centers: Vec<f64> = (0..bins).map(|i| min + i as f64).collect();
    otsu_from_histogram(&hist, &centers)
}

/// Clip `stack` to `[0, threshold]` and rescale the result to `[0, 1]`.
///
/// A stack that is constant after clipping becomes all zeros.
#[must_use]
pub fn normalize(stack: ArrayView3<'_, f64>, threshold: f64) -> Array3<f64> {
    let upper = threshold.max(0.0);
    let clipped = stack.mapv(|v| v.clamp(0.0, upper));
    let (min, max) = clipped
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if range.is_nan() || range <= 0.0 {
        return Array3::zeros(clipped.raw_dim());
    }
    clipped.mapv(|v| (v - min) / range)
}

/// Median filter with an axis-aligned box of `kernel = [t, y, x]`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if any extent is zero.
pub fn median_filter<T: Sample>(
    stack: ArrayView3<'_, T>,
    kernel: [usize; 3],
) -> Result<Array3<f64>, PipelineError> {
    if kernel.contains(&0) {
        return Err(PipelineError::InvalidConfig(format!(
            "median kernel extents must be at least 1, got {kernel:?}"
        )));
    }
    Ok(box_median_3d(to_f64(stack).view(), kernel))
}

/// Run the denoising stage.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the config is invalid.
pub fn denoise<T: Sample>(
    stack: ArrayView3<'_, T>,
    config: &DenoiseConfig,
) -> Result<Array3<f64>, PipelineError> {
    config.validate()?;
    let samples = to_f64(stack);
    let prepared = if config.normalize {
        let threshold = if T::INTEGER {
            otsu_threshold_integer(samples.view())
        } else {
            otsu_threshold(samples.view())
        };
        debug!("clipping at Otsu threshold {threshold:.4}");
        normalize(samples.view(), threshold)
    } else {
        samples
    };
    Ok(box_median_3d(prepared.view(), config.kernel()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Bimodal stack: dark material below row 4, bright background above.
    fn bimodal() -> Array3<f64> {
        Array3::from_shape_fn((4, 8, 6), |(t, y, x)| {
            let jitter = ((t + y + x) % 3) as f64;
            if y < 4 { 200.0 + jitter } else { 40.0 + jitter }
        })
    }

    #[test]
    fn otsu_separates_two_modes() {
        let threshold = otsu_threshold(bimodal().view());
        assert!(threshold > 42.0 && threshold < 200.0, "{threshold}");
    }

    #[test]
    fn otsu_of_constant_stack_is_that_value() {
        let stack = Array3::from_elem((2, 2, 2), 7.0);
        assert!((otsu_threshold(stack.view()) - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn otsu_ignores_non_finite_samples() {
        let mut stack = bimodal();
        stack[[0, 0, 0]] = f64::NAN;
        stack[[1, 0, 0]] = f64::INFINITY;
        let threshold = otsu_threshold(stack.view());
        assert!(threshold.is_finite());
    }

    #[test]
    fn integer_otsu_lands_on_a_sample_value() {
        // 0..=9 five times over and a single 1000: the split sits between
        // 9 and 1000, on the last populated value of the lower class.
        let stack = Array3::from_shape_fn((1, 1, 51), |(_, _, x)| {
            if x == 50 { 1000.0 } else { (x % 10) as f64 }
        });
        let threshold = otsu_threshold_integer(stack.view());
        assert!((threshold - 9.0).abs() < f64::EPSILON, "{threshold}");
        // Binned centres are not sample values.
        let binned = otsu_threshold(stack.view());
        assert!((binned - 9.0).abs() > 0.5, "{binned}");
    }

    #[test]
    fn integer_otsu_of_constant_stack_is_that_value() {
        let stack = Array3::from_elem((2, 2, 2), 300.0);
        assert!((otsu_threshold_integer(stack.view()) - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn integer_samples_use_exact_histogram() {
        // 0, 1 and 3 in one cluster, 600 and 601 in the other. The exact
        // threshold is 3, so every sample above it saturates.
        let values = [0_u16, 1, 3, 600, 601];
        let stack = Array3::from_shape_fn((3, 2, 5), |(_, _, x)| values[x]);
        let config = DenoiseConfig {
            kernel_t: 1,
            kernel_y: 1,
            kernel_x: 1,
            normalize: true,
        };
        let filtered = denoise(stack.view(), &config).unwrap();
        for ((_, _, x), &v) in filtered.indexed_iter() {
            let expected = f64::from(values[x].min(3)) / 3.0;
            assert!((v - expected).abs() < 1e-12, "x = {x}: {v}");
        }
    }

    #[test]
    fn normalize_saturates_background_to_one() {
        let stack = bimodal();
        let threshold = otsu_threshold(stack.view());
        let normalized = normalize(stack.view(), threshold);
        for ((_, y, _), &v) in normalized.indexed_iter() {
            assert!((0.0..=1.0).contains(&v));
            if y < 4 {
                assert!((v - 1.0).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn normalize_flat_stack_is_zero() {
        let stack = Array3::from_elem((2, 3, 3), 5.0);
        let normalized = normalize(stack.view(), 5.0);
        assert!(normalized.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn zero_extent_is_rejected() {
        let stack = Array3::<u8>::zeros((2, 2, 2));
        assert!(matches!(
            median_filter(stack.view(), [1, 0, 1]),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn denoise_without_normalization_keeps_values() {
        let stack = Array3::from_elem((3, 3, 3), 12_u16);
        let config = DenoiseConfig {
            normalize: false,
            ..DenoiseConfig::default()
        };
        let filtered = denoise(stack.view(), &config).unwrap();
        assert!(filtered.iter().all(|&v| (v - 12.0).abs() < f64::EPSILON));
    }

    #[test]
    fn denoise_is_idempotent_on_its_output() {
        let step = Array3::from_shape_fn((4, 8, 6), |(_, y, _)| if y < 4 { 200.0 } else { 40.0 });
        let config = DenoiseConfig::default();
        let once = denoise(step.view(), &config).unwrap();
        assert!(once.iter().all(|&v| v == 0.0 || v == 1.0));
        let twice = median_filter(once.view(), config.kernel()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn kernel_larger_than_stack_degrades_gracefully() {
        let config = DenoiseConfig {
            kernel_t: 15,
            kernel_y: 15,
            kernel_x: 15,
            normalize: true,
        };
        let filtered = denoise(bimodal().view(), &config).unwrap();
        assert_eq!(filtered.dim(), (4, 8, 6));
    }
}
