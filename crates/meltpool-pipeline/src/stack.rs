//! Stack-level helpers shared by several stages.
//!
//! Sample types are anything losslessly convertible to `f64` with a zero
//! value (all integer types up to 32 bits, `f32` and `f64`). Reslicing
//! keeps the input sample type; every other stage works in `f64`.

use ndarray::{Array3, ArrayView3, Axis, s};

use crate::types::PipelineError;

/// Relative tolerance used by [`is_close`].
pub const CLOSE_RTOL: f64 = 1e-5;

/// Absolute tolerance used by [`is_close`].
pub const CLOSE_ATOL: f64 = 1e-8;

/// A stack sample type.
pub trait Sample: Copy + Into<f64> + num_traits::Zero {
    /// Whether samples only take integer values.
    const INTEGER: bool;
}

macro_rules! impl_sample {
    ($integer:literal: $($ty:ty),+) => {
        $(impl Sample for $ty {
            const INTEGER: bool = $integer;
        })+
    };
}

impl_sample!(true: u8, u16, u32, i8, i16, i32);
impl_sample!(false: f32, f64);

/// Tolerant equality of `value` against `reference`.
///
/// Asymmetric: the relative term scales with `reference` only.
#[must_use]
pub fn is_close(value: f64, reference: f64) -> bool {
    (value - reference).abs() <= CLOSE_RTOL.mul_add(reference.abs(), CLOSE_ATOL)
}

/// Convert any stack into `f64` samples.
#[must_use]
pub fn to_f64<T: Sample>(stack: ArrayView3<'_, T>) -> Array3<f64> {
    stack.mapv(Into::into)
}

/// Split a stack along time into frames `[0, t)` and `[t, n_t)`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `t` exceeds the number of
/// frames.
pub fn split_at<T: Clone>(
    stack: ArrayView3<'_, T>,
    t: usize,
) -> Result<(Array3<T>, Array3<T>), PipelineError> {
    let n_t = stack.len_of(Axis(0));
    if t > n_t {
        return Err(PipelineError::InvalidConfig(format!(
            "split index {t} exceeds the {n_t} frames of the stack"
        )));
    }
    Ok((
        stack.slice(s![..t, .., ..]).to_owned(),
        stack.slice(s![t.., .., ..]).to_owned(),
    ))
}

/// Ensure two stacks are co-registered.
pub(crate) fn ensure_same_shape<A, B>(
    a: ArrayView3<'_, A>,
    b: ArrayView3<'_, B>,
) -> Result<(), PipelineError> {
    if a.dim() == b.dim() {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "stack shapes differ: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )))
    }
}

/// Map a possibly out-of-range index into `0..len` by mirroring about
/// the array edges (`d c b a | a b c d | d c b a`).
#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(crate) const fn reflect_index(index: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let mut i = index.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// Clamp a possibly out-of-range index into `0..len`.
#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(crate) const fn nearest_index(index: isize, len: usize) -> usize {
    if index < 0 {
        0
    } else if index >= len as isize {
        len - 1
    } else {
        index as usize
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn is_close_matches_numpy_defaults() {
        assert!(is_close(1.0, 1.0));
        assert!(is_close(1.000_005, 1.0));
        assert!(!is_close(1.001, 1.0));
        assert!(is_close(1e-9, 0.0));
        assert!(!is_close(1e-7, 0.0));
    }

    #[test]
    fn reflect_index_mirrors_edges() {
        assert_eq!(reflect_index(-1, 4), 0);
        assert_eq!(reflect_index(-2, 4), 1);
        assert_eq!(reflect_index(4, 4), 3);
        assert_eq!(reflect_index(5, 4), 2);
        assert_eq!(reflect_index(2, 4), 2);
        // Overhang longer than the array wraps around again.
        assert_eq!(reflect_index(-5, 4), 3);
        assert_eq!(reflect_index(0, 1), 0);
        assert_eq!(reflect_index(-3, 1), 0);
    }

    #[test]
    fn nearest_index_clamps() {
        assert_eq!(nearest_index(-3, 5), 0);
        assert_eq!(nearest_index(7, 5), 4);
        assert_eq!(nearest_index(2, 5), 2);
    }

    #[test]
    fn split_at_divides_time_axis() {
        let stack = Array3::<u16>::from_shape_fn((5, 2, 3), |(t, _, _)| t as u16);
        let (head, tail) = split_at(stack.view(), 2).unwrap();
        assert_eq!(head.dim(), (2, 2, 3));
        assert_eq!(tail.dim(), (3, 2, 3));
        assert_eq!(tail[[0, 0, 0]], 2);
    }

    #[test]
    fn split_at_end_gives_empty_tail() {
        let stack = Array3::<f32>::zeros((4, 2, 2));
        let (head, tail) = split_at(stack.view(), 4).unwrap();
        assert_eq!(head.dim(), (4, 2, 2));
        assert_eq!(tail.dim(), (0, 2, 2));
    }

    #[test]
    fn split_past_end_is_rejected() {
        let stack = Array3::<f32>::zeros((4, 2, 2));
        assert!(matches!(
            split_at(stack.view(), 5),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn to_f64_preserves_values() {
        let stack = Array3::<u8>::from_elem((1, 2, 2), 200);
        let converted = to_f64(stack.view());
        assert!(converted.iter().all(|&v| (v - 200.0).abs() < f64::EPSILON));
    }
}
