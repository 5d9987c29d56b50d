//! Rank-order (median) filters in one, two and three dimensions.
//!
//! Each filter picks the element of rank `n / 2` from its `n` samples,
//! so windows with an even sample count take the upper median. Border
//! handling differs per filter and is stated on each function.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

use crate::stack::{nearest_index, reflect_index};

/// Select the element of rank `len / 2`.
///
/// Reorders `values`. Returns `0.0` for an empty slice.
fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, median, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    *median
}

/// Window offsets covered by a kernel of `size` samples.
///
/// Odd sizes are centred. Even sizes reach one sample further back than
/// forward.
#[allow(clippy::cast_possible_wrap)]
const fn window_bounds(size: usize) -> (isize, isize) {
    let lo = -((size / 2) as isize);
    let hi = lo + size as isize;
    (lo, hi)
}

/// 1D median filter with zero padding outside the signal.
///
/// `kernel_size` must be odd; callers validate it.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn median_filter_1d(signal: &[f64], kernel_size: usize) -> Vec<f64> {
    let half = (kernel_size / 2) as isize;
    let len = signal.len() as isize;
    let mut window = Vec::with_capacity(kernel_size);
    (0..len)
        .map(|i| {
            window.clear();
            for k in (i - half)..=(i + half) {
                let value = if (0..len).contains(&k) {
                    signal[k as usize]
                } else {
                    0.0
                };
                window.push(value);
            }
            median_in_place(&mut window)
        })
        .collect()
}

/// Footprint of `size × size` selecting the anti-diagonal and the two
/// diagonals adjacent to it.
///
/// This is the neighbourhood of a streak running from the bottom-left to
/// the top-right of an image.
#[must_use]
pub fn anti_diagonal_band(size: usize) -> Array2<bool> {
    Array2::from_shape_fn((size, size), |(row, col)| {
        let anti = row + col;
        anti + 2 >= size && anti <= size
    })
}

/// 2D median filter over an arbitrary boolean footprint.
///
/// The footprint is centred on each pixel. Samples outside the image
/// repeat the nearest edge pixel.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn footprint_median_2d(image: ArrayView2<'_, f64>, footprint: ArrayView2<'_, bool>) -> Array2<f64> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return image.to_owned();
    }
    let (f_rows, f_cols) = footprint.dim();
    let (row_lo, _) = window_bounds(f_rows);
    let (col_lo, _) = window_bounds(f_cols);

    let offsets: Vec<(isize, isize)> = footprint
        .indexed_iter()
        .filter(|&(_, &on)| on)
        .map(|((r, c), _)| (r as isize + row_lo, c as isize + col_lo))
        .collect();

    let mut window = Vec::with_capacity(offsets.len());
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        window.clear();
        for &(dr, dc) in &offsets {
            let rr = nearest_index(r as isize + dr, rows);
            let cc = nearest_index(c as isize + dc, cols);
            window.push(image[[rr, cc]]);
        }
        median_in_place(&mut window)
    })
}

/// 3D median filter over an axis-aligned box of `kernel = [t, y, x]`
/// samples.
///
/// Samples outside the stack are mirrored about its edges.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn box_median_3d(stack: ArrayView3<'_, f64>, kernel: [usize; 3]) -> Array3<f64> {
    let (n_t, n_y, n_x) = stack.dim();
    if n_t == 0 || n_y == 0 || n_x == 0 {
        return stack.to_owned();
    }
    let (t_lo, t_hi) = window_bounds(kernel[0]);
    let (y_lo, y_hi) = window_bounds(kernel[1]);
    let (x_lo, x_hi) = window_bounds(kernel[2]);

    let mut window = Vec::with_capacity(kernel.iter().product());
    Array3::from_shape_fn((n_t, n_y, n_x), |(t, y, x)| {
        window.clear();
        for dt in t_lo..t_hi {
            let tt = reflect_index(t as isize + dt, n_t);
            for dy in y_lo..y_hi {
                let yy = reflect_index(y as isize + dy, n_y);
                for dx in x_lo..x_hi {
                    let xx = reflect_index(x as isize + dx, n_x);
                    window.push(stack[[tt, yy, xx]]);
                }
            }
        }
        median_in_place(&mut window)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn median_of_odd_and_even_counts() {
        assert!((median_in_place(&mut [3.0, 1.0, 2.0]) - 2.0).abs() < f64::EPSILON);
        // Even count takes the upper of the two middle values.
        assert!((median_in_place(&mut [4.0, 1.0, 3.0, 2.0]) - 3.0).abs() < f64::EPSILON);
        assert!((median_in_place(&mut []) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn median_1d_removes_spike() {
        let signal = [5.0, 5.0, 90.0, 5.0, 5.0];
        let filtered = median_filter_1d(&signal, 3);
        assert_eq!(filtered, vec![5.0, 5.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn median_1d_pads_with_zeros() {
        let signal = [7.0, 7.0, 7.0];
        let filtered = median_filter_1d(&signal, 5);
        // Edges see two zeros out of five samples; the middle sees two too.
        assert_eq!(filtered, vec![7.0, 7.0, 7.0]);
        let filtered = median_filter_1d(&[7.0, 7.0], 5);
        assert_eq!(filtered, vec![0.0, 0.0]);
    }

    #[test]
    fn median_1d_kernel_one_is_identity() {
        let signal = [3.0, -1.0, 8.0];
        assert_eq!(median_filter_1d(&signal, 1), signal.to_vec());
    }

    #[test]
    fn anti_diagonal_band_shape() {
        let fp = anti_diagonal_band(3);
        let expected = array![
            [false, true, true],
            [true, true, true],
            [true, true, false],
        ];
        assert_eq!(fp, expected);
        assert_eq!(anti_diagonal_band(5).iter().filter(|&&on| on).count(), 13);
    }

    #[test]
    fn footprint_median_keeps_anti_diagonal_streak() {
        // A three-pixel-wide streak running bottom-left to top-right.
        let image = Array2::from_shape_fn((9, 9), |(r, c)| {
            if (r + c).abs_diff(8) <= 1 { 10.0 } else { 0.0 }
        });
        let fp = anti_diagonal_band(5);
        let filtered = footprint_median_2d(image.view(), fp.view());
        for r in 2..7 {
            assert!((filtered[[r, 8 - r]] - 10.0).abs() < f64::EPSILON);
        }
        assert!((filtered[[0, 0]]).abs() < f64::EPSILON);
    }

    #[test]
    fn footprint_median_removes_isolated_pixel() {
        let mut image = Array2::<f64>::zeros((7, 7));
        image[[3, 3]] = 100.0;
        let fp = anti_diagonal_band(3);
        let filtered = footprint_median_2d(image.view(), fp.view());
        assert!(filtered.iter().all(|&v| v.abs() < f64::EPSILON));
    }

    #[test]
    fn box_median_of_constant_is_constant() {
        let stack = Array3::from_elem((4, 5, 6), 2.5);
        let filtered = box_median_3d(stack.view(), [3, 3, 3]);
        assert_eq!(filtered, stack);
    }

    #[test]
    fn box_median_unit_kernel_is_identity() {
        let stack = Array3::from_shape_fn((3, 4, 5), |(t, y, x)| (t * 100 + y * 10 + x) as f64);
        let filtered = box_median_3d(stack.view(), [1, 1, 1]);
        assert_eq!(filtered, stack);
    }

    #[test]
    fn box_median_removes_salt_noise() {
        let mut stack = Array3::<f64>::zeros((5, 5, 5));
        stack[[2, 2, 2]] = 1.0;
        stack[[0, 4, 1]] = 1.0;
        let filtered = box_median_3d(stack.view(), [3, 3, 3]);
        assert!(filtered.iter().all(|&v| v.abs() < f64::EPSILON));
    }

    #[test]
    fn box_median_filters_along_time_only() {
        // Flicker along t is removed by a [3, 1, 1] kernel.
        let stack = Array3::from_shape_fn((5, 2, 2), |(t, _, _)| if t == 2 { 9.0 } else { 1.0 });
        let filtered = box_median_3d(stack.view(), [3, 1, 1]);
        assert!(filtered.iter().all(|&v| (v - 1.0).abs() < f64::EPSILON));
    }
}
