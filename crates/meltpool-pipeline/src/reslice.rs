//! Moving-window reslicing into a frame that keeps the laser in place.
//!
//! Two variants exist, one per trajectory [`Orientation`]:
//!
//! - [`reslice_over_time`] walks the time frames, places the window
//!   around `position = coef * t + intercept`, and zero-pads windows that
//!   overhang the stack.
//! - [`reslice_over_position`] walks the laser positions, looks up the
//!   frame `t = coef * position + intercept`, and only ever copies full
//!   windows.
//!
//! [`reslice`] dispatches on the trajectory's orientation. Positions are
//! rounded half to even; there is no sub-pixel interpolation.

use log::debug;
use ndarray::{Array3, ArrayView3, s};

use crate::config::ResliceConfig;
use crate::stack::Sample;
use crate::types::{LinearTrajectory, Orientation, PipelineError, WindowPosition, WindowPositions};

/// Output of the reslicing stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Resliced<T> {
    /// Co-moving stack of shape `(frames, height, window_size)`.
    pub stack: Array3<T>,
    /// Window bounds of every retained frame.
    pub positions: WindowPositions,
}

/// Reslice `stack` along `trajectory`, using the variant that matches its
/// orientation.
///
/// # Errors
///
/// See [`reslice_over_time`] and [`reslice_over_position`].
pub fn reslice<T: Sample>(
    stack: ArrayView3<'_, T>,
    trajectory: &LinearTrajectory,
    config: &ResliceConfig,
) -> Result<Resliced<T>, PipelineError> {
    match trajectory.orientation {
        Orientation::PositionOverTime => reslice_over_time(
            stack,
            trajectory.coef,
            trajectory.intercept,
            config.window_offset,
            config.window_size,
        ),
        Orientation::TimeOverPosition => reslice_over_position(
            stack,
            trajectory.coef,
            trajectory.intercept,
            config.window_offset,
            config.window_size,
        ),
    }
}

fn check_line(coef: f64, intercept: f64) -> Result<(), PipelineError> {
    if !coef.is_finite() || !intercept.is_finite() {
        return Err(PipelineError::DegenerateTrajectory(format!(
            "non-finite line (coef={coef}, intercept={intercept})"
        )));
    }
    #[allow(clippy::float_cmp)]
    if coef == 0.0 {
        return Err(PipelineError::DegenerateTrajectory(
            "coef is zero; a stationary laser cannot be resliced".to_string(),
        ));
    }
    Ok(())
}

/// Reslice frame by frame around `position = coef * t + intercept`.
///
/// For every frame the window spans
/// `[position - window_offset, position - window_offset + window_size)`.
/// The window is handled by the first matching rule:
///
/// 1. `position > width`: stop, no later frame is processed.
/// 2. Window entirely left of column 0 or at/after `width`: frame skipped.
/// 3. Window overhangs both edges: error.
/// 4. Overhangs the left edge: data right-aligned, zero padding on the
///    left, logged start clamped to 0.
/// 5. Reaches the right edge: data left-aligned, zero padding on the
///    right, logged stop clamped to `width - 1`.
/// 6. Otherwise: direct copy.
///
/// Skipped frames stay zero in the output and are absent from the log.
///
/// The line must enter the frame: `coef > 0` requires
/// `intercept < height` and `coef < 0` requires `intercept > 0`. The
/// check compares against the stack *height* (axis 1) although the line
/// describes a width position; it is kept exactly as the interactive
/// tool applies it.
///
/// # Errors
///
/// - [`PipelineError::InvalidConfig`] for a zero `window_size`.
/// - [`PipelineError::DegenerateTrajectory`] for a zero or non-finite
///   line, or one failing the entry check above.
/// - [`PipelineError::OversizedWindow`] if a window overhangs both edges.
#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn reslice_over_time<T: Sample>(
    stack: ArrayView3<'_, T>,
    coef: f64,
    intercept: f64,
    window_offset: i64,
    window_size: usize,
) -> Result<Resliced<T>, PipelineError> {
    if window_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "window_size must be positive".to_string(),
        ));
    }
    check_line(coef, intercept)?;

    let (n_t, height, width) = stack.dim();
    let height_f = height as f64;
    if (coef > 0.0 && intercept >= height_f) || (coef < 0.0 && intercept <= 0.0) {
        return Err(PipelineError::DegenerateTrajectory(format!(
            "line (coef={coef}, intercept={intercept}) does not enter a frame of height {height}"
        )));
    }

    let width = width as i64;
    let size = window_size as i64;
    let mut resliced = Array3::<T>::zeros((n_t, height, window_size));
    let mut positions = WindowPositions::new();

    for t in 0..n_t {
        let laser_position = coef.mul_add(t as f64, intercept).round_ties_even() as i64;
        if laser_position > width {
            debug!("laser leaves the stack at frame {t}; stopping");
            break;
        }
        let start = laser_position - window_offset;
        let stop = start + size;

        if stop <= 0 || start >= width {
            continue;
        }
        if start < 0 && stop > width {
            return Err(PipelineError::OversizedWindow {
                window_start: start,
                window_stop: stop,
                width,
            });
        }

        let mut frame = resliced.slice_mut(s![t, .., ..]);
        let (window_start, window_stop) = if start < 0 {
            let filled = stop as usize;
            frame
                .slice_mut(s![.., window_size - filled..])
                .assign(&stack.slice(s![t, .., ..filled]));
            (0, stop)
        } else if stop >= width {
            let filled = (width - start) as usize;
            frame
                .slice_mut(s![.., ..filled])
                .assign(&stack.slice(s![t, .., start as usize..]));
            (start, width - 1)
        } else {
            frame.assign(&stack.slice(s![t, .., start as usize..stop as usize]));
            (start, stop)
        };

        positions.push(WindowPosition {
            time_frame: t as i64,
            laser_position,
            window_start,
            window_stop,
        });
    }

    debug!(
        "resliced {} of {n_t} frames into windows of {window_size} columns",
        positions.len()
    );
    Ok(Resliced {
        stack: resliced,
        positions,
    })
}

/// Reslice position by position, reading frame
/// `t = coef * position + intercept`.
///
/// Positions run from `max(0, window_offset)` up to (excluding)
/// `min(round(-intercept / coef), width - window_size + window_offset)`,
/// the first bound being where the line reaches frame 0. Every window
/// lies fully inside the stack, so no padding is needed. Log rows are in
/// increasing position order.
///
/// # Errors
///
/// - [`PipelineError::InvalidConfig`] for a zero `window_size`.
/// - [`PipelineError::DegenerateTrajectory`] for a zero or non-finite
///   line, or if a position maps outside `0..n_t`.
/// - [`PipelineError::WindowTooLarge`] if fewer than one position remains.
#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn reslice_over_position<T: Sample>(
    stack: ArrayView3<'_, T>,
    coef: f64,
    intercept: f64,
    window_offset: i64,
    window_size: usize,
) -> Result<Resliced<T>, PipelineError> {
    if window_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "window_size must be positive".to_string(),
        ));
    }
    check_line(coef, intercept)?;

    let (n_t, height, width) = stack.dim();
    let width = width as i64;
    let size = window_size as i64;

    let first = window_offset.max(0);
    let last = ((-intercept / coef).round_ties_even() as i64).min(width - size + window_offset);
    if last - first < 1 {
        return Err(PipelineError::WindowTooLarge);
    }

    let mut resliced = Array3::<T>::zeros(((last - first) as usize, height, window_size));
    let mut positions = WindowPositions::new();

    for (i, position) in (first..last).enumerate() {
        let t = coef.mul_add(position as f64, intercept).round_ties_even() as i64;
        if t < 0 || t >= n_t as i64 {
            return Err(PipelineError::DegenerateTrajectory(format!(
                "position {position} maps to frame {t}, outside 0..{n_t}"
            )));
        }
        let start = position - window_offset;
        let stop = start + size;
        resliced
            .slice_mut(s![i, .., ..])
            .assign(&stack.slice(s![t as usize, .., start as usize..stop as usize]));
        positions.push(WindowPosition {
            time_frame: t,
            laser_position: position,
            window_start: start,
            window_stop: stop,
        });
    }

    debug!(
        "resliced {} positions into windows of {window_size} columns",
        positions.len()
    );
    Ok(Resliced {
        stack: resliced,
        positions,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_possible_truncation)]
mod tests {
    use super::*;

    /// Stack whose samples encode their own coordinates.
    fn coded_stack(n_t: usize, height: usize, width: usize) -> Array3<u32> {
        Array3::from_shape_fn((n_t, height, width), |(t, y, x)| {
            (t * 1_000_000 + y * 1_000 + x + 1) as u32
        })
    }

    #[test]
    fn zero_coef_is_rejected() {
        let stack = coded_stack(3, 4, 10);
        let result = reslice_over_time(stack.view(), 0.0, 1.0, 2, 4);
        assert!(matches!(result, Err(PipelineError::DegenerateTrajectory(_))));
        let result = reslice_over_position(stack.view(), 0.0, 1.0, 2, 4);
        assert!(matches!(result, Err(PipelineError::DegenerateTrajectory(_))));
    }

    #[test]
    fn entry_check_uses_height() {
        let stack = coded_stack(3, 4, 10);
        // Positive slope starting at or below the frame height.
        assert!(reslice_over_time(stack.view(), 1.0, 4.0, 0, 2).is_err());
        assert!(reslice_over_time(stack.view(), 1.0, 3.0, 0, 2).is_ok());
        // Negative slope starting at or left of zero.
        assert!(reslice_over_time(stack.view(), -1.0, 0.0, 0, 2).is_err());
        assert!(reslice_over_time(stack.view(), -1.0, 0.5, 0, 2).is_ok());
    }

    #[test]
    fn direct_copy_inside_stack() {
        let stack = coded_stack(3, 2, 20);
        let out = reslice_over_time(stack.view(), 1.0, 1.0, 1, 4).unwrap();
        assert_eq!(out.stack.dim(), (3, 2, 4));
        for t in 0..3 {
            let start = t;
            assert_eq!(out.stack.slice(s![t, .., ..]), stack.slice(s![t, .., start..start + 4]));
        }
        let row = out.positions.rows()[2];
        assert_eq!(
            row,
            WindowPosition {
                time_frame: 2,
                laser_position: 3,
                window_start: 2,
                window_stop: 6,
            }
        );
    }

    #[test]
    fn left_overhang_is_zero_padded_and_right_aligned() {
        let stack = coded_stack(3, 4, 10);
        let out = reslice_over_time(stack.view(), 1.0, 1.0, 5, 6).unwrap();
        assert_eq!(out.stack.dim(), (3, 4, 6));
        for t in 0..3 {
            // position = t + 1, start = t - 4, stop = t + 2
            let filled = t + 2;
            let pad = 6 - filled;
            assert!(out.stack.slice(s![t, .., ..pad]).iter().all(|&v| v == 0));
            assert_eq!(
                out.stack.slice(s![t, .., pad..]),
                stack.slice(s![t, .., ..filled])
            );
            let row = out.positions.rows()[t];
            assert_eq!(row.window_start, 0);
            assert_eq!(row.window_stop, filled as i64);
        }
    }

    #[test]
    fn windows_left_of_stack_are_skipped() {
        let stack = coded_stack(30, 4, 40);
        // position = 20 - t, start = 10 - t, stop = 15 - t
        let out = reslice_over_time(stack.view(), -1.0, 20.0, 10, 5).unwrap();
        assert_eq!(out.stack.dim(), (30, 4, 5));
        assert_eq!(out.positions.len(), 15);

        // Frame 14 keeps a single column; frame 15 ends exactly at 0.
        let last = out.positions.rows()[14];
        assert_eq!(last.time_frame, 14);
        assert_eq!((last.window_start, last.window_stop), (0, 1));
        assert_eq!(out.stack.slice(s![14, .., 4]), stack.slice(s![14, .., 0]));
        assert!(out.positions.iter().all(|row| row.time_frame < 15));
        assert!(out.stack.slice(s![15.., .., ..]).iter().all(|&v| v == 0));
    }

    #[test]
    fn right_overhang_is_zero_padded_and_left_aligned() {
        let stack = coded_stack(2, 3, 10);
        // position = 2 + t, start = 8 + t, stop = 14 + t
        let out = reslice_over_time(stack.view(), 1.0, 2.0, -6, 6).unwrap();
        assert_eq!(out.positions.len(), 2);
        let row = out.positions.rows()[0];
        assert_eq!(row.laser_position, 2);
        assert_eq!(row.window_start, 8);
        assert_eq!(row.window_stop, 9);
        assert_eq!(out.stack.slice(s![0, .., ..2]), stack.slice(s![0, .., 8..]));
        assert!(out.stack.slice(s![0, .., 2..]).iter().all(|&v| v == 0));
    }

    #[test]
    fn window_ending_at_width_counts_as_right_overhang() {
        let stack = coded_stack(1, 3, 10);
        // position 2, start 6, stop 10 == width
        let out = reslice_over_time(stack.view(), 1.0, 2.0, -4, 4).unwrap();
        let row = out.positions.rows()[0];
        assert_eq!(row.window_start, 6);
        assert_eq!(row.window_stop, 9);
        assert_eq!(out.stack.slice(s![0, .., ..]), stack.slice(s![0, .., 6..]));
    }

    #[test]
    fn windows_outside_stack_are_skipped() {
        let stack = coded_stack(4, 2, 10);
        // position = 1 + 3t: 1, 4, 7, 10; start = position + 10 >= width.
        let out = reslice_over_time(stack.view(), 3.0, 1.0, -10, 3).unwrap();
        assert!(out.positions.is_empty());
        assert!(out.stack.iter().all(|&v| v == 0));
        assert_eq!(out.stack.dim(), (4, 2, 3));
    }

    #[test]
    fn laser_past_width_stops_iteration() {
        let stack = coded_stack(6, 2, 10);
        // position = 1 + 4t: 1, 5, 9, 13 -> stop at t = 3.
        let out = reslice_over_time(stack.view(), 4.0, 1.0, 1, 2).unwrap();
        let frames: Vec<i64> = out.positions.iter().map(|p| p.time_frame).collect();
        assert_eq!(frames, vec![0, 1, 2]);
        assert!(out.stack.slice(s![3.., .., ..]).iter().all(|&v| v == 0));
    }

    #[test]
    fn window_wider_than_stack_fails() {
        let stack = coded_stack(2, 4, 10);
        let result = reslice_over_time(stack.view(), 1.0, 1.0, 5, 20);
        assert!(matches!(
            result,
            Err(PipelineError::OversizedWindow { width: 10, .. })
        ));
    }

    #[test]
    fn rounding_is_half_to_even() {
        let stack = coded_stack(4, 1, 20);
        let out = reslice_over_time(stack.view(), 0.5, 0.5, 0, 1).unwrap();
        let positions: Vec<i64> = out.positions.iter().map(|p| p.laser_position).collect();
        // 0.5, 1.0, 1.5, 2.0 -> 0, 1, 2, 2
        assert_eq!(positions, vec![0, 1, 2, 2]);
    }

    #[test]
    fn raises_exactly_on_degenerate_lines() {
        let window_size = 400;
        for &(height, width) in &[(200usize, 2016usize), (184, 1024)] {
            // The outcome does not depend on the number of frames.
            let stack = Array3::<u8>::zeros((3, height, width));
            for &coef in &[-2.0, -0.5, 0.0, 0.1, 3.0] {
                for &intercept in &[-50.0, 0.0, 20.0] {
                    let should_raise = coef == 0.0
                        || (coef > 0.0 && intercept >= height as f64)
                        || (coef < 0.0 && intercept <= 0.0);
                    let result = reslice_over_time(stack.view(), coef, intercept, 80, window_size);
                    assert_eq!(
                        result.is_err(),
                        should_raise,
                        "shape ({height}, {width}), coef {coef}, intercept {intercept}"
                    );
                    if let Ok(out) = result {
                        assert_eq!(out.stack.dim(), (3, height, window_size));
                    }
                }
            }
        }
    }

    #[test]
    fn over_position_copies_full_windows() {
        let stack = coded_stack(10, 2, 30);
        // t = 9 - 0.5 * position reaches frame 0 at position 18.
        let out = reslice_over_position(stack.view(), -0.5, 9.0, 2, 5).unwrap();
        // positions 2..18 (limited by 30 - 5 + 2 = 27 and 18)
        assert_eq!(out.stack.dim(), (16, 2, 5));
        assert_eq!(out.positions.len(), 16);
        let first = out.positions.rows()[0];
        assert_eq!(first.laser_position, 2);
        assert_eq!(first.time_frame, 8);
        assert_eq!(first.window_start, 0);
        assert_eq!(first.window_stop, 5);
        assert_eq!(out.stack.slice(s![0, .., ..]), stack.slice(s![8, .., 0..5]));
    }

    #[test]
    fn over_position_rejects_oversized_window() {
        let stack = coded_stack(10, 2, 30);
        let result = reslice_over_position(stack.view(), -0.5, 9.0, 0, 40);
        assert!(matches!(result, Err(PipelineError::WindowTooLarge)));
    }

    #[test]
    fn over_position_rejects_frames_outside_stack() {
        let stack = coded_stack(4, 2, 30);
        // Frame 0 at position 18, but position 2 maps to frame 8 >= 4.
        let result = reslice_over_position(stack.view(), -0.5, 9.0, 2, 5);
        assert!(matches!(result, Err(PipelineError::DegenerateTrajectory(_))));
    }

    #[test]
    fn dispatch_follows_orientation() {
        let stack = coded_stack(10, 2, 30);
        let config = ResliceConfig {
            window_offset: 2,
            window_size: 5,
        };
        let line = LinearTrajectory::new(-0.5, 9.0, Orientation::TimeOverPosition);
        let out = reslice(stack.view(), &line, &config).unwrap();
        assert_eq!(out.stack.dim().0, 16);
        let line = LinearTrajectory::new(1.0, 1.0, Orientation::PositionOverTime);
        let out = reslice(stack.view(), &line, &config).unwrap();
        assert_eq!(out.stack.dim().0, 10);
    }
}
