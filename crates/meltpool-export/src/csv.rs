//! Window position log as comma-separated values.
//!
//! One header line followed by one row per retained frame:
//!
//! ```text
//! Time frame,Laser position,Window start,Window stop
//! 0,150,130,180
//! ```
//!
//! This is the table a host writes next to the resliced stack so the
//! window geometry can be reloaded later.

use std::fmt::Write;

use meltpool_pipeline::{WindowPosition, WindowPositions};

use crate::ExportError;

/// Column names, in order.
pub const HEADER: [&str; 4] = ["Time frame", "Laser position", "Window start", "Window stop"];

/// Serialize a position log into CSV text.
///
/// # Examples
///
/// ```
/// use meltpool_pipeline::{WindowPosition, WindowPositions};
/// use meltpool_export::to_csv;
///
/// let mut log = WindowPositions::new();
/// log.push(WindowPosition { time_frame: 0, laser_position: 150, window_start: 130, window_stop: 180 });
/// let csv = to_csv(&log);
/// assert!(csv.starts_with("Time frame,Laser position,Window start,Window stop\n"));
/// assert!(csv.ends_with("0,150,130,180\n"));
/// ```
#[must_use]
pub fn to_csv(positions: &WindowPositions) -> String {
    let mut out = HEADER.join(",");
    out.push('\n');
    for row in positions {
        let _ = writeln!(
            out,
            "{},{},{},{}",
            row.time_frame, row.laser_position, row.window_start, row.window_stop
        );
    }
    out
}

/// Parse CSV text written by [`to_csv`].
///
/// Blank lines are skipped. Surrounding whitespace in cells is ignored.
///
/// # Errors
///
/// Returns [`ExportError::MissingHeader`] for empty input,
/// [`ExportError::UnexpectedHeader`] if the header differs from
/// [`HEADER`], and [`ExportError::MalformedRow`] for rows without four
/// integer cells.
pub fn from_csv(text: &str) -> Result<WindowPositions, ExportError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines.next().ok_or(ExportError::MissingHeader)?;
    let names: Vec<&str> = header.split(',').map(str::trim).collect();
    if names != HEADER {
        return Err(ExportError::UnexpectedHeader(header.to_string()));
    }

    let mut positions = WindowPositions::new();
    for (index, line) in lines {
        let cells = line
            .split(',')
            .map(|cell| cell.trim().parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ExportError::MalformedRow {
                line: index + 1,
                reason: e.to_string(),
            })?;
        let [time_frame, laser_position, window_start, window_stop] = cells[..] else {
            return Err(ExportError::MalformedRow {
                line: index + 1,
                reason: format!("expected 4 cells, found {}", cells.len()),
            });
        };
        positions.push(WindowPosition {
            time_frame,
            laser_position,
            window_start,
            window_stop,
        });
    }
    Ok(positions)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> WindowPositions {
        let mut log = WindowPositions::new();
        log.push(WindowPosition {
            time_frame: 3,
            laser_position: -2,
            window_start: 0,
            window_stop: 18,
        });
        log.push(WindowPosition {
            time_frame: 4,
            laser_position: 1,
            window_start: 0,
            window_stop: 21,
        });
        log
    }

    #[test]
    fn empty_log_is_header_only() {
        assert_eq!(
            to_csv(&WindowPositions::new()),
            "Time frame,Laser position,Window start,Window stop\n"
        );
    }

    #[test]
    fn rows_follow_log_order() {
        let csv = to_csv(&sample());
        let rows: Vec<&str> = csv.lines().skip(1).collect();
        assert_eq!(rows, vec!["3,-2,0,18", "4,1,0,21"]);
    }

    #[test]
    fn parse_reads_back_written_log() {
        assert_eq!(from_csv(&to_csv(&sample())).unwrap(), sample());
    }

    #[test]
    fn parse_tolerates_whitespace_and_blank_lines() {
        let text = "Time frame, Laser position, Window start, Window stop\n\n 3, -2, 0, 18 \n";
        let log = from_csv(text).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.rows()[0].laser_position, -2);
    }

    #[test]
    fn empty_text_has_no_header() {
        assert!(matches!(from_csv(""), Err(ExportError::MissingHeader)));
    }

    #[test]
    fn wrong_header_is_rejected() {
        let err = from_csv("t,x,start,stop\n").unwrap_err();
        assert!(matches!(err, ExportError::UnexpectedHeader(_)));
    }

    #[test]
    fn bad_rows_report_line_number() {
        let text = "Time frame,Laser position,Window start,Window stop\n1,2,3,4\n1,2,x,4\n";
        let err = from_csv(text).unwrap_err();
        assert!(matches!(err, ExportError::MalformedRow { line: 3, .. }), "{err}");

        let text = "Time frame,Laser position,Window start,Window stop\n1,2,3\n";
        let err = from_csv(text).unwrap_err();
        assert!(matches!(err, ExportError::MalformedRow { line: 2, .. }), "{err}");
    }
}
