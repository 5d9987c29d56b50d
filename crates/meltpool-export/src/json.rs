//! JSON serializers.
//!
//! The position log becomes an array of records keyed by the same
//! column names as the CSV export. Line annotations become nested
//! arrays of points, one `[[t, y, x], ...]` entry per line.

use meltpool_pipeline::WindowPositions;
use meltpool_pipeline::types::Array2;

use crate::ExportError;

/// Serialize a position log as an array of JSON records.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if encoding fails.
pub fn positions_to_json(positions: &WindowPositions) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(positions)?)
}

/// Serialize line annotations as nested point arrays.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if encoding fails.
pub fn annotations_to_json(lines: &[Array2<f64>]) -> Result<String, ExportError> {
    let nested: Vec<Vec<Vec<f64>>> = lines
        .iter()
        .map(|line| line.outer_iter().map(|point| point.to_vec()).collect())
        .collect();
    Ok(serde_json::to_string(&nested)?)
}
