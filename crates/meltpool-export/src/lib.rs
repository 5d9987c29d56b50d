//! meltpool-export: Pure format serializers (sans-IO)
//!
//! Converts pipeline outputs into exchange formats. Currently supports
//! the window position log as CSV or JSON records, and line annotations
//! as JSON.

pub mod csv;
pub mod json;

pub use csv::{from_csv, to_csv};
pub use json::{annotations_to_json, positions_to_json};

/// Errors raised while reading or writing export formats.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The CSV text has no header line.
    #[error("position log is empty")]
    MissingHeader,

    /// The CSV header does not name the expected columns.
    #[error("unexpected position log header: {0:?}")]
    UnexpectedHeader(String),

    /// A CSV data row could not be parsed.
    #[error("line {line}: {reason}")]
    MalformedRow {
        /// One-based line number in the input text.
        line: usize,
        /// What was wrong with the row.
        reason: String,
    },

    /// JSON encoding failed.
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
