//! Error types for loading and analyzing region tables.

use thiserror::Error;

/// Failures that halt a single view.
///
/// A zero denominator is not an error and never shows up here, and neither
/// does an empty filter result: both are normal outcomes of a view.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Could not decode '{path}' as {encoding}")]
    Decode { path: String, encoding: String },

    #[error("Schema mismatch in '{source_name}' (schema {schema} v{version}): {reason}")]
    SchemaMismatch {
        source_name: String,
        schema: String,
        version: u32,
        reason: String,
    },

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Duplicate region '{region}' in {source_name}")]
    DuplicateRegion { region: String, source_name: String },

    #[error("Region name '{name}' matches several regions: {candidates}")]
    AmbiguousRegion { name: String, candidates: String },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Chart rendering error: {0}")]
    Chart(String),
}

/// Result type alias for table operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;
