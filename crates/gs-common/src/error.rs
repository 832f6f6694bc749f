//! Error types for genostore.

use thiserror::Error;

/// Result type alias for genostore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for genostore.
#[derive(Error, Debug)]
pub enum Error {
    // Row validation errors (10-19)
    /// A row was rejected by a schema-level invariant. Nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),

    // Writer contract errors (20-29)
    /// Wrong or missing columns, or a write against a frozen/finalized object.
    #[error("schema error: {0}")]
    Schema(String),

    // Load errors (30-39)
    #[error("incorrect file format: expected '{expected}', got '{actual}'")]
    Format { expected: String, actual: String },

    #[error("format version {found} too {skew}; current version = {current}")]
    Version {
        found: String,
        current: String,
        skew: &'static str,
    },

    #[error("provenance mismatch for {field}: expected {expected}, got {actual}")]
    Provenance {
        field: &'static str,
        expected: String,
        actual: String,
    },

    // Flush pipeline errors (40-49)
    /// A flush worker failed. The writer and its container must be discarded.
    #[error("flush pipeline failed: {0}")]
    Concurrency(String),

    // Backing store errors (50-59)
    #[error("storage error: {0}")]
    Storage(String),

    // Configuration errors (60-69)
    #[error("configuration error: {0}")]
    Config(String),

    // I/O errors (70-79)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used as the process exit code by the CLI.
    pub fn code(&self) -> u32 {
        match self {
            Error::Validation(_) => 10,
            Error::Schema(_) => 20,
            Error::Format { .. } => 30,
            Error::Version { .. } => 31,
            Error::Provenance { .. } => 32,
            Error::Concurrency(_) => 40,
            Error::Storage(_) => 50,
            Error::Config(_) => 60,
            Error::Io(_) => 70,
            Error::Json(_) => 71,
        }
    }

    /// True for errors raised before any mutation, where the caller may fix
    /// the input and retry the same row.
    pub fn is_row_rejection(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Schema(_))
    }
}
