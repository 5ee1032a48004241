//! Error types for ingestion runs.

use std::path::PathBuf;

use thiserror::Error;

use crate::database::DbError;

/// Fatal errors that abort construction of an ingestor or a run.
///
/// Recoverable failures (per-row inserts, bulk loads, post steps) are not
/// errors; they surface through the logger and [`crate::IngestOutcome`].
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Staging file error at '{}': {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Processing step file '{}': {message}", path.display())]
    StepFile { path: PathBuf, message: String },
}

impl IngestError {
    pub fn config(message: impl Into<String>) -> Self {
        IngestError::Config(message.into())
    }

    /// The underlying database error, if this error came from a handle.
    pub fn as_db_error(&self) -> Option<&DbError> {
        match self {
            IngestError::Database(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
