//! Pre- and post-ingest processing step descriptors.
//!
//! A descriptor file is a JSON array of steps:
//!
//! ```json
//! [
//!     { "operation": "execute_sql", "sql": "UPDATE jobfact SET processed = 1" }
//! ]
//! ```
//!
//! `execute_sql` is the only operation; an unknown operation makes the whole
//! file invalid.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// A single processing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ProcessingStep {
    /// Execute a literal SQL statement.
    ExecuteSql { sql: String },
}

impl ProcessingStep {
    /// The SQL statement this step executes.
    pub fn statement(&self) -> &str {
        match self {
            ProcessingStep::ExecuteSql { sql } => sql,
        }
    }
}

/// Parse processing steps from the JSON text of a descriptor.
pub fn parse_processing_steps(json: &str) -> std::result::Result<Vec<ProcessingStep>, String> {
    let config: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("Error decoding file: {e}"))?;

    let entries = config
        .as_array()
        .ok_or_else(|| "must be an array of processing steps".to_string())?;

    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let operation = entry
                .get("operation")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| format!("step {idx} has no operation"))?;
            match operation {
                "execute_sql" => serde_json::from_value(entry.clone())
                    .map_err(|e| format!("step {idx} is invalid: {e}")),
                other => Err(format!("Unknown operation: {other}")),
            }
        })
        .collect()
}

/// Load processing steps from a descriptor file.
///
/// A missing file is an error; use an empty array when no processing is
/// needed.
pub fn load_processing_steps(path: impl AsRef<Path>) -> Result<Vec<ProcessingStep>> {
    let path = path.as_ref();
    let step_file_error = |message: String| IngestError::StepFile {
        path: path.to_path_buf(),
        message,
    };

    if !path.is_file() {
        return Err(step_file_error(
            "file is missing. If no processing is needed, use an empty array.".to_string(),
        ));
    }

    let contents =
        fs::read_to_string(path).map_err(|e| step_file_error(format!("Error opening file: {e}")))?;

    parse_processing_steps(&contents).map_err(step_file_error)
}

/// Load a descriptor file and return the SQL statements it contains, in order.
pub fn load_processing_statements(path: impl AsRef<Path>) -> Result<Vec<String>> {
    Ok(load_processing_steps(path)?
        .iter()
        .map(|step| step.statement().to_string())
        .collect())
}
