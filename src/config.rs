//! YAML job descriptors.
//!
//! ```yaml
//! name: XRASAllocationIngestor
//! kind: multi
//! source_url: mysql://xdmod:secret@db:3306/xras
//! destination_url: mysql://xdmod:secret@db:3306/modw
//! table: modw.allocations
//! columns: [order_id, allocation_id, resource_id, amount]
//! query: SELECT allocation_id, resource_id, amount FROM allocations
//! delete: nodelete
//! post_steps:
//!   sql:
//!     - UPDATE modw.allocations SET amount = 0 WHERE amount < 0
//!   files:
//!     - steps/allocations-post.json
//! ```
//!
//! Relative step and row file paths are resolved against the directory of
//! the job file.

use std::fs;
use std::path::{Path, PathBuf};

use ingest_core::{load_processing_statements, IngestError, Row};
use serde::Deserialize;
use thiserror::Error;

/// Error type for job descriptors.
#[derive(Debug, Error)]
pub enum JobConfigError {
    #[error("Failed to read job file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("'{field}' is required for {kind} jobs")]
    MissingField { kind: IngestorKind, field: &'static str },

    #[error(transparent)]
    Steps(#[from] IngestError),

    #[error("Rows file '{}': {message}", path.display())]
    RowsFile { path: PathBuf, message: String },
}

/// Which ingestor runs the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestorKind {
    Multi,
    Unbuffered,
    Synchronizing,
    RowCopy,
    Array,
}

impl IngestorKind {
    pub fn needs_source(&self) -> bool {
        !matches!(self, IngestorKind::Array)
    }

    /// Class name reported when the job does not set one.
    pub fn default_name(&self) -> &'static str {
        match self {
            IngestorKind::Multi => "MultiIngestor",
            IngestorKind::Unbuffered => "UnbufferedMultiIngestor",
            IngestorKind::Synchronizing => "SynchronizingIngestor",
            IngestorKind::RowCopy => "RowCopyIngestor",
            IngestorKind::Array => "ArrayIngestor",
        }
    }
}

impl std::fmt::Display for IngestorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            IngestorKind::Multi => "multi",
            IngestorKind::Unbuffered => "unbuffered",
            IngestorKind::Synchronizing => "synchronizing",
            IngestorKind::RowCopy => "row-copy",
            IngestorKind::Array => "array",
        };
        f.write_str(kind)
    }
}

/// Inline statements followed by statements from descriptor files.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepList {
    #[serde(default)]
    pub sql: Vec<String>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl StepList {
    /// All statements, in order.
    pub fn statements(&self) -> Result<Vec<String>, JobConfigError> {
        let mut statements = self.sql.clone();
        for file in &self.files {
            statements.extend(load_processing_statements(file)?);
        }
        Ok(statements)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for file in &mut self.files {
            *file = resolve(base, file);
        }
    }
}

fn default_load_every_rows() -> u64 {
    ingestors::multi::DEFAULT_LOAD_EVERY_ROWS
}

fn default_progress_every_rows() -> u64 {
    ingestors::multi::DEFAULT_PROGRESS_EVERY_ROWS
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// One ingestion job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Class name used in log records and summaries.
    #[serde(default)]
    pub name: Option<String>,
    pub kind: IngestorKind,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub destination_url: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub count_query: Option<String>,
    /// Omitted: truncate. `nodelete`: keep rows. Anything else: run as is.
    #[serde(default)]
    pub delete: Option<String>,
    #[serde(default)]
    pub pre_steps: StepList,
    #[serde(default)]
    pub post_steps: StepList,
    #[serde(default)]
    pub unique_columns: Vec<String>,
    #[serde(default = "default_load_every_rows")]
    pub load_every_rows: u64,
    #[serde(default = "default_progress_every_rows")]
    pub progress_every_rows: u64,
    #[serde(default)]
    pub character_set: Option<String>,
    /// JSON array of row objects, for `array` jobs.
    #[serde(default)]
    pub rows_file: Option<PathBuf>,
    /// Compare the table with its `_backup` copy after the run.
    #[serde(default)]
    pub check_changes: bool,
}

impl JobConfig {
    /// Load a job from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, JobConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse a job from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, JobConfigError> {
        let config: JobConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), JobConfigError> {
        let missing = |field| JobConfigError::MissingField {
            kind: self.kind,
            field,
        };

        match self.kind {
            IngestorKind::Array => {
                if self.rows_file.is_none() {
                    return Err(missing("rows_file"));
                }
            }
            _ => {
                if self.query.is_none() {
                    return Err(missing("query"));
                }
            }
        }
        if self.kind == IngestorKind::Synchronizing && self.unique_columns.is_empty() {
            return Err(missing("unique_columns"));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        self.pre_steps.resolve_paths(base);
        self.post_steps.resolve_paths(base);
        if let Some(rows_file) = &self.rows_file {
            self.rows_file = Some(resolve(base, rows_file));
        }
    }

    pub fn name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.kind.default_name())
    }

    /// The data query. Validation guarantees it for every kind except
    /// `array`.
    pub fn query(&self) -> &str {
        self.query.as_deref().unwrap_or_default()
    }

    /// Load the rows of an `array` job.
    pub fn load_rows(&self) -> Result<Vec<Row>, JobConfigError> {
        let Some(path) = &self.rows_file else {
            return Err(JobConfigError::MissingField {
                kind: self.kind,
                field: "rows_file",
            });
        };
        let rows_file_error = |message: String| JobConfigError::RowsFile {
            path: path.clone(),
            message,
        };

        let content = fs::read_to_string(path).map_err(|e| rows_file_error(e.to_string()))?;
        let json: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| rows_file_error(e.to_string()))?;
        let entries = json
            .as_array()
            .ok_or_else(|| rows_file_error("must be an array of objects".to_string()))?;

        entries
            .iter()
            .map(|entry| {
                entry
                    .as_object()
                    .map(Row::from_json_object)
                    .ok_or_else(|| rows_file_error("must be an array of objects".to_string()))
            })
            .collect()
    }
}
