//! Typed run reports shared by all ingestors.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logger::{IngestLogger, LogLevel};

/// Message of the summary record consumed by log summarisation.
pub const FINISHED_INGESTION: &str = "Finished ingestion";

/// Row statistics of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub class: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub records_examined: u64,
    pub records_loaded: u64,
}

impl IngestSummary {
    pub fn new(
        class: impl Into<String>,
        start_time: DateTime<Utc>,
        records_examined: u64,
        records_loaded: u64,
    ) -> Self {
        Self {
            class: class.into(),
            start_time,
            end_time: Utc::now(),
            records_examined,
            records_loaded,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    /// Emit the summary record at `notice` level.
    pub fn log(&self, logger: &dyn IngestLogger) {
        logger.log(
            LogLevel::Notice,
            FINISHED_INGESTION,
            serde_json::json!({
                "message": FINISHED_INGESTION,
                "class": self.class,
                "start_time": self.start_time.to_rfc3339(),
                "end_time": self.end_time.to_rfc3339(),
                "records_examined": self.records_examined,
                "records_loaded": self.records_loaded,
            }),
        );
    }
}

/// Step at which a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortStage {
    BulkLoad,
    PostStep,
}

/// A run that stopped after a batch-fatal failure.
///
/// Nothing already committed is rolled back, except inside the array
/// ingestor's single transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbortedRun {
    pub class: String,
    pub stage: AbortStage,
    /// The statement that failed.
    pub statement: String,
    pub error: String,
    pub records_examined: u64,
    pub records_loaded: u64,
}

/// Result of [`crate::Ingestor::ingest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Completed(IngestSummary),
    Aborted(AbortedRun),
}

impl IngestOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, IngestOutcome::Completed(_))
    }

    pub fn summary(&self) -> Option<&IngestSummary> {
        match self {
            IngestOutcome::Completed(summary) => Some(summary),
            IngestOutcome::Aborted(_) => None,
        }
    }

    pub fn records_examined(&self) -> u64 {
        match self {
            IngestOutcome::Completed(s) => s.records_examined,
            IngestOutcome::Aborted(a) => a.records_examined,
        }
    }

    pub fn records_loaded(&self) -> u64 {
        match self {
            IngestOutcome::Completed(s) => s.records_loaded,
            IngestOutcome::Aborted(a) => a.records_loaded,
        }
    }
}
