//! Structured log sink used by ingestors.
//!
//! Ingestors never format or route log output themselves; they hand a
//! message and an optional JSON context to an [`IngestLogger`]. Downstream
//! summarisation relies on the `notice` level "Finished ingestion" record
//! (see [`crate::IngestSummary`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leveled log sink accepting a message and a structured context.
///
/// `context` is `JsonValue::Null` when the caller has nothing to attach,
/// otherwise a JSON object.
pub trait IngestLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, context: JsonValue);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, JsonValue::Null);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, JsonValue::Null);
    }

    fn notice(&self, message: &str) {
        self.log(LogLevel::Notice, message, JsonValue::Null);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message, JsonValue::Null);
    }

    fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message, JsonValue::Null);
    }
}

/// Logger that discards everything. Default sink of every ingestor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl IngestLogger for NullLogger {
    fn log(&self, _level: LogLevel, _message: &str, _context: JsonValue) {}
}

/// Logger that forwards records to `tracing`.
///
/// `tracing` has no notice or critical level: notice records are emitted at
/// INFO with `notice = true`, critical records at ERROR with
/// `critical = true`.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    /// Name of the component emitting the records, attached as `ingestor`.
    component: String,
}

impl TracingLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("warehouse-ingest")
    }
}

impl IngestLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, context: JsonValue) {
        let component = self.component.as_str();
        if context.is_null() {
            match level {
                LogLevel::Debug => tracing::debug!(ingestor = component, "{message}"),
                LogLevel::Info => tracing::info!(ingestor = component, "{message}"),
                LogLevel::Notice => {
                    tracing::info!(ingestor = component, notice = true, "{message}")
                }
                LogLevel::Error => tracing::error!(ingestor = component, "{message}"),
                LogLevel::Critical => {
                    tracing::error!(ingestor = component, critical = true, "{message}")
                }
            }
        } else {
            let context = context.to_string();
            match level {
                LogLevel::Debug => {
                    tracing::debug!(ingestor = component, context = %context, "{message}")
                }
                LogLevel::Info => {
                    tracing::info!(ingestor = component, context = %context, "{message}")
                }
                LogLevel::Notice => tracing::info!(
                    ingestor = component,
                    notice = true,
                    context = %context,
                    "{message}"
                ),
                LogLevel::Error => {
                    tracing::error!(ingestor = component, context = %context, "{message}")
                }
                LogLevel::Critical => tracing::error!(
                    ingestor = component,
                    critical = true,
                    context = %context,
                    "{message}"
                ),
            }
        }
    }
}
