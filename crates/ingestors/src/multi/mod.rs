//! Staged-file multi-row ingestor.
//!
//! The high-throughput engine: rows are streamed from the source cursor into
//! a control-byte delimited staging file which is periodically handed to the
//! destination's `LOAD DATA LOCAL INFILE ... REPLACE` facility, then rotated.
//!
//! ```text
//! pre-steps (source) -> count -> query (retry on 40001)
//!     -> FK checks off -> clear destination
//!     -> [stage rows -> bulk load -> rotate]*
//!     -> post-steps (destination) -> FK checks on -> ANALYZE -> summary
//! ```
//!
//! A failing bulk load or post step stops the run without undoing batches
//! that were already loaded.

pub mod staging;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ingest_core::staging::{FIELD_SEPARATOR, LINE_SEPARATOR, STRING_ENCLOSURE};
use ingest_core::{
    AbortStage, AbortedRun, ClearPolicy, Database, IngestError, IngestLogger, IngestOutcome,
    IngestSummary, Ingestor, LogLevel, NullLogger, Result, MYSQL_ENGINE, SERIALIZATION_FAILURE,
};
use serde_json::json;

use crate::change_check::{check_for_changes, ChangeCheck};
use crate::sql::{analyze_statement, DISABLE_FOREIGN_KEY_CHECKS, ENABLE_FOREIGN_KEY_CHECKS};
use staging::{ColumnRule, StagingFile};

/// How many times the data query is retried after a serialization failure.
pub const MAX_QUERY_RETRIES: u32 = 3;

/// Default number of staged rows per bulk load.
pub const DEFAULT_LOAD_EVERY_ROWS: u64 = 250_000;

/// Default interval for "Rows Written to File" progress records.
pub const DEFAULT_PROGRESS_EVERY_ROWS: u64 = 100_000;

/// Ingestor name prefixes whose bulk loads declare the file character set.
pub const CHARACTER_SET_PREFIXES: &[&str] = &["XRAS"];

/// Character set declared for [`CHARACTER_SET_PREFIXES`] ingestors.
pub const DEFAULT_LOAD_CHARACTER_SET: &str = "utf8mb4";

/// What to ingest and where.
#[derive(Debug, Clone)]
pub struct MultiIngestorOptions {
    /// Class name reported in log records and summaries.
    pub name: String,
    /// Statements run against the source before querying. Best effort.
    pub pre_steps: Vec<String>,
    pub query: String,
    /// Statement returning the total row count in a `row_count` column.
    pub count_query: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    /// Statements run against the destination after loading.
    pub post_steps: Vec<String>,
    pub clear: ClearPolicy,
    pub load_every_rows: u64,
    pub progress_every_rows: u64,
    /// Character set for the bulk load; derived from `name` when unset.
    pub character_set: Option<String>,
}

impl MultiIngestorOptions {
    pub fn new(query: impl Into<String>, table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: "MultiIngestor".to_string(),
            pre_steps: Vec::new(),
            query: query.into(),
            count_query: None,
            table: table.into(),
            columns,
            post_steps: Vec::new(),
            clear: ClearPolicy::Truncate,
            load_every_rows: DEFAULT_LOAD_EVERY_ROWS,
            progress_every_rows: DEFAULT_PROGRESS_EVERY_ROWS,
            character_set: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_pre_steps(mut self, pre_steps: Vec<String>) -> Self {
        self.pre_steps = pre_steps;
        self
    }

    pub fn with_post_steps(mut self, post_steps: Vec<String>) -> Self {
        self.post_steps = post_steps;
        self
    }

    pub fn with_count_query(mut self, count_query: Option<String>) -> Self {
        self.count_query = count_query;
        self
    }

    /// See [`ClearPolicy::from_delete_statement`].
    pub fn with_delete_statement(mut self, delete_statement: Option<&str>) -> Self {
        self.clear = ClearPolicy::from_delete_statement(delete_statement);
        self
    }

    pub fn with_load_every_rows(mut self, rows: u64) -> Self {
        self.load_every_rows = rows;
        self
    }

    pub fn with_progress_every_rows(mut self, rows: u64) -> Self {
        self.progress_every_rows = rows;
        self
    }

    pub fn with_character_set(mut self, character_set: Option<String>) -> Self {
        self.character_set = character_set;
        self
    }

    /// Character set clause for the bulk load, if any.
    pub fn load_character_set(&self) -> Option<&str> {
        if let Some(charset) = &self.character_set {
            return Some(charset);
        }
        CHARACTER_SET_PREFIXES
            .iter()
            .any(|prefix| self.name.starts_with(prefix))
            .then_some(DEFAULT_LOAD_CHARACTER_SET)
    }
}

/// Quote `path` as a MySQL string literal body.
fn escape_path_literal(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
}

/// Build the `LOAD DATA` statement for one staging file.
pub fn load_statement(
    file: &Path,
    table: &str,
    character_set: Option<&str>,
    columns: &[String],
) -> String {
    let character_set = character_set
        .map(|charset| format!(" CHARACTER SET '{charset}'"))
        .unwrap_or_default();
    format!(
        "LOAD DATA LOCAL INFILE '{}' REPLACE INTO TABLE {table}{character_set} \
         FIELDS TERMINATED BY 0x{FIELD_SEPARATOR:02x} OPTIONALLY ENCLOSED BY 0x{STRING_ENCLOSURE:02x} \
         LINES TERMINATED BY 0x{LINE_SEPARATOR:02x} ({})",
        escape_path_literal(file),
        columns.join(",")
    )
}

/// A bulk load that did not go through.
struct BatchFailure {
    statement: String,
    error: String,
}

pub struct MultiIngestor {
    destination: Box<dyn Database>,
    source: Box<dyn Database>,
    options: MultiIngestorOptions,
    logger: Arc<dyn IngestLogger>,
}

impl MultiIngestor {
    pub fn new(
        destination: Box<dyn Database>,
        source: Box<dyn Database>,
        options: MultiIngestorOptions,
    ) -> Self {
        Self {
            destination,
            source,
            options,
            logger: Arc::new(NullLogger),
        }
    }

    pub fn options(&self) -> &MultiIngestorOptions {
        &self.options
    }

    pub(crate) fn source_mut(&mut self) -> &mut dyn Database {
        self.source.as_mut()
    }

    /// Compare the destination with its `<table>_backup` snapshot and report
    /// rows that disappeared. Not part of [`Ingestor::ingest`].
    pub async fn check_for_changes(&mut self) -> Result<ChangeCheck> {
        check_for_changes(
            self.destination.as_mut(),
            &self.options.table,
            &self.options.name,
            self.logger.as_ref(),
        )
        .await
    }
}

/// Run the pre-steps; failures are logged and ignored.
async fn run_pre_steps(source: &mut dyn Database, steps: &[String], logger: &dyn IngestLogger) {
    for statement in steps {
        logger.debug(&format!("Pre ingest update statement: {statement}"));
        if let Err(e) = source.execute(statement, &[]).await {
            logger.log(
                LogLevel::Info,
                &format!("Pre ingest update failed: {e}"),
                json!({ "message": e.to_string(), "sql": statement }),
            );
        }
    }
}

async fn query_row_count(
    source: &mut dyn Database,
    count_query: &str,
    logger: &dyn IngestLogger,
) -> Result<u64> {
    logger.debug(&format!("Count query: {count_query}"));
    let rows = source.query(count_query, &[]).await?;
    rows.first()
        .and_then(|row| row.get("row_count"))
        .and_then(|value| value.as_u64())
        .ok_or_else(|| {
            IngestError::config(format!(
                "Count query did not return a row_count column: {count_query}"
            ))
        })
}

async fn load_batch(
    destination: &mut dyn Database,
    staging: &StagingFile,
    options: &MultiIngestorOptions,
    logger: &dyn IngestLogger,
) -> std::result::Result<u64, BatchFailure> {
    let statement = load_statement(
        staging.path(),
        &options.table,
        options.load_character_set(),
        &options.columns,
    );

    if destination.engine() != MYSQL_ENGINE {
        return Err(BatchFailure {
            statement,
            error: format!(
                "{}: Unsupported operation: currently only {MYSQL_ENGINE} is supported as destination db. {} was passed.",
                options.name,
                destination.engine()
            ),
        });
    }

    logger.debug(&format!("Bulk load statement: {statement}"));
    destination
        .bulk_load(&statement, staging.path())
        .await
        .map_err(|e| BatchFailure {
            statement,
            error: e.to_string(),
        })
}

fn describe_total(rows_total: Option<u64>) -> String {
    rows_total
        .map(|total| total.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl Ingestor for MultiIngestor {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn set_logger(&mut self, logger: Arc<dyn IngestLogger>) {
        self.logger = logger;
    }

    async fn ingest(&mut self) -> Result<IngestOutcome> {
        let Self {
            destination,
            source,
            options,
            logger,
        } = self;
        let logger: &dyn IngestLogger = &**logger;
        let class = options.name.clone();

        logger.info(&format!("Started ingestion for class: {class}"));
        let start_time = Utc::now();

        run_pre_steps(&mut **source, &options.pre_steps, logger).await;

        // The count query has to run before the data query: an unbuffered
        // cursor blocks the source connection until it is exhausted.
        let mut rows_total = match &options.count_query {
            Some(count_query) => Some(query_row_count(&mut **source, count_query, logger).await?),
            None => None,
        };

        logger.debug(&format!("Source query: {}", options.query));
        logger.info(&format!("{class}: Querying..."));

        let mut attempts = 0;
        let mut cursor = loop {
            attempts += 1;
            match source.stream(&options.query).await {
                Ok(cursor) => break cursor,
                Err(e) if e.is_serialization_failure() && attempts <= MAX_QUERY_RETRIES => {
                    logger.info(&format!(
                        "{class}: Query was cancelled by server with error {SERIALIZATION_FAILURE}. Retrying {attempts}"
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        };

        if rows_total.is_none() {
            rows_total = cursor.row_count();
        }
        logger.debug(&format!("Row count: {}", describe_total(rows_total)));

        destination.execute(DISABLE_FOREIGN_KEY_CHECKS, &[]).await?;
        match &options.clear {
            ClearPolicy::Truncate => logger.debug(&format!("Truncating table {}", options.table)),
            ClearPolicy::Delete(statement) => {
                logger.debug(&format!("Delete statement: {statement}"))
            }
            ClearPolicy::Keep => {}
        }
        if let Some(statement) = options.clear.statement(&options.table) {
            destination.execute(&statement, &[]).await?;
        }

        let rules = ColumnRule::resolve(&options.columns);
        let load_every = options.load_every_rows.max(1);
        let progress_every = options.progress_every_rows.max(1);
        let port = destination.port();

        let mut staging = StagingFile::create(&options.table, port)?;
        logger.debug(&format!(
            "Using temporary file '{}'",
            staging.path().display()
        ));

        let mut written: u64 = 0;
        let mut loaded: u64 = 0;

        loop {
            let row = cursor.next_row().await?;
            let exhausted = row.is_none();

            if let Some(row) = row {
                staging.write_row(&rules, &row, written)?;
                written += 1;

                if written % progress_every == 0 {
                    logger.info(&format!(
                        "{class}: Rows Written to File: {written} of {}",
                        describe_total(rows_total)
                    ));
                }
            }

            let batch_full = staging.records() > 0
                && (written % load_every == 0 || rows_total == Some(written) || exhausted);

            if batch_full {
                staging.flush()?;
                match load_batch(&mut **destination, &staging, options, logger).await {
                    Ok(_) => loaded += staging.records(),
                    Err(failure) => {
                        logger.log(
                            LogLevel::Error,
                            &format!("Bulk load failed: {}", failure.error),
                            json!({
                                "message": failure.error,
                                "statement": failure.statement,
                                "class": class,
                            }),
                        );
                        return Ok(IngestOutcome::Aborted(AbortedRun {
                            class,
                            stage: AbortStage::BulkLoad,
                            statement: failure.statement,
                            error: failure.error,
                            records_examined: written,
                            records_loaded: loaded,
                        }));
                    }
                }
                if !exhausted {
                    staging = StagingFile::create(&options.table, port)?;
                }
            }

            if exhausted {
                break;
            }
        }
        drop(staging);
        drop(cursor);

        for statement in &options.post_steps {
            logger.debug(&format!("Post ingest update statement: {statement}"));
            if let Err(e) = destination.execute(statement, &[]).await {
                logger.log(
                    LogLevel::Error,
                    &format!("Post ingest update failed: {e}"),
                    json!({ "message": e.to_string(), "sql": statement }),
                );
                return Ok(IngestOutcome::Aborted(AbortedRun {
                    class,
                    stage: AbortStage::PostStep,
                    statement: statement.clone(),
                    error: e.to_string(),
                    records_examined: written,
                    records_loaded: loaded,
                }));
            }
        }

        destination.execute(ENABLE_FOREIGN_KEY_CHECKS, &[]).await?;

        if loaded > 0 {
            logger.debug("Analyzing table");
            destination
                .execute(&analyze_statement(&options.table), &[])
                .await?;
        }

        let summary = IngestSummary::new(
            class,
            start_time,
            rows_total.unwrap_or(written),
            loaded,
        );
        logger.info(&format!(
            "{}: Rows Processed: {} of {} (Time Taken: {:.2} s)",
            summary.class,
            written,
            describe_total(rows_total),
            summary.duration_secs()
        ));
        summary.log(logger);

        Ok(IngestOutcome::Completed(summary))
    }
}

#[cfg(test)]
mod tests;
