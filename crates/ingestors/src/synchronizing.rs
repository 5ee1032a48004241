//! Append-only synchronization: inserts only source rows whose unique key is
//! not yet present in the destination. Never deletes.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ingest_core::{
    Database, IngestError, IngestLogger, IngestOutcome, IngestSummary, Ingestor, NullLogger,
    Result, Row,
};

use crate::sql::insert_statement;

/// Characters stripped from both ends of a key value.
const KEY_TRIM: &[char] = &[' ', '\t', '\n', '\r', '\0', '\x0B'];

/// Uniqueness key of `row` over `columns`.
///
/// Values are trimmed and lowercased since MySQL compares strings without
/// regard to trailing spaces and, under the default collations, case.
/// Hyphens inside values are escaped so that the `-` separator stays
/// unambiguous.
pub fn unique_key(row: &Row, columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| {
            let value = row.get(column).map(|v| v.to_text()).unwrap_or_default();
            value
                .trim_matches(KEY_TRIM)
                .to_lowercase()
                .replace('-', "\\-")
        })
        .collect::<Vec<_>>()
        .join("-")
}

pub struct SynchronizingIngestor {
    destination: Box<dyn Database>,
    source: Box<dyn Database>,
    query: String,
    table: String,
    unique_columns: Vec<String>,
    columns: Vec<String>,
    logger: Arc<dyn IngestLogger>,
}

impl SynchronizingIngestor {
    pub fn new(
        destination: Box<dyn Database>,
        source: Box<dyn Database>,
        query: impl Into<String>,
        table: impl Into<String>,
        unique_columns: Vec<String>,
        columns: Vec<String>,
    ) -> Result<Self> {
        if unique_columns.is_empty() {
            return Err(IngestError::config("At least one unique column is required."));
        }
        if let Some(missing) = unique_columns.iter().find(|c| !columns.contains(c)) {
            return Err(IngestError::config(format!(
                "'{missing}' must be in the column list."
            )));
        }

        Ok(Self {
            destination,
            source,
            query: query.into(),
            table: table.into(),
            unique_columns,
            columns,
            logger: Arc::new(NullLogger),
        })
    }

    async fn destination_keys(&mut self) -> Result<HashSet<String>> {
        let sql = format!(
            "SELECT {} FROM {}",
            self.unique_columns.join(", "),
            self.table
        );
        self.logger.debug(&format!("Unique key query: {sql}"));

        let rows = self.destination.query(&sql, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| unique_key(row, &self.unique_columns))
            .collect())
    }
}

#[async_trait]
impl Ingestor for SynchronizingIngestor {
    fn name(&self) -> &str {
        "SynchronizingIngestor"
    }

    fn set_logger(&mut self, logger: Arc<dyn IngestLogger>) {
        self.logger = logger;
    }

    async fn ingest(&mut self) -> Result<IngestOutcome> {
        let class = self.name().to_string();
        self.logger
            .info(&format!("Started ingestion for class: {class}"));
        let start_time = Utc::now();

        self.logger.debug(&format!("Source query: {}", self.query));
        let rows = self.source.query(&self.query, &[]).await?;

        let insert_sql = insert_statement(&self.table, &self.columns);
        self.logger.debug(&format!("Insert statement: {insert_sql}"));

        let mut keys = self.destination_keys().await?;

        let mut examined = 0;
        let mut loaded = 0;

        for row in &rows {
            examined += 1;

            let key = unique_key(row, &self.unique_columns);
            if keys.contains(&key) {
                self.logger
                    .debug(&format!("Skipping row: {}", row.to_json()));
                continue;
            }

            let params = row.project(&self.columns);
            self.logger.debug(&format!(
                "Inserting: {}",
                serde_json::Value::Array(params.iter().map(|v| v.to_json()).collect())
            ));
            self.destination.execute(&insert_sql, &params).await?;
            keys.insert(key);
            loaded += 1;
        }

        let summary = IngestSummary::new(class, start_time, examined, loaded);
        summary.log(self.logger.as_ref());

        Ok(IngestOutcome::Completed(summary))
    }
}
