//! Legacy row-by-row copy.
//!
//! Kept for old pipelines only. There is no transaction and no structured
//! logging; progress goes to standard output.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ingest_core::{Database, IngestLogger, IngestOutcome, IngestSummary, Ingestor, Result};

use crate::sql::insert_statement;

pub struct RowCopyIngestor {
    destination: Box<dyn Database>,
    source: Box<dyn Database>,
    query: String,
    table: String,
    columns: Vec<String>,
}

impl RowCopyIngestor {
    pub fn new(
        destination: Box<dyn Database>,
        source: Box<dyn Database>,
        query: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            destination,
            source,
            query: query.into(),
            table: table.into(),
            columns,
        }
    }
}

#[async_trait]
impl Ingestor for RowCopyIngestor {
    fn name(&self) -> &str {
        "RowCopyIngestor"
    }

    fn set_logger(&mut self, _logger: Arc<dyn IngestLogger>) {}

    async fn ingest(&mut self) -> Result<IngestOutcome> {
        println!("{}: Querying...", self.name());
        let start_time = Utc::now();

        let rows = self.source.query(&self.query, &[]).await?;
        let insert_sql = insert_statement(&self.table, &self.columns);

        let mut affected = 0;
        for row in &rows {
            affected += self
                .destination
                .execute(&insert_sql, &row.project(&self.columns))
                .await?;
        }

        let summary = IngestSummary::new(
            self.name().to_string(),
            start_time,
            rows.len() as u64,
            affected,
        );
        println!(
            "{}: Rows Processed: {} of {} (Time Taken: {:.2} s)",
            summary.class,
            affected,
            summary.records_examined,
            summary.duration_secs()
        );

        Ok(IngestOutcome::Completed(summary))
    }
}
