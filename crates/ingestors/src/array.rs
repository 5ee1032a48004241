//! Loads an already-materialised row set into a destination table.
//!
//! Used for small reference/lookup tables. The whole run is one transaction;
//! a row that fails to insert is logged and skipped, a failing post step
//! rolls everything back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ingest_core::{
    AbortStage, AbortedRun, ClearPolicy, Database, IngestLogger, IngestOutcome, IngestSummary,
    Ingestor, LogLevel, NullLogger, Result, Row,
};
use serde_json::json;

use crate::sql::{insert_statement, DISABLE_FOREIGN_KEY_CHECKS, ENABLE_FOREIGN_KEY_CHECKS};

pub struct ArrayIngestor {
    destination: Box<dyn Database>,
    rows: Vec<Row>,
    table: String,
    columns: Vec<String>,
    post_steps: Vec<String>,
    clear: ClearPolicy,
    count_statement: Option<String>,
    logger: Arc<dyn IngestLogger>,
}

impl ArrayIngestor {
    pub fn new(
        destination: Box<dyn Database>,
        rows: Vec<Row>,
        table: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            destination,
            rows,
            table: table.into(),
            columns,
            post_steps: Vec::new(),
            clear: ClearPolicy::Truncate,
            count_statement: None,
            logger: Arc::new(NullLogger),
        }
    }

    pub fn with_post_steps(mut self, post_steps: Vec<String>) -> Self {
        self.post_steps = post_steps;
        self
    }

    /// See [`ClearPolicy::from_delete_statement`].
    pub fn with_delete_statement(mut self, delete_statement: Option<&str>) -> Self {
        self.clear = ClearPolicy::from_delete_statement(delete_statement);
        self
    }

    /// Statement returning a `row_count` column, reported after the load.
    pub fn with_count_statement(mut self, count_statement: Option<String>) -> Self {
        self.count_statement = count_statement;
        self
    }

    /// Steps that run inside the transaction and must fail it as a whole.
    async fn prepare_destination(&mut self) -> Result<()> {
        self.destination
            .execute(DISABLE_FOREIGN_KEY_CHECKS, &[])
            .await?;

        if let Some(statement) = self.clear.statement(&self.table) {
            self.logger.debug(&format!("Clearing table: {statement}"));
            self.destination.execute(&statement, &[]).await?;
        }
        Ok(())
    }

    /// Report the destination row count, restore FK checks and commit.
    async fn finish_destination(&mut self) -> Result<()> {
        if let Some(count_sql) = &self.count_statement {
            let rows = self.destination.query(count_sql, &[]).await?;
            let count = rows
                .first()
                .and_then(|row| row.get("row_count"))
                .and_then(|value| value.as_u64());
            self.logger.log(
                LogLevel::Debug,
                &format!("Destination row count after load: {count:?}"),
                json!({ "table": self.table, "row_count": count }),
            );
        }

        self.destination
            .execute(ENABLE_FOREIGN_KEY_CHECKS, &[])
            .await?;
        self.destination.commit().await?;
        Ok(())
    }

    /// Roll back the open transaction and turn FK checks back on for the
    /// session. Failures here are logged; the caller reports the original
    /// error.
    async fn abandon_transaction(&mut self) {
        if let Err(e) = self.destination.rollback().await {
            self.logger.error(&format!("Rollback failed: {e}"));
        }
        if let Err(e) = self.destination.execute(ENABLE_FOREIGN_KEY_CHECKS, &[]).await {
            self.logger
                .error(&format!("Failed to re-enable foreign key checks: {e}"));
        }
    }

    async fn insert_rows(&mut self) -> u64 {
        let insert_sql = insert_statement(&self.table, &self.columns);
        self.logger.debug(&format!("Insert statement: {insert_sql}"));

        let mut loaded = 0;
        for row in &self.rows {
            let params = row.project(&self.columns);
            match self.destination.execute(&insert_sql, &params).await {
                Ok(_) => loaded += 1,
                Err(e) => self.logger.log(
                    LogLevel::Error,
                    &format!("Failed to insert row into {}: {e}", self.table),
                    json!({
                        "message": e.to_string(),
                        "sql": insert_sql,
                        "row": row.to_json(),
                    }),
                ),
            }
        }
        loaded
    }
}

#[async_trait]
impl Ingestor for ArrayIngestor {
    fn name(&self) -> &str {
        "ArrayIngestor"
    }

    fn set_logger(&mut self, logger: Arc<dyn IngestLogger>) {
        self.logger = logger;
    }

    async fn ingest(&mut self) -> Result<IngestOutcome> {
        let class = self.name().to_string();
        self.logger
            .info(&format!("Started ingestion for class: {class}"));
        let start_time = Utc::now();
        let examined = self.rows.len() as u64;

        self.destination.begin_transaction().await?;

        if let Err(e) = self.prepare_destination().await {
            self.abandon_transaction().await;
            return Err(e);
        }

        let loaded = self.insert_rows().await;

        for statement in self.post_steps.clone() {
            self.logger
                .debug(&format!("Post ingest update statement: {statement}"));
            if let Err(e) = self.destination.execute(&statement, &[]).await {
                self.logger.log(
                    LogLevel::Error,
                    &format!("Post ingest update failed: {e}"),
                    json!({ "message": e.to_string(), "sql": statement }),
                );
                self.abandon_transaction().await;
                return Ok(IngestOutcome::Aborted(AbortedRun {
                    class,
                    stage: AbortStage::PostStep,
                    statement,
                    error: e.to_string(),
                    records_examined: examined,
                    records_loaded: 0,
                }));
            }
        }

        if let Err(e) = self.finish_destination().await {
            self.abandon_transaction().await;
            return Err(e);
        }

        let summary = IngestSummary::new(class, start_time, examined, loaded);
        self.logger.info(&format!(
            "{}: Rows Processed: {} of {} (Time Taken: {:.2} s)",
            summary.class,
            loaded,
            examined,
            summary.duration_secs()
        ));
        summary.log(self.logger.as_ref());

        Ok(IngestOutcome::Completed(summary))
    }
}
