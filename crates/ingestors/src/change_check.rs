//! Post-load consistency check against a `<table>_backup` snapshot.
//!
//! Every row of the backup whose primary key no longer exists in the live
//! table is reported as a `critical` record. Findings are never errors.

use ingest_core::{Database, IngestLogger, LogLevel, Result, TableName, Value};
use serde::Serialize;
use serde_json::json;

const PRIMARY_KEY_QUERY: &str = "SELECT COLUMN_NAME FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND COLUMN_KEY = 'PRI'";

/// Result of [`check_for_changes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeCheck {
    /// The table has no primary key.
    Skipped,
    Checked { missing: u64 },
}

/// `SELECT b.* FROM t_backup b LEFT OUTER JOIN t c ON (...) WHERE c.<key> IS NULL`
pub(crate) fn missing_rows_statement(table: &str, primary_keys: &[String]) -> Option<String> {
    let first = primary_keys.first()?;
    let join = primary_keys
        .iter()
        .map(|key| format!("b.{key} = c.{key}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    Some(format!(
        "SELECT b.* FROM {table}_backup b LEFT OUTER JOIN {table} c ON ({join}) WHERE c.{first} IS NULL"
    ))
}

pub async fn check_for_changes(
    destination: &mut dyn Database,
    table: &str,
    class: &str,
    logger: &dyn IngestLogger,
) -> Result<ChangeCheck> {
    let name = TableName::parse(table);
    let schema = name.schema_or(destination.database_name()).to_string();

    let key_rows = destination
        .query(
            PRIMARY_KEY_QUERY,
            &[Value::from(schema), Value::from(name.table.as_str())],
        )
        .await?;
    let primary_keys: Vec<String> = key_rows
        .iter()
        .filter_map(|row| row.get("COLUMN_NAME"))
        .map(|value| value.to_text().into_owned())
        .collect();

    let Some(statement) = missing_rows_statement(table, &primary_keys) else {
        logger.info(&format!(
            "no primary keys defined for {table}. Change check not run."
        ));
        return Ok(ChangeCheck::Skipped);
    };

    let missing_rows = destination.query(&statement, &[]).await?;
    for row in &missing_rows {
        logger.log(
            LogLevel::Critical,
            "Missing row",
            json!({
                "message": "Missing row",
                "rowdata": row.to_json(),
                "class": class,
            }),
        );
    }

    if missing_rows.is_empty() {
        logger.info(&format!("data consistency check passed for {table}"));
    }

    Ok(ChangeCheck::Checked {
        missing: missing_rows.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::testing::{FakeDatabase, MemoryLogger};
    use ingest_core::Row;

    fn key_rows(keys: &[&str]) -> Vec<Row> {
        keys.iter()
            .map(|key| Row::new().with("COLUMN_NAME", *key))
            .collect()
    }

    #[test]
    fn test_missing_rows_statement() {
        let keys = vec!["resource_id".to_string(), "day_id".to_string()];
        assert_eq!(
            missing_rows_statement("modw.resourcespecs", &keys).unwrap(),
            "SELECT b.* FROM modw.resourcespecs_backup b LEFT OUTER JOIN modw.resourcespecs c \
             ON (b.resource_id = c.resource_id AND b.day_id = c.day_id) WHERE c.resource_id IS NULL"
        );
        assert!(missing_rows_statement("t", &[]).is_none());
    }

    #[tokio::test]
    async fn test_skipped_without_primary_key() {
        let mut destination = FakeDatabase::new();
        let logger = MemoryLogger::new();

        let check = check_for_changes(&mut destination, "modw.t", "MultiIngestor", &logger)
            .await
            .unwrap();

        assert_eq!(check, ChangeCheck::Skipped);
        assert!(logger.contains("no primary keys defined for modw.t"));
        assert_eq!(destination.statements(), vec![PRIMARY_KEY_QUERY.to_string()]);
    }

    #[tokio::test]
    async fn test_missing_rows_are_critical() {
        let statement =
            "SELECT b.* FROM modw.t_backup b LEFT OUTER JOIN modw.t c ON (b.id = c.id) WHERE c.id IS NULL";
        let mut destination = FakeDatabase::new()
            .on_query(PRIMARY_KEY_QUERY, key_rows(&["id"]))
            .on_query(
                statement,
                vec![
                    Row::new().with("id", 4i64).with("val", "gone"),
                    Row::new().with("id", 7i64).with("val", "also gone"),
                ],
            );
        let logger = MemoryLogger::new();

        let check = check_for_changes(&mut destination, "modw.t", "JobsIngestor", &logger)
            .await
            .unwrap();

        assert_eq!(check, ChangeCheck::Checked { missing: 2 });
        let critical = logger.at_level(LogLevel::Critical);
        assert_eq!(critical.len(), 2);
        assert_eq!(critical[0].context["class"], "JobsIngestor");
        assert_eq!(critical[1].context["rowdata"]["id"], 7);
        assert!(!logger.contains("data consistency check passed"));
    }

    #[tokio::test]
    async fn test_clean_table_passes() {
        let mut destination = FakeDatabase::new().on_query(PRIMARY_KEY_QUERY, key_rows(&["id"]));
        let logger = MemoryLogger::new();

        let check = check_for_changes(&mut destination, "t", "MultiIngestor", &logger)
            .await
            .unwrap();

        assert_eq!(check, ChangeCheck::Checked { missing: 0 });
        assert!(logger.contains("data consistency check passed for t"));
        assert!(logger.at_level(LogLevel::Critical).is_empty());
    }
}
