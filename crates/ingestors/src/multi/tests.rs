use std::sync::Arc;

use ingest_core::testing::{FakeDatabase, MemoryLogger};
use ingest_core::{AbortStage, DbError, IngestOutcome, Ingestor, LogLevel, Row, Value};

use super::*;

const QUERY: &str = "SELECT id, val FROM src";
const COUNT: &str = "SELECT COUNT(*) AS row_count FROM src";
const TABLE: &str = "modw.t";

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}

fn source_rows(n: i64) -> Vec<Row> {
    (1..=n)
        .map(|i| Row::new().with("id", i).with("val", format!("v{i}")))
        .collect()
}

fn options() -> MultiIngestorOptions {
    MultiIngestorOptions::new(QUERY, TABLE, columns(&["id", "val"]))
}

fn ingestor(
    destination: &FakeDatabase,
    source: &FakeDatabase,
    options: MultiIngestorOptions,
) -> (MultiIngestor, MemoryLogger) {
    let logger = MemoryLogger::new();
    let mut ingestor = MultiIngestor::new(
        Box::new(destination.clone()),
        Box::new(source.clone()),
        options,
    );
    ingestor.set_logger(Arc::new(logger.clone()));
    (ingestor, logger)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

#[tokio::test]
async fn test_rows_reach_destination_through_bulk_load() {
    let source = FakeDatabase::new().with_table(
        "src",
        vec![
            Row::new().with("id", 1i64).with("val", "x"),
            Row::new().with("id", 2i64).with("val", "y\\z"),
        ],
    );
    let destination = FakeDatabase::new();
    let (mut ingestor, _) = ingestor(&destination, &source, options());

    let outcome = ingestor.ingest().await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.records_examined(), 2);
    assert_eq!(outcome.records_loaded(), 2);

    let table = destination.table(TABLE);
    assert_eq!(table.len(), 2);
    assert_eq!(table[0].get("val"), Some(&text("x")));
    assert_eq!(table[1].get("id"), Some(&text("2")));
    assert_eq!(table[1].get("val"), Some(&text("y\\z")));

    let loads = destination.bulk_loads();
    assert_eq!(loads.len(), 1);
    assert!(loads[0]
        .statement
        .starts_with("LOAD DATA LOCAL INFILE '"));
    assert!(loads[0].statement.ends_with(
        "REPLACE INTO TABLE modw.t FIELDS TERMINATED BY 0x1e OPTIONALLY ENCLOSED BY 0x1f \
         LINES TERMINATED BY 0x1d (id,val)"
    ));
    assert!(!loads[0].file.exists());
}

#[tokio::test]
async fn test_statement_order_on_destination() {
    let source = FakeDatabase::new().with_table("src", source_rows(1));
    let destination = FakeDatabase::new();
    let (mut ingestor, _) = ingestor(
        &destination,
        &source,
        options().with_post_steps(vec!["UPDATE modw.t SET val = 'done'".to_string()]),
    );

    ingestor.ingest().await.unwrap();

    let statements = destination.statements();
    assert_eq!(statements[0], "SET FOREIGN_KEY_CHECKS = 0");
    assert_eq!(statements[1], "TRUNCATE TABLE modw.t");
    assert!(statements[2].starts_with("LOAD DATA LOCAL INFILE"));
    assert_eq!(statements[3], "UPDATE modw.t SET val = 'done'");
    assert_eq!(statements[4], "SET FOREIGN_KEY_CHECKS = 1");
    assert_eq!(statements[5], "ANALYZE TABLE modw.t");
    assert_eq!(statements.len(), 6);
}

#[tokio::test]
async fn test_empty_source_skips_load_but_runs_post_steps() {
    let source =
        FakeDatabase::new().on_query(COUNT, vec![Row::new().with("row_count", 0i64)]);
    let destination = FakeDatabase::new();
    let (mut ingestor, logger) = ingestor(
        &destination,
        &source,
        options()
            .with_count_query(Some(COUNT.to_string()))
            .with_post_steps(vec!["UPDATE modw.t SET val = 'done'".to_string()]),
    );

    let outcome = ingestor.ingest().await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.records_examined(), 0);
    assert_eq!(outcome.records_loaded(), 0);
    assert!(destination.bulk_loads().is_empty());
    assert!(destination.executed("UPDATE modw.t SET val = 'done'"));
    assert!(!destination.executed("ANALYZE TABLE modw.t"));
    assert_eq!(logger.at_level(LogLevel::Notice).len(), 1);
}

#[tokio::test]
async fn test_count_query_runs_before_data_query() {
    let source = FakeDatabase::new()
        .with_table("src", source_rows(3))
        .on_query(COUNT, vec![Row::new().with("row_count", 3i64)]);
    let destination = FakeDatabase::new();
    let (mut ingestor, logger) = ingestor(
        &destination,
        &source,
        options().with_count_query(Some(COUNT.to_string())),
    );

    let outcome = ingestor.ingest().await.unwrap();

    assert_eq!(source.statements(), vec![COUNT.to_string(), QUERY.to_string()]);
    assert_eq!(outcome.records_examined(), 3);
    assert!(logger.contains("Rows Processed: 3 of 3"));
}

#[tokio::test]
async fn test_count_query_without_row_count_is_fatal() {
    let source = FakeDatabase::new().on_query(COUNT, vec![Row::new().with("n", 3i64)]);
    let destination = FakeDatabase::new();
    let (mut ingestor, _) = ingestor(
        &destination,
        &source,
        options().with_count_query(Some(COUNT.to_string())),
    );

    let err = ingestor.ingest().await.unwrap_err();

    assert!(err.to_string().contains("row_count"));
    assert!(destination.statements().is_empty());
}

#[tokio::test]
async fn test_serialization_failures_are_retried() {
    let source = FakeDatabase::new()
        .with_table("src", source_rows(2))
        .fail(QUERY, DbError::with_state("40001", "Deadlock found"), 2);
    let destination = FakeDatabase::new();
    let (mut ingestor, logger) = ingestor(&destination, &source, options());

    let outcome = ingestor.ingest().await.unwrap();

    assert_eq!(outcome.records_loaded(), 2);
    assert_eq!(source.statements().len(), 3);
    assert!(logger.contains("Query was cancelled by server with error 40001. Retrying 1"));
    assert!(logger.contains("Retrying 2"));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let source = FakeDatabase::new()
        .with_table("src", source_rows(2))
        .fail(QUERY, DbError::with_state("40001", "Deadlock found"), 10);
    let destination = FakeDatabase::new();
    let (mut ingestor, _) = ingestor(&destination, &source, options());

    let err = ingestor.ingest().await.unwrap_err();

    let db_error = err.as_db_error().unwrap();
    assert_eq!(db_error.sql_state.as_deref(), Some("40001"));
    assert_eq!(source.statements().len(), 1 + MAX_QUERY_RETRIES as usize);
    assert!(destination.statements().is_empty());
}

#[tokio::test]
async fn test_other_query_errors_are_not_retried() {
    let source = FakeDatabase::new().fail(
        QUERY,
        DbError::with_state("42S02", "Table 'src' doesn't exist"),
        10,
    );
    let destination = FakeDatabase::new();
    let (mut ingestor, _) = ingestor(&destination, &source, options());

    let err = ingestor.ingest().await.unwrap_err();

    assert!(err.to_string().contains("doesn't exist"));
    assert_eq!(source.statements().len(), 1);
}

#[tokio::test]
async fn test_nodelete_keeps_existing_rows() {
    let source = FakeDatabase::new().with_table("src", source_rows(1));
    let destination =
        FakeDatabase::new().with_table(TABLE, vec![Row::new().with("id", 99i64)]);
    let (mut ingestor, _) = ingestor(
        &destination,
        &source,
        options().with_delete_statement(Some("nodelete")),
    );

    ingestor.ingest().await.unwrap();

    assert_eq!(destination.table(TABLE).len(), 2);
    assert!(!destination
        .statements()
        .iter()
        .any(|s| s.starts_with("TRUNCATE") || s.starts_with("DELETE")));
}

#[tokio::test]
async fn test_custom_delete_statement_replaces_truncate() {
    let delete = "DELETE FROM modw.t WHERE resource_id = 4";
    let source = FakeDatabase::new().with_table("src", source_rows(1));
    let destination = FakeDatabase::new();
    let (mut ingestor, _) = ingestor(
        &destination,
        &source,
        options().with_delete_statement(Some(delete)),
    );

    ingestor.ingest().await.unwrap();

    assert_eq!(destination.statements()[1], delete);
    assert!(!destination.executed("TRUNCATE TABLE modw.t"));
}

#[tokio::test]
async fn test_bulk_load_failure_aborts_before_post_steps() {
    let source = FakeDatabase::new().with_table("src", source_rows(2));
    let destination =
        FakeDatabase::new().fail_prefix("LOAD DATA", DbError::new("The used command is not allowed"));
    let (mut ingestor, logger) = ingestor(
        &destination,
        &source,
        options().with_post_steps(vec!["UPDATE modw.t SET val = 'done'".to_string()]),
    );

    let outcome = ingestor.ingest().await.unwrap();

    match outcome {
        IngestOutcome::Aborted(run) => {
            assert_eq!(run.stage, AbortStage::BulkLoad);
            assert!(run.statement.starts_with("LOAD DATA LOCAL INFILE"));
            assert_eq!(run.error, "The used command is not allowed");
            assert_eq!(run.records_loaded, 0);
        }
        other => panic!("expected aborted run, got {other:?}"),
    }
    assert!(!destination.executed("UPDATE modw.t SET val = 'done'"));
    assert!(!destination.executed("SET FOREIGN_KEY_CHECKS = 1"));
    assert_eq!(logger.at_level(LogLevel::Error).len(), 1);
    assert!(logger.at_level(LogLevel::Notice).is_empty());
}

#[tokio::test]
async fn test_post_step_failure_aborts() {
    let post_step = "UPDATE modw.t SET val = 'done'";
    let source = FakeDatabase::new().with_table("src", source_rows(2));
    let destination = FakeDatabase::new().fail(post_step, DbError::new("syntax error"), 1);
    let (mut ingestor, logger) = ingestor(
        &destination,
        &source,
        options().with_post_steps(vec![
            post_step.to_string(),
            "UPDATE modw.t SET val = 'never'".to_string(),
        ]),
    );

    let outcome = ingestor.ingest().await.unwrap();

    match outcome {
        IngestOutcome::Aborted(run) => {
            assert_eq!(run.stage, AbortStage::PostStep);
            assert_eq!(run.statement, post_step);
            assert_eq!(run.records_loaded, 2);
        }
        other => panic!("expected aborted run, got {other:?}"),
    }
    // Loaded batches stay loaded.
    assert_eq!(destination.table(TABLE).len(), 2);
    assert!(!destination.executed("UPDATE modw.t SET val = 'never'"));
    let errors = logger.at_level(LogLevel::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].context["sql"], post_step);
}

#[tokio::test]
async fn test_pre_step_failure_is_swallowed() {
    let failing = "SET SESSION innodb_lock_wait_timeout = 5";
    let source = FakeDatabase::new()
        .with_table("src", source_rows(1))
        .fail(failing, DbError::new("access denied"), 1);
    let destination = FakeDatabase::new();
    let (mut ingestor, logger) = ingestor(
        &destination,
        &source,
        options().with_pre_steps(vec![
            failing.to_string(),
            "SET SESSION group_concat_max_len = 1048576".to_string(),
        ]),
    );

    let outcome = ingestor.ingest().await.unwrap();

    assert!(outcome.is_completed());
    assert!(source.executed("SET SESSION group_concat_max_len = 1048576"));
    let info = logger.at_level(LogLevel::Info);
    assert!(info
        .iter()
        .any(|r| r.message.contains("Pre ingest update failed") && r.context["sql"] == failing));
    assert!(logger.at_level(LogLevel::Error).is_empty());
}

#[tokio::test]
async fn test_rows_are_loaded_in_batches() {
    let source = FakeDatabase::new().with_table(
        "src",
        (1i64..=5).map(|i| Row::new().with("order_id", 100 + i).with("val", format!("v{i}"))).collect(),
    );
    let destination = FakeDatabase::new();
    let (mut ingestor, logger) = ingestor(
        &destination,
        &source,
        MultiIngestorOptions::new(
            "SELECT order_id, val FROM src",
            TABLE,
            columns(&["order_id", "val"]),
        )
        .with_load_every_rows(2)
        .with_progress_every_rows(2),
    );

    let outcome = ingestor.ingest().await.unwrap();

    assert_eq!(outcome.records_loaded(), 5);
    let loads = destination.bulk_loads();
    let sizes: Vec<usize> = loads.iter().map(|load| load.records.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_ne!(loads[0].file, loads[1].file);

    // order_id is the zero-based stream position, not the source value.
    let table = destination.table(TABLE);
    let ordinals: Vec<Value> = table.iter().filter_map(|r| r.get("order_id").cloned()).collect();
    assert_eq!(ordinals, vec![text("0"), text("1"), text("2"), text("3"), text("4")]);

    assert!(logger.contains("Rows Written to File: 2 of 5"));
    assert!(logger.contains("Rows Written to File: 4 of 5"));
}

#[tokio::test]
async fn test_remainder_is_loaded_without_known_total() {
    let source = FakeDatabase::new().with_table("src", source_rows(3));
    source.clone().set_buffered_queries(false);
    let destination = FakeDatabase::new();
    let (mut ingestor, logger) = ingestor(&destination, &source, options().with_load_every_rows(2));

    let outcome = ingestor.ingest().await.unwrap();

    let sizes: Vec<usize> = destination
        .bulk_loads()
        .iter()
        .map(|load| load.records.len())
        .collect();
    assert_eq!(sizes, vec![2, 1]);
    assert_eq!(outcome.records_examined(), 3);
    assert!(logger.contains("Rows Processed: 3 of unknown"));
}

#[tokio::test]
async fn test_character_set_clause_for_xras_ingestors() {
    let source = FakeDatabase::new().with_table("src", source_rows(1));
    let destination = FakeDatabase::new();
    let (mut ingestor, _) = ingestor(
        &destination,
        &source,
        options().with_name("XRASAllocationIngestor"),
    );

    ingestor.ingest().await.unwrap();

    let statement = &destination.bulk_loads()[0].statement;
    assert!(statement.contains("REPLACE INTO TABLE modw.t CHARACTER SET 'utf8mb4' FIELDS"));
    assert_eq!(destination.table(TABLE).len(), 1);
}

#[test]
fn test_character_set_derivation() {
    assert_eq!(options().load_character_set(), None);
    assert_eq!(
        options().with_name("XRASResourceIngestor").load_character_set(),
        Some("utf8mb4")
    );
    assert_eq!(
        options()
            .with_character_set(Some("latin1".to_string()))
            .load_character_set(),
        Some("latin1")
    );
}

#[tokio::test]
async fn test_non_mysql_destination_aborts_at_first_load() {
    let source = FakeDatabase::new().with_table("src", source_rows(1));
    let destination = FakeDatabase::new().with_engine("pgsql");
    let (mut ingestor, logger) = ingestor(&destination, &source, options());

    let outcome = ingestor.ingest().await.unwrap();

    match outcome {
        IngestOutcome::Aborted(run) => {
            assert_eq!(run.stage, AbortStage::BulkLoad);
            assert!(run.error.contains("pgsql was passed"));
        }
        other => panic!("expected aborted run, got {other:?}"),
    }
    assert!(destination.bulk_loads().is_empty());
    assert!(logger.contains("Unsupported operation"));
}

#[tokio::test]
async fn test_summary_notice() {
    let source = FakeDatabase::new().with_table("src", source_rows(2));
    let destination = FakeDatabase::new();
    let (mut ingestor, logger) = ingestor(
        &destination,
        &source,
        options().with_name("JobsIngestor"),
    );

    ingestor.ingest().await.unwrap();

    let notices = logger.at_level(LogLevel::Notice);
    assert_eq!(notices.len(), 1);
    let context = &notices[0].context;
    assert_eq!(context["message"], "Finished ingestion");
    assert_eq!(context["class"], "JobsIngestor");
    assert_eq!(context["records_examined"], 2);
    assert_eq!(context["records_loaded"], 2);
    assert!(context["start_time"].is_string());
    assert!(context["end_time"].is_string());
}

#[test]
fn test_load_statement_format() {
    let statement = load_statement(
        std::path::Path::new("/tmp/modw.t.data.3306.abc"),
        "modw.t",
        None,
        &columns(&["a", "b"]),
    );
    assert_eq!(
        statement,
        "LOAD DATA LOCAL INFILE '/tmp/modw.t.data.3306.abc' REPLACE INTO TABLE modw.t \
         FIELDS TERMINATED BY 0x1e OPTIONALLY ENCLOSED BY 0x1f LINES TERMINATED BY 0x1d (a,b)"
    );
}

#[test]
fn test_load_statement_escapes_file_path() {
    let statement = load_statement(
        std::path::Path::new("/tmp/o'brien\\stage/modw.t.data.3306.abc"),
        "modw.t",
        None,
        &columns(&["a"]),
    );
    assert!(statement.starts_with(
        "LOAD DATA LOCAL INFILE '/tmp/o\\'brien\\\\stage/modw.t.data.3306.abc' REPLACE"
    ));
}
