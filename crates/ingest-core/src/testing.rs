//! Test doubles for ingestion runs.
//!
//! - [`FakeDatabase`] - an in-memory, scriptable [`Database`] that
//!   understands the handful of statements the ingestors issue
//!   (truncate, delete, insert, simple selects, `LOAD DATA`)
//! - [`MemoryLogger`] - an [`IngestLogger`] that records every event
//!
//! Both are cheap to clone and clones share state, so a test can keep a
//! handle after boxing the double into an ingestor.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::database::{Database, DbError, RowCursor, VecCursor, MYSQL_ENGINE};
use crate::logger::{IngestLogger, LogLevel};
use crate::staging::{decode_records, StagedField};
use crate::value::{Row, Value};

// ============================================================================
// MemoryLogger
// ============================================================================

/// A recorded log event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub context: JsonValue,
}

/// Logger that keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogger {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().expect("logger poisoned").clone()
    }

    pub fn at_level(&self, level: LogLevel) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.level == level)
            .collect()
    }

    /// True if any record's message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.records().iter().any(|r| r.message.contains(needle))
    }
}

impl IngestLogger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str, context: JsonValue) {
        self.records
            .lock()
            .expect("logger poisoned")
            .push(LogRecord {
                level,
                message: message.to_string(),
                context,
            });
    }
}

// ============================================================================
// FakeDatabase
// ============================================================================

/// A `LOAD DATA` call observed by the fake.
#[derive(Debug, Clone)]
pub struct BulkLoadCall {
    pub statement: String,
    pub file: std::path::PathBuf,
    pub records: Vec<Vec<StagedField>>,
}

#[derive(Debug, Clone)]
enum SqlMatch {
    Exact(String),
    Prefix(String),
}

impl SqlMatch {
    fn matches(&self, sql: &str) -> bool {
        match self {
            SqlMatch::Exact(s) => s == sql,
            SqlMatch::Prefix(p) => sql.starts_with(p.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct FailureRule {
    sql: SqlMatch,
    /// Only fail when this value is among the statement parameters.
    param: Option<Value>,
    /// `None` fails forever.
    remaining: Option<usize>,
    error: DbError,
}

#[derive(Debug, Default)]
struct FakeState {
    tables: BTreeMap<String, Vec<Row>>,
    canned: Vec<(String, Vec<Row>)>,
    failures: Vec<FailureRule>,
    statements: Vec<String>,
    bulk_loads: Vec<BulkLoadCall>,
    transaction_log: Vec<&'static str>,
    snapshot: Option<BTreeMap<String, Vec<Row>>>,
    buffered: bool,
    buffered_at_stream: Vec<bool>,
}

impl FakeState {
    fn take_failure(&mut self, sql: &str, params: &[Value]) -> Option<DbError> {
        let rule = self.failures.iter_mut().find(|rule| {
            rule.sql.matches(sql)
                && rule.remaining != Some(0)
                && rule.param.as_ref().map_or(true, |p| params.contains(p))
        })?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.error.clone())
    }

    fn select(&self, sql: &str) -> Vec<Row> {
        if let Some((_, rows)) = self.canned.iter().find(|(canned, _)| canned == sql) {
            return rows.clone();
        }

        let Some(caps) = select_regex().captures(sql.trim()) else {
            return Vec::new();
        };
        let Some(rows) = self.tables.get(&caps[2]) else {
            return Vec::new();
        };
        let projection = caps[1].trim();
        if projection == "*" {
            return rows.clone();
        }
        let columns: Vec<String> = projection.split(',').map(|c| c.trim().to_string()).collect();
        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }

    fn apply(&mut self, sql: &str, params: &[Value]) -> u64 {
        let trimmed = sql.trim();
        if let Some(caps) = truncate_regex().captures(trimmed) {
            let table = self.tables.entry(caps[1].to_string()).or_default();
            table.clear();
            return 0;
        }
        if let Some(caps) = delete_all_regex().captures(trimmed) {
            let table = self.tables.entry(caps[1].to_string()).or_default();
            let removed = table.len() as u64;
            table.clear();
            return removed;
        }
        if let Some(caps) = insert_regex().captures(trimmed) {
            let row: Row = caps[2]
                .split(',')
                .map(|c| c.trim().to_string())
                .zip(params.iter().cloned())
                .collect();
            self.tables.entry(caps[1].to_string()).or_default().push(row);
            return 1;
        }
        0
    }
}

fn select_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^SELECT\s+(.+?)\s+FROM\s+(\S+)$").expect("valid regex"))
}

fn truncate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^TRUNCATE\s+TABLE\s+(\S+)$").expect("valid regex"))
}

fn delete_all_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^DELETE\s+FROM\s+(\S+)$").expect("valid regex"))
}

fn insert_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^INSERT\s+INTO\s+(\S+)\s*\(([^)]*)\)\s*VALUES").expect("valid regex")
    })
}

fn load_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)REPLACE\s+INTO\s+TABLE\s+(\S+).*\(([^)]*)\)\s*$").expect("valid regex")
    })
}

/// In-memory database double.
#[derive(Debug, Clone)]
pub struct FakeDatabase {
    state: Arc<Mutex<FakeState>>,
    engine: String,
    port: u16,
    database: String,
}

impl Default for FakeDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDatabase {
    /// A MySQL-flavoured fake on port 3306 with default database `modw`.
    pub fn new() -> Self {
        let state = FakeState {
            buffered: true,
            ..FakeState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            engine: MYSQL_ENGINE.to_string(),
            port: 3306,
            database: "modw".to_string(),
        }
    }

    pub fn with_engine(mut self, engine: &str) -> Self {
        self.engine = engine.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Seed a table with rows.
    pub fn with_table(self, table: &str, rows: Vec<Row>) -> Self {
        self.lock().tables.insert(table.to_string(), rows);
        self
    }

    /// Answer `sql` with `rows` for `query` and `stream`.
    pub fn on_query(self, sql: &str, rows: Vec<Row>) -> Self {
        self.lock().canned.push((sql.to_string(), rows));
        self
    }

    /// Fail the next `times` calls whose SQL equals `sql`.
    pub fn fail(self, sql: &str, error: DbError, times: usize) -> Self {
        self.push_failure(SqlMatch::Exact(sql.to_string()), None, Some(times), error)
    }

    /// Fail every call whose SQL starts with `prefix`.
    pub fn fail_prefix(self, prefix: &str, error: DbError) -> Self {
        self.push_failure(SqlMatch::Prefix(prefix.to_string()), None, None, error)
    }

    /// Fail every execution of `sql` that binds `param`.
    pub fn fail_with_param(self, sql: &str, param: impl Into<Value>, error: DbError) -> Self {
        self.push_failure(
            SqlMatch::Exact(sql.to_string()),
            Some(param.into()),
            None,
            error,
        )
    }

    fn push_failure(
        self,
        sql: SqlMatch,
        param: Option<Value>,
        remaining: Option<usize>,
        error: DbError,
    ) -> Self {
        self.lock().failures.push(FailureRule {
            sql,
            param,
            remaining,
            error,
        });
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake database poisoned")
    }

    /// Every statement received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn executed(&self, sql: &str) -> bool {
        self.lock().statements.iter().any(|s| s == sql)
    }

    pub fn table(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn bulk_loads(&self) -> Vec<BulkLoadCall> {
        self.lock().bulk_loads.clone()
    }

    /// `begin`, `commit` and `rollback` events, in order.
    pub fn transaction_log(&self) -> Vec<&'static str> {
        self.lock().transaction_log.clone()
    }

    /// The buffered-query attribute at the time of each `stream` call.
    pub fn buffered_at_stream(&self) -> Vec<bool> {
        self.lock().buffered_at_stream.clone()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<(), DbError> {
        let mut state = self.lock();
        state.statements.push(sql.to_string());
        match state.take_failure(sql, params) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Database for FakeDatabase {
    fn engine(&self) -> &str {
        &self.engine
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.record(sql, params)?;
        Ok(self.lock().select(sql))
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.record(sql, params)?;
        Ok(self.lock().apply(sql, params))
    }

    async fn begin_transaction(&mut self) -> Result<(), DbError> {
        let mut state = self.lock();
        state.transaction_log.push("begin");
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        let mut state = self.lock();
        state.transaction_log.push("commit");
        state.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        let mut state = self.lock();
        state.transaction_log.push("rollback");
        if let Some(snapshot) = state.snapshot.take() {
            state.tables = snapshot;
        }
        Ok(())
    }

    async fn stream<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DbError> {
        self.record(sql, &[])?;
        let mut state = self.lock();
        let buffered = state.buffered;
        state.buffered_at_stream.push(buffered);
        let rows = state.select(sql);
        Ok(if buffered {
            Box::new(VecCursor::buffered(rows))
        } else {
            Box::new(VecCursor::unbuffered(rows))
        })
    }

    async fn bulk_load(&mut self, statement: &str, file: &Path) -> Result<u64, DbError> {
        self.record(statement, &[])?;
        let data = std::fs::read(file).map_err(|e| DbError::new(e.to_string()))?;
        let records = decode_records(&data);

        let mut state = self.lock();
        if let Some(caps) = load_regex().captures(statement) {
            let columns: Vec<String> = caps[2].split(',').map(|c| c.trim().to_string()).collect();
            let rows = records.iter().map(|record| {
                columns
                    .iter()
                    .cloned()
                    .zip(record.iter().map(|field| match field {
                        Some(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
                        None => Value::Null,
                    }))
                    .collect::<Row>()
            });
            state
                .tables
                .entry(caps[1].to_string())
                .or_default()
                .extend(rows);
        }
        let loaded = records.len() as u64;
        state.bulk_loads.push(BulkLoadCall {
            statement: statement.to_string(),
            file: file.to_path_buf(),
            records,
        });
        Ok(loaded)
    }

    fn buffered_queries(&self) -> bool {
        self.lock().buffered
    }

    fn set_buffered_queries(&mut self, buffered: bool) {
        self.lock().buffered = buffered;
    }
}
