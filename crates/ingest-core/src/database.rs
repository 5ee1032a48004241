//! Database handle contract consumed by every ingestor.
//!
//! Source and destination handles are dependency-injected as
//! `Box<dyn Database>`; each one is exclusively owned by a single ingestor
//! for the duration of a run.

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::value::{Row, Value};

/// Engine identifier reported by MySQL-family handles.
pub const MYSQL_ENGINE: &str = "mysql";

/// ANSI SQLSTATE for serialization failures / deadlocks.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// Error returned by a database handle.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct DbError {
    /// Five character SQLSTATE, when the server supplied one.
    pub sql_state: Option<String>,
    /// Engine specific error number.
    pub code: Option<u32>,
    pub message: String,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            sql_state: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_state(sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sql_state: Some(sql_state.into()),
            code: None,
            message: message.into(),
        }
    }

    /// True for errors the server raised because of a concurrency conflict;
    /// these are safe to retry.
    pub fn is_serialization_failure(&self) -> bool {
        self.sql_state.as_deref() == Some(SERIALIZATION_FAILURE)
    }
}

/// A forward-only cursor over a result set.
#[async_trait]
pub trait RowCursor: Send {
    /// Number of rows in the result set, when the handle knows it up front.
    /// Unbuffered cursors return `None`.
    fn row_count(&self) -> Option<u64>;

    /// Fetch the next row, `None` once the result set is exhausted.
    async fn next_row(&mut self) -> Result<Option<Row>, DbError>;
}

/// Database handle used as ingestion source or destination.
#[async_trait]
pub trait Database: Send {
    /// Engine family identifier (e.g. [`MYSQL_ENGINE`]).
    fn engine(&self) -> &str;

    /// Server port, used to disambiguate staging file names.
    fn port(&self) -> u16;

    /// Default database (schema) of the connection.
    fn database_name(&self) -> &str;

    /// Run a query and collect every row.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;

    /// Run a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError>;

    async fn begin_transaction(&mut self) -> Result<(), DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    /// Run a query and return a cursor over its rows. Whether rows are
    /// buffered client-side follows [`Database::buffered_queries`].
    async fn stream<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DbError>;

    /// Execute a `LOAD DATA LOCAL INFILE` statement, serving `file` as the
    /// local infile. Returns the affected row count.
    async fn bulk_load(&mut self, statement: &str, file: &Path) -> Result<u64, DbError>;

    /// Whether query results are buffered client-side.
    fn buffered_queries(&self) -> bool;

    fn set_buffered_queries(&mut self, buffered: bool);
}

/// Cursor over rows that are already in memory.
pub struct VecCursor {
    rows: VecDeque<Row>,
    row_count: Option<u64>,
}

impl VecCursor {
    /// A buffered cursor: the row count is known.
    pub fn buffered(rows: Vec<Row>) -> Self {
        let row_count = Some(rows.len() as u64);
        Self {
            rows: rows.into(),
            row_count,
        }
    }

    /// A cursor that reports no row count, as an unbuffered handle would.
    pub fn unbuffered(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into(),
            row_count: None,
        }
    }
}

#[async_trait]
impl RowCursor for VecCursor {
    fn row_count(&self) -> Option<u64> {
        self.row_count
    }

    async fn next_row(&mut self) -> Result<Option<Row>, DbError> {
        Ok(self.rows.pop_front())
    }
}
