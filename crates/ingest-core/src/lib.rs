//! Core contracts for the warehouse-ingest engine.
//!
//! This crate provides the types every ingestor is built on:
//!
//! - [`Database`] / [`RowCursor`] - the handle contract consumed from source
//!   and destination databases
//! - [`Row`] / [`Value`] - engine-neutral row representation
//! - [`IngestLogger`] - leveled, structured log sink ([`NullLogger`],
//!   [`TracingLogger`])
//! - [`Ingestor`] - the uniform `ingest()` / `set_logger()` contract
//! - [`IngestSummary`] / [`IngestOutcome`] - the typed run report
//! - [`ProcessingStep`] - pre/post processing step descriptors
//! - [`staging`] - the control-byte delimited staging file format
//!
//! # Architecture
//!
//! ```text
//! ingest-core (this crate)
//!    │
//!    ├─── ingestors        (array, row-copy, multi, unbuffered, synchronizing)
//!    └─── mysql-database   (implements Database on top of mysql_async)
//! ```

pub mod database;
pub mod error;
pub mod ingestor;
pub mod logger;
pub mod staging;
pub mod steps;
pub mod summary;
pub mod table;
pub mod testing;
pub mod value;

pub use database::{Database, DbError, RowCursor, VecCursor, MYSQL_ENGINE, SERIALIZATION_FAILURE};
pub use error::{IngestError, Result};
pub use ingestor::Ingestor;
pub use logger::{IngestLogger, LogLevel, NullLogger, TracingLogger};
pub use steps::{load_processing_statements, load_processing_steps, ProcessingStep};
pub use summary::{AbortStage, AbortedRun, IngestOutcome, IngestSummary};
pub use table::{ClearPolicy, TableName, NO_DELETE};
pub use value::{Row, Value};
