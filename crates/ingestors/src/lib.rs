//! Ingestor family for warehouse-ingest.
//!
//! Every variant implements [`ingest_core::Ingestor`]:
//!
//! - [`ArrayIngestor`] - loads an in-memory row set inside one transaction
//! - [`RowCopyIngestor`] - legacy per-row copy, kept for old pipelines
//! - [`MultiIngestor`] - the staged-file bulk-load engine
//! - [`UnbufferedMultiIngestor`] - [`MultiIngestor`] with server-side cursors
//! - [`SynchronizingIngestor`] - appends only rows missing from the destination

mod array;
pub mod change_check;
pub mod multi;
mod row_copy;
mod sql;
mod synchronizing;
mod unbuffered;

pub use array::ArrayIngestor;
pub use change_check::{check_for_changes, ChangeCheck};
pub use multi::{MultiIngestor, MultiIngestorOptions};
pub use row_copy::RowCopyIngestor;
pub use synchronizing::{unique_key, SynchronizingIngestor};
pub use unbuffered::{derive_count_query, UnbufferedMultiIngestor};
