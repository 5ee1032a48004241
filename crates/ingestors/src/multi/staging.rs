//! On-disk staging files handed to the bulk loader.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ingest_core::staging::{encode_record, FieldValue};
use ingest_core::{IngestError, Result, Row, Value};
use tempfile::{Builder, TempPath};

/// How a destination column is filled from a source row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRule {
    /// Zero-based position of the row in the source cursor.
    Ordinal,
    /// The source column of the same name.
    PassThrough(String),
}

/// Column whose value is always replaced with the streaming ordinal.
pub const ORDINAL_COLUMN: &str = "order_id";

impl ColumnRule {
    pub fn resolve(columns: &[String]) -> Vec<ColumnRule> {
        columns
            .iter()
            .map(|column| {
                if column == ORDINAL_COLUMN {
                    ColumnRule::Ordinal
                } else {
                    ColumnRule::PassThrough(column.clone())
                }
            })
            .collect()
    }
}

/// Append the staged form of `row` to `buf`.
///
/// NULL and absent columns load as NULL; zero-length strings load as empty
/// strings.
pub fn stage_row(buf: &mut Vec<u8>, rules: &[ColumnRule], row: &Row, ordinal: u64) {
    let values: Vec<Option<Cow<'_, [u8]>>> = rules
        .iter()
        .map(|rule| match rule {
            ColumnRule::Ordinal => None,
            ColumnRule::PassThrough(column) => row.get(column).and_then(Value::as_bytes),
        })
        .collect();

    let fields = rules.iter().zip(&values).map(|(rule, value)| match (rule, value) {
        (ColumnRule::Ordinal, _) => FieldValue::Ordinal(ordinal),
        (_, Some(bytes)) if bytes.is_empty() => FieldValue::Empty,
        (_, Some(bytes)) => FieldValue::Bytes(&bytes[..]),
        (_, None) => FieldValue::Null,
    });
    encode_record(buf, fields);
}

/// A staging file in the system temp directory, removed when dropped.
pub struct StagingFile {
    writer: BufWriter<File>,
    path: TempPath,
    records: u64,
    buf: Vec<u8>,
}

impl StagingFile {
    /// Create a staging file named after the destination table and port.
    ///
    /// If the first file cannot be created, one more attempt is made with a
    /// randomised name before giving up.
    pub fn create(table: &str, port: u16) -> Result<Self> {
        let dir = std::env::temp_dir();
        let primary = Builder::new()
            .prefix(&format!("{table}.data.{port}."))
            .tempfile_in(&dir);

        let (handle, path) = match primary {
            Ok(file) => file.into_parts(),
            Err(e) => {
                tracing::debug!("Failed to open staging file in {}: {e}", dir.display());
                let fallback = dir.join(format!("{table}.data{port}{}", rand::random::<u32>()));
                let handle = File::create(&fallback).map_err(|source| IngestError::Staging {
                    path: fallback.clone(),
                    source,
                })?;
                (handle, TempPath::from_path(fallback))
            }
        };

        Ok(Self {
            writer: BufWriter::new(handle),
            path,
            records: 0,
            buf: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn write_row(&mut self, rules: &[ColumnRule], row: &Row, ordinal: u64) -> Result<()> {
        self.buf.clear();
        stage_row(&mut self.buf, rules, row, ordinal);
        self.writer
            .write_all(&self.buf)
            .map_err(|source| self.io_error(source))?;
        self.records += 1;
        Ok(())
    }

    /// Flush buffered records so the bulk loader sees the whole batch.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> IngestError {
        IngestError::Staging {
            path: self.path.to_path_buf(),
            source,
        }
    }
}
