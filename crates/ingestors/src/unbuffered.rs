//! [`MultiIngestor`] with server-side source cursors.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use ingest_core::{
    Database, IngestError, IngestLogger, IngestOutcome, Ingestor, Result, MYSQL_ENGINE,
};
use regex::Regex;

use crate::change_check::ChangeCheck;
use crate::multi::{MultiIngestor, MultiIngestorOptions};

const FROM_KEYWORD: &[u8] = b"FROM";

fn leading_select_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*SELECT\b").expect("valid regex"))
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Byte offset of the first `FROM` keyword at parenthesis depth zero,
/// outside quoted strings and identifiers, at or after `start`.
fn top_level_from(query: &str, start: usize) -> Option<usize> {
    let bytes = query.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut idx = start;

    while idx < bytes.len() {
        let b = bytes[idx];
        if let Some(q) = quote {
            if b == b'\\' && q != b'`' {
                idx += 1;
            } else if b == q {
                quote = None;
            }
            idx += 1;
            continue;
        }

        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ if depth == 0
                && bytes[idx..]
                    .get(..FROM_KEYWORD.len())
                    .is_some_and(|word| word.eq_ignore_ascii_case(FROM_KEYWORD))
                && (idx == 0 || !is_identifier_byte(bytes[idx - 1]))
                && bytes
                    .get(idx + FROM_KEYWORD.len())
                    .map_or(true, |&next| !is_identifier_byte(next)) =>
            {
                return Some(idx);
            }
            _ => {}
        }
        idx += 1;
    }
    None
}

/// Rewrite the leading `SELECT ... FROM` of `query` into a row count query.
///
/// Only a `FROM` of the outer query counts, so `EXTRACT(YEAR FROM ts)` or a
/// subquery in the select list is skipped. Fails if the query has no such
/// clause.
pub fn derive_count_query(query: &str) -> Result<String> {
    let unable = || IngestError::config(format!("Unable to create count query for: {query}"));

    let select = leading_select_regex().find(query).ok_or_else(unable)?;
    let from = top_level_from(query, select.end()).ok_or_else(unable)?;

    Ok(format!(
        "SELECT COUNT(*) AS row_count FROM{}",
        &query[from + FROM_KEYWORD.len()..]
    ))
}

/// Streams the source with client-side result buffering switched off, so
/// result sets of any size pass through without being held in memory.
pub struct UnbufferedMultiIngestor {
    inner: MultiIngestor,
}

impl UnbufferedMultiIngestor {
    pub fn new(
        destination: Box<dyn Database>,
        source: Box<dyn Database>,
        mut options: MultiIngestorOptions,
    ) -> Result<Self> {
        if source.engine() != MYSQL_ENGINE {
            return Err(IngestError::config(format!(
                "{} does not support {} source databases",
                options.name,
                source.engine()
            )));
        }

        if options.count_query.is_none() {
            options.count_query = Some(derive_count_query(&options.query)?);
        }

        Ok(Self {
            inner: MultiIngestor::new(destination, source, options),
        })
    }

    pub fn options(&self) -> &MultiIngestorOptions {
        self.inner.options()
    }

    pub async fn check_for_changes(&mut self) -> Result<ChangeCheck> {
        self.inner.check_for_changes().await
    }
}

#[async_trait]
impl Ingestor for UnbufferedMultiIngestor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn set_logger(&mut self, logger: Arc<dyn IngestLogger>) {
        self.inner.set_logger(logger);
    }

    async fn ingest(&mut self) -> Result<IngestOutcome> {
        let previous = self.inner.source_mut().buffered_queries();
        self.inner.source_mut().set_buffered_queries(false);

        let result = self.inner.ingest().await;

        self.inner.source_mut().set_buffered_queries(previous);
        result
    }
}
