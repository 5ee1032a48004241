//! The uniform ingestor contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::logger::IngestLogger;
use crate::summary::IngestOutcome;

/// Contract implemented by every ingestor variant.
///
/// An external scheduler picks an ingestor, injects a logger and calls
/// [`Ingestor::ingest`]. The ingestor owns its source and destination
/// handles and drives the whole read -> clear -> load -> finalize cycle.
#[async_trait]
pub trait Ingestor: Send {
    /// Class name reported in summary records.
    fn name(&self) -> &str;

    /// Replace the sink used for all structured log events.
    fn set_logger(&mut self, logger: Arc<dyn IngestLogger>);

    /// Run one ingestion.
    ///
    /// `Err` is returned for fatal and configuration errors. Partial
    /// failures that stop the run after some data was written are reported
    /// as [`IngestOutcome::Aborted`].
    async fn ingest(&mut self) -> Result<IngestOutcome>;
}
