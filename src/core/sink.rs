use anyhow::Result;
use async_trait::async_trait;

use crate::core::types::FetchResult;

/// Destination of scanned batches.
///
/// Delivery is at-least-once: after a restart the scanner may insert a batch
/// it already handed over, and unconfirmed heights are re-inserted every
/// cycle until they finalize. Implementations must tolerate both.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Called once when the scanner leaves `Init`.
    async fn init(&self) -> Result<()>;

    async fn insert(&self, result: &FetchResult) -> Result<()>;

    /// Called once after a fatal error, before the error reaches the caller.
    async fn destroy(&self) -> Result<()>;
}
