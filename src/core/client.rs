use anyhow::Result;
use async_trait::async_trait;

use crate::core::types::{BlockWithTransactions, ChainStatus, Listener, TaggedBlockWithTransactions};

/// Node access used by the scan engine. Transport, pagination and retries
/// are the implementor's business.
#[async_trait]
pub trait ChainQueryClient: Send + Sync {
    async fn chain_status(&self) -> Result<ChainStatus>;

    /// Block at `height` with all of its transactions.
    async fn query_transactions_by_height(&self, height: u64) -> Result<BlockWithTransactions>;

    /// Block at `height` and its transactions, each annotated with the tags
    /// of the listeners it matches.
    async fn query_blocks_and_txs_by_bloom(
        &self,
        height: u64,
        listeners: &[Listener],
    ) -> Result<TaggedBlockWithTransactions>;
}
