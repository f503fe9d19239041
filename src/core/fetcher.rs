use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::{
    core::{
        client::ChainQueryClient,
        error::{ScanError, ScanResult},
        types::{
            BlockBatch, FetchResult, Listener, ListenerBucket, ScanMode, ScanPayload, ScanType,
            TaggedBlockWithTransactions,
        },
    },
    utils::metrics::ScanMetrics,
};

/// Runs per-height chain queries in groups of at most `concurrent_query_limit`.
///
/// Queries inside a group run concurrently; a group starts only after the
/// previous one has fully resolved, so at most one group of results is held
/// in flight and the node never sees more than the configured number of
/// simultaneous requests from us.
pub struct BatchFetcher<C: ?Sized> {
    client: Arc<C>,
    concurrent_query_limit: usize,
    metrics: Arc<dyn ScanMetrics>,
}

impl<C> BatchFetcher<C>
where
    C: ChainQueryClient + ?Sized,
{
    pub fn new(client: Arc<C>, concurrent_query_limit: usize, metrics: Arc<dyn ScanMetrics>) -> Self {
        Self {
            client,
            concurrent_query_limit: concurrent_query_limit.max(1),
            metrics,
        }
    }

    /// Fetches `heights` and returns them in request order.
    pub async fn fetch(
        &self,
        heights: &[u64],
        mode: ScanMode,
        listeners: &[Listener],
        scan_type: ScanType,
    ) -> ScanResult<FetchResult> {
        let payload = match mode {
            ScanMode::All => ScanPayload::All(self.fetch_all(heights).await?),
            ScanMode::Listener => ScanPayload::Listener {
                buckets: self.fetch_by_listeners(heights, listeners).await?,
            },
        };
        Ok(FetchResult::new(scan_type, payload))
    }

    pub async fn fetch_all(&self, heights: &[u64]) -> ScanResult<BlockBatch> {
        let mut batch = BlockBatch::with_capacity(heights.len());

        for group in heights.chunks(self.concurrent_query_limit) {
            debug!(
                from = group.first().copied(),
                to = group.last().copied(),
                size = group.len(),
                "📥 Querying block group"
            );
            let results = try_join_all(
                group
                    .iter()
                    .map(|&height| self.client.query_transactions_by_height(height)),
            )
            .await
            .map_err(|e| {
                self.metrics.record_query_failure();
                ScanError::Chain(e)
            })?;

            for (&height, result) in group.iter().zip(results) {
                ensure_height(height, result.block.height)?;
                batch.push(result.block, result.transactions);
            }
            self.metrics.record_blocks_fetched(group.len());
        }

        Ok(batch)
    }

    pub async fn fetch_by_listeners(
        &self,
        heights: &[u64],
        listeners: &[Listener],
    ) -> ScanResult<Vec<ListenerBucket>> {
        let mut tagged = Vec::with_capacity(heights.len());

        for group in heights.chunks(self.concurrent_query_limit) {
            debug!(
                from = group.first().copied(),
                to = group.last().copied(),
                listeners = listeners.len(),
                "📥 Querying block group by bloom"
            );
            let results = try_join_all(
                group
                    .iter()
                    .map(|&height| self.client.query_blocks_and_txs_by_bloom(height, listeners)),
            )
            .await
            .map_err(|e| {
                self.metrics.record_query_failure();
                ScanError::Chain(e)
            })?;

            for (&height, result) in group.iter().zip(results.iter()) {
                ensure_height(height, result.block.block.height)?;
            }
            tagged.extend(results);
            self.metrics.record_blocks_fetched(group.len());
        }

        Ok(partition_by_listeners(tagged, listeners))
    }
}

fn ensure_height(requested: u64, returned: u64) -> ScanResult<()> {
    if requested != returned {
        return Err(ScanError::invariant(format!(
            "queried height {requested} but the node returned block {returned}"
        )));
    }
    Ok(())
}

/// Splits tagged results into one bucket per listener, in listener order.
///
/// A block lands in a bucket only if its own tags contain the bucket's tag,
/// and then carries only the transactions carrying that tag. Records without
/// any matching tag contribute to no bucket.
pub fn partition_by_listeners(
    results: Vec<TaggedBlockWithTransactions>,
    listeners: &[Listener],
) -> Vec<ListenerBucket> {
    let mut buckets: Vec<ListenerBucket> = listeners
        .iter()
        .map(|listener| ListenerBucket {
            tag: listener.tag.clone(),
            batch: BlockBatch::default(),
        })
        .collect();

    for result in results {
        for bucket in buckets.iter_mut() {
            if !result.block.scan_tags.iter().any(|tag| *tag == bucket.tag) {
                continue;
            }
            let txs = result
                .transactions
                .iter()
                .filter(|tx| tx.scan_tags.iter().any(|tag| *tag == bucket.tag))
                .map(|tx| tx.transaction.clone())
                .collect();
            bucket.batch.push(result.block.block.clone(), txs);
        }
    }

    buckets
}
