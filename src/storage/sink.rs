use std::collections::HashSet;
use std::ops::RangeInclusive;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::sink::DataSink;
use crate::core::types::{BlockBatch, FetchResult, ScanPayload, ScanType, TransactionRecord};
use crate::storage::rocksdb::RocksDBStorage;
use crate::storage::schema::{SCHEMA_VERSION, keys};
use crate::storage::traits::KVStorage;

/// One block as persisted by [`RocksDbSink`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredBlock {
    pub height: u64,
    pub hash: String,
    /// False while the block sits above the LIB it was fetched with
    pub confirmed: bool,
    pub scan_type: ScanType,
    pub block: Value,
    pub transactions: Vec<TransactionRecord>,
    pub stored_at: DateTime<Utc>,
}

/// Sink bookkeeping, rewritten on every insert.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanProgress {
    pub chain: String,
    pub last_scan_type: ScanType,
    pub highest_height: Option<u64>,
    pub lib_height: Option<u64>,
    pub best_height: Option<u64>,
    pub inserted_batches: u64,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
}

/// [`DataSink`] writing every block of a batch (and its progress record) in
/// one RocksDB write batch. Unconfirmed blocks are overwritten by later loop
/// cycles at the same key. In listener mode a re-queried height that no
/// longer matches a tag has its record under that tag removed.
#[derive(Clone)]
pub struct RocksDbSink {
    storage: RocksDBStorage,
    chain: String,
}

impl RocksDbSink {
    pub fn new(storage: RocksDBStorage, chain: impl Into<String>) -> Self {
        Self {
            storage,
            chain: chain.into(),
        }
    }

    pub fn open(path: &str, compression: bool, chain: impl Into<String>) -> Result<Self> {
        let storage = RocksDBStorage::with_compression(path, compression)?;
        Ok(Self::new(storage, chain))
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn progress(&self) -> Result<Option<ScanProgress>> {
        self.storage.read_json(&keys::progress_key(&self.chain))
    }

    pub fn stored_block(&self, height: u64) -> Result<Option<StoredBlock>> {
        self.storage
            .read_json(&keys::block_key(&self.chain, height))
    }

    pub fn stored_listener_block(&self, tag: &str, height: u64) -> Result<Option<StoredBlock>> {
        self.storage
            .read_json(&keys::listener_block_key(&self.chain, tag, height))
    }

    /// All blocks stored in all-mode, ascending by height.
    pub fn stored_blocks(&self) -> Result<Vec<StoredBlock>> {
        Self::decode_range(
            self.storage
                .scan_prefix(&keys::block_prefix(&self.chain), None)?,
        )
    }

    /// Blocks stored for one listener tag, ascending by height.
    pub fn stored_listener_blocks(&self, tag: &str) -> Result<Vec<StoredBlock>> {
        Self::decode_range(
            self.storage
                .scan_prefix(&keys::listener_block_prefix(&self.chain, tag), None)?,
        )
    }

    fn decode_range(rows: Vec<(String, String)>) -> Result<Vec<StoredBlock>> {
        rows.into_iter()
            .map(|(key, value)| {
                serde_json::from_str(&value)
                    .with_context(|| format!("Failed to decode stored block at key: {}", key))
            })
            .collect()
    }

    fn encode_batch(
        &self,
        batch: &BlockBatch,
        result: &FetchResult,
        key_for: impl Fn(u64) -> String,
        now: DateTime<Utc>,
        pairs: &mut Vec<(String, String)>,
    ) -> Result<()> {
        for (block, txs) in batch.iter() {
            let confirmed = match result.lib_height {
                Some(lib) => block.height <= lib,
                // Missing heights are requested explicitly and treated as final
                None => true,
            };
            let stored = StoredBlock {
                height: block.height,
                hash: block.hash.clone(),
                confirmed,
                scan_type: result.scan_type,
                block: block.data.clone(),
                transactions: txs.clone(),
                stored_at: now,
            };
            let json = serde_json::to_string(&stored).with_context(|| {
                format!("Failed to serialize block {} for chain {}", block.height, self.chain)
            })?;
            pairs.push((key_for(block.height), json));
        }
        Ok(())
    }

    /// Keys of `tag` inside `heights` that `batch` no longer contains.
    fn stale_listener_keys(
        &self,
        tag: &str,
        heights: &RangeInclusive<u64>,
        batch: &BlockBatch,
    ) -> Result<Vec<String>> {
        let kept_keys: HashSet<String> = batch
            .blocks
            .iter()
            .map(|block| keys::listener_block_key(&self.chain, tag, block.height))
            .collect();
        let stored = self.storage.scan_range(
            &keys::listener_block_key(&self.chain, tag, *heights.start()),
            &keys::listener_block_key(&self.chain, tag, *heights.end()),
        )?;
        Ok(stored
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| !kept_keys.contains(key))
            .collect())
    }
}

#[async_trait]
impl DataSink for RocksDbSink {
    async fn init(&self) -> Result<()> {
        self.storage.init()?;
        if self.progress()?.is_none() {
            debug!(chain = %self.chain, "No previous progress record");
        }
        Ok(())
    }

    async fn insert(&self, result: &FetchResult) -> Result<()> {
        let now = Utc::now();
        let mut pairs = Vec::with_capacity(result.block_count() + 1);
        let mut deletes = Vec::new();
        let mut highest: Option<u64> = None;

        match &result.payload {
            ScanPayload::All(batch) => {
                self.encode_batch(
                    batch,
                    result,
                    |height| keys::block_key(&self.chain, height),
                    now,
                    &mut pairs,
                )?;
                highest = batch.blocks.iter().map(|b| b.height).max();
            }
            ScanPayload::Listener { buckets } => {
                for bucket in buckets {
                    if let Some(heights) = &result.queried {
                        let stale = self.stale_listener_keys(&bucket.tag, heights, &bucket.batch)?;
                        deletes.extend(stale);
                    }
                    self.encode_batch(
                        &bucket.batch,
                        result,
                        |height| keys::listener_block_key(&self.chain, &bucket.tag, height),
                        now,
                        &mut pairs,
                    )?;
                    highest = highest.max(bucket.batch.blocks.iter().map(|b| b.height).max());
                }
            }
        }

        let previous = self.progress()?;
        let progress = ScanProgress {
            chain: self.chain.clone(),
            last_scan_type: result.scan_type,
            highest_height: highest.max(previous.as_ref().and_then(|p| p.highest_height)),
            lib_height: result
                .lib_height
                .or(previous.as_ref().and_then(|p| p.lib_height)),
            best_height: result
                .best_height
                .or(previous.as_ref().and_then(|p| p.best_height)),
            inserted_batches: previous.map_or(0, |p| p.inserted_batches) + 1,
            updated_at: now,
            version: SCHEMA_VERSION,
        };
        pairs.push((
            keys::progress_key(&self.chain),
            serde_json::to_string(&progress).context("Failed to serialize scan progress")?,
        ));

        let rows = pairs.len();
        let removed = deletes.len();
        self.storage.batch_write_delete(pairs, deletes)?;
        debug!(
            chain = %self.chain,
            scan_type = result.scan_type.as_str(),
            rows,
            removed,
            "💾 Batch persisted"
        );
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.storage.flush()?;
        info!(chain = %self.chain, "💾 Storage flushed");
        Ok(())
    }
}
