#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use rs_lib_block_scanner::core::{
    client::ChainQueryClient,
    scan_config::{ScanConfig, ScanConfigBuilder},
    scheduler::SchedulerHandle,
    sink::DataSink,
    types::{
        BlockRecord, BlockWithTransactions, ChainStatus, FetchResult, Listener, ListenerFilter,
        ScanType, TaggedBlock, TaggedBlockWithTransactions, TaggedTransaction, TransactionRecord,
    },
};
use serde_json::json;

pub fn status(best_height: u64, lib_height: u64) -> ChainStatus {
    ChainStatus {
        best_height,
        lib_height,
    }
}

pub fn listener(tag: &str) -> Listener {
    Listener {
        tag: tag.to_string(),
        filter: ListenerFilter::default(),
    }
}

/// 4s interval, 2 blocks/s, coef 0.6: skip threshold of 5 blocks.
pub fn base_config() -> ScanConfigBuilder {
    ScanConfig::builder()
        .interval_millis(4000)
        .mined_speed(2.0)
        .loop_coef(0.6)
        .concurrent_query_limit(3)
}

/// Scripted chain. `chain_status` walks through the scripted statuses and
/// keeps repeating the last one. Every block query bumps a per-height
/// version that ends up in the block hash.
#[derive(Default)]
pub struct MockChain {
    statuses: Mutex<VecDeque<ChainStatus>>,
    status_calls: AtomicUsize,
    fail_heights: Mutex<HashSet<u64>>,
    versions: Mutex<HashMap<u64, u32>>,
    queries: Mutex<Vec<u64>>,
    tags: Mutex<HashMap<u64, Vec<String>>>,
}

impl MockChain {
    pub fn new(statuses: Vec<ChainStatus>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into()),
            ..Self::default()
        })
    }

    pub fn fail_at(&self, height: u64) {
        self.fail_heights.lock().unwrap().insert(height);
    }

    pub fn heal(&self) {
        self.fail_heights.lock().unwrap().clear();
    }

    pub fn set_statuses(&self, statuses: Vec<ChainStatus>) {
        *self.statuses.lock().unwrap() = statuses.into();
    }

    /// Tags matched at `height`, for listener-mode queries.
    pub fn tag(&self, height: u64, tags: &[&str]) {
        self.tags
            .lock()
            .unwrap()
            .insert(height, tags.iter().map(|t| t.to_string()).collect());
    }

    pub fn queries(&self) -> Vec<u64> {
        self.queries.lock().unwrap().clone()
    }

    pub fn query_count(&self, height: u64) -> usize {
        self.queries().iter().filter(|&&h| h == height).count()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn next_version(&self, height: u64) -> Result<u32> {
        self.queries.lock().unwrap().push(height);
        if self.fail_heights.lock().unwrap().contains(&height) {
            anyhow::bail!("rpc error: block {height} unavailable");
        }
        let mut versions = self.versions.lock().unwrap();
        let version = versions.entry(height).or_insert(0);
        *version += 1;
        Ok(*version)
    }
}

pub fn block_hash(height: u64, version: u32) -> String {
    format!("0x{height:x}-v{version}")
}

fn block(height: u64, version: u32) -> BlockRecord {
    BlockRecord {
        height,
        hash: block_hash(height, version),
        data: json!({ "number": height }),
    }
}

fn tx(hash: String) -> TransactionRecord {
    TransactionRecord {
        data: json!({ "hash": hash }),
        hash,
    }
}

#[async_trait]
impl ChainQueryClient for MockChain {
    async fn chain_status(&self) -> Result<ChainStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        let current = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        current.ok_or_else(|| anyhow::anyhow!("no chain status scripted"))
    }

    async fn query_transactions_by_height(&self, height: u64) -> Result<BlockWithTransactions> {
        tokio::task::yield_now().await;
        let version = self.next_version(height)?;
        Ok(BlockWithTransactions {
            block: block(height, version),
            transactions: vec![tx(format!("0xtx{height}"))],
        })
    }

    async fn query_blocks_and_txs_by_bloom(
        &self,
        height: u64,
        _listeners: &[Listener],
    ) -> Result<TaggedBlockWithTransactions> {
        tokio::task::yield_now().await;
        let version = self.next_version(height)?;
        let tags = self
            .tags
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .unwrap_or_default();

        let mut transactions = vec![TaggedTransaction {
            transaction: tx(format!("0xplain{height}")),
            scan_tags: vec![],
        }];
        for tag in &tags {
            transactions.push(TaggedTransaction {
                transaction: tx(format!("0x{tag}{height}")),
                scan_tags: vec![tag.clone()],
            });
        }

        Ok(TaggedBlockWithTransactions {
            block: TaggedBlock {
                block: block(height, version),
                scan_tags: tags,
            },
            transactions,
        })
    }
}

struct StopRule {
    handle: SchedulerHandle,
    scan_type: ScanType,
    after: usize,
}

#[derive(Default)]
struct SinkState {
    inserts: Mutex<Vec<FetchResult>>,
    insert_calls: AtomicUsize,
    init_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    fail_init: AtomicBool,
    fail_on_insert: Mutex<Option<usize>>,
    stop: Mutex<Option<StopRule>>,
}

/// In-memory sink; clones share the recorded state.
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<SinkState>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends `handle` once `after` inserts of `scan_type` were accepted.
    pub fn stop_after(&self, handle: SchedulerHandle, scan_type: ScanType, after: usize) {
        *self.state.stop.lock().unwrap() = Some(StopRule {
            handle,
            scan_type,
            after,
        });
    }

    pub fn fail_init(&self) {
        self.state.fail_init.store(true, Ordering::SeqCst);
    }

    /// The `nth` insert call (1-based, over the sink lifetime) fails.
    pub fn fail_on_insert(&self, nth: usize) {
        *self.state.fail_on_insert.lock().unwrap() = Some(nth);
    }

    pub fn inserts(&self) -> Vec<FetchResult> {
        self.state.inserts.lock().unwrap().clone()
    }

    pub fn inserts_of(&self, scan_type: ScanType) -> Vec<FetchResult> {
        self.inserts()
            .into_iter()
            .filter(|result| result.scan_type == scan_type)
            .collect()
    }

    pub fn init_calls(&self) -> usize {
        self.state.init_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.state.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSink for RecordingSink {
    async fn init(&self) -> Result<()> {
        self.state.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_init.load(Ordering::SeqCst) {
            anyhow::bail!("sink unavailable");
        }
        Ok(())
    }

    async fn insert(&self, result: &FetchResult) -> Result<()> {
        let call = self.state.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.state.fail_on_insert.lock().unwrap() == Some(call) {
            anyhow::bail!("sink rejected batch");
        }

        let mut inserts = self.state.inserts.lock().unwrap();
        inserts.push(result.clone());

        if let Some(rule) = self.state.stop.lock().unwrap().as_ref() {
            let matching = inserts
                .iter()
                .filter(|r| r.scan_type == rule.scan_type)
                .count();
            if matching == rule.after {
                rule.handle.end_timer();
            }
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.state.destroy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Heights of an all-mode result, in payload order.
pub fn heights(result: &FetchResult) -> Vec<u64> {
    result
        .as_all()
        .map(|batch| batch.heights())
        .unwrap_or_default()
}
