use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scanner phase. `Loop` repeats once per scheduler tick, `Error` is terminal
/// until `restart`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// Collaborators not yet initialized
    Init,
    /// Backfilling the configured missing heights
    Missing,
    /// Backfilling `[start_height, lib_height]`
    Gap,
    /// Polling the chain tip
    Loop,
    /// Fatal failure, only `restart` leaves this state
    Error,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Init => "init",
            ScanPhase::Missing => "missing",
            ScanPhase::Gap => "gap",
            ScanPhase::Loop => "loop",
            ScanPhase::Error => "error",
        }
    }

    /// Allowed edges of the phase machine. Resetting to `Init` is not a
    /// transition, it happens only through `Scanner::restart`.
    pub fn can_transition_to(&self, next: ScanPhase) -> bool {
        matches!(
            (self, next),
            (ScanPhase::Init, ScanPhase::Missing)
                | (ScanPhase::Missing, ScanPhase::Gap)
                | (ScanPhase::Gap, ScanPhase::Loop)
                | (ScanPhase::Loop, ScanPhase::Loop)
                | (_, ScanPhase::Error)
        )
    }
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which records the scanner pulls from the chain.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Every block with every transaction
    All,
    /// Only blocks/transactions matching a configured listener
    Listener,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::All => "all",
            ScanMode::Listener => "listener",
        }
    }
}

/// Which phase produced a `FetchResult`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Missing,
    Gap,
    Loop,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Missing => "missing",
            ScanType::Gap => "gap",
            ScanType::Loop => "loop",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStatus {
    /// Tentative chain tip, may still be reorganized
    pub best_height: u64,
    /// Last irreversible block, never moves backward
    pub lib_height: u64,
}

/// Content filter attached to a listener tag. Interpreted by the chain client.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerFilter {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub tag: String,
    #[serde(default)]
    pub filter: ListenerFilter,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockRecord {
    pub height: u64,
    pub hash: String,
    /// Raw block payload as returned by the node
    pub data: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub hash: String,
    pub data: Value,
}

/// Answer to a per-height query in `ScanMode::All`.
#[derive(Debug, Clone)]
pub struct BlockWithTransactions {
    pub block: BlockRecord,
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone)]
pub struct TaggedBlock {
    pub block: BlockRecord,
    pub scan_tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TaggedTransaction {
    pub transaction: TransactionRecord,
    pub scan_tags: Vec<String>,
}

/// Answer to a per-height query in `ScanMode::Listener`.
#[derive(Debug, Clone)]
pub struct TaggedBlockWithTransactions {
    pub block: TaggedBlock,
    pub transactions: Vec<TaggedTransaction>,
}

/// Blocks and their transactions kept in two parallel vectors:
/// `txs[i]` always belongs to `blocks[i]`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BlockBatch {
    pub blocks: Vec<BlockRecord>,
    pub txs: Vec<Vec<TransactionRecord>>,
}

impl BlockBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            blocks: Vec::with_capacity(capacity),
            txs: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, block: BlockRecord, txs: Vec<TransactionRecord>) {
        self.blocks.push(block);
        self.txs.push(txs);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn heights(&self) -> Vec<u64> {
        self.blocks.iter().map(|block| block.height).collect()
    }

    pub fn into_pairs(self) -> Vec<(BlockRecord, Vec<TransactionRecord>)> {
        self.blocks.into_iter().zip(self.txs).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockRecord, &Vec<TransactionRecord>)> {
        self.blocks.iter().zip(self.txs.iter())
    }
}

impl FromIterator<(BlockRecord, Vec<TransactionRecord>)> for BlockBatch {
    fn from_iter<I: IntoIterator<Item = (BlockRecord, Vec<TransactionRecord>)>>(iter: I) -> Self {
        let mut batch = BlockBatch::default();
        for (block, txs) in iter {
            batch.push(block, txs);
        }
        batch
    }
}

impl Extend<(BlockRecord, Vec<TransactionRecord>)> for BlockBatch {
    fn extend<I: IntoIterator<Item = (BlockRecord, Vec<TransactionRecord>)>>(&mut self, iter: I) {
        for (block, txs) in iter {
            self.push(block, txs);
        }
    }
}

/// Per-tag slice of a listener-mode fetch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ListenerBucket {
    pub tag: String,
    pub batch: BlockBatch,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScanPayload {
    All(BlockBatch),
    Listener { buckets: Vec<ListenerBucket> },
}

/// One unit handed to `DataSink::insert`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub scan_type: ScanType,
    /// LIB observed when the batch was fetched (absent for missing heights)
    pub lib_height: Option<u64>,
    /// Best height observed when the batch was fetched
    pub best_height: Option<u64>,
    /// Contiguous heights this result answers in full. Set for gap chunks and
    /// listener loop ticks, where a height absent from a bucket no longer
    /// matches that listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queried: Option<RangeInclusive<u64>>,
    pub payload: ScanPayload,
}

impl FetchResult {
    pub fn new(scan_type: ScanType, payload: ScanPayload) -> Self {
        Self {
            scan_type,
            lib_height: None,
            best_height: None,
            queried: None,
            payload,
        }
    }

    pub fn with_queried(mut self, heights: RangeInclusive<u64>) -> Self {
        self.queried = Some(heights);
        self
    }

    pub fn with_chain_status(mut self, status: &ChainStatus) -> Self {
        self.lib_height = Some(status.lib_height);
        self.best_height = Some(status.best_height);
        self
    }

    /// Blocks across the whole result. A block present in several listener
    /// buckets is counted once per bucket.
    pub fn block_count(&self) -> usize {
        match &self.payload {
            ScanPayload::All(batch) => batch.len(),
            ScanPayload::Listener { buckets } => buckets.iter().map(|b| b.batch.len()).sum(),
        }
    }

    pub fn as_all(&self) -> Option<&BlockBatch> {
        match &self.payload {
            ScanPayload::All(batch) => Some(batch),
            ScanPayload::Listener { .. } => None,
        }
    }

    pub fn bucket(&self, tag: &str) -> Option<&BlockBatch> {
        match &self.payload {
            ScanPayload::All(_) => None,
            ScanPayload::Listener { buckets } => buckets
                .iter()
                .find(|bucket| bucket.tag == tag)
                .map(|bucket| &bucket.batch),
        }
    }
}

/// Loop position, written only by the scanner after an insert completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopCursor {
    /// Highest height durably inserted as finalized. `None` until genesis is.
    pub current_queries: Option<u64>,
    /// Best height seen at the end of the previous cycle
    pub last_best_height: Option<u64>,
    /// Previous loop output, kept for its unconfirmed tail
    pub last_loop_result: Option<BlockBatch>,
}

impl LoopCursor {
    /// `start_height` itself is still pending, so the cursor sits one below it.
    pub fn new(start_height: u64) -> Self {
        Self {
            current_queries: start_height.checked_sub(1),
            last_best_height: None,
            last_loop_result: None,
        }
    }

    /// First height not yet inserted as finalized.
    pub fn next_height(&self) -> u64 {
        self.current_queries.map_or(0, |height| height + 1)
    }

    /// Records `height` as finalized. The cursor never moves backward.
    pub fn advance_to(&mut self, height: u64) {
        self.current_queries = Some(self.current_queries.map_or(height, |h| h.max(height)));
    }

    pub fn has_unconfirmed_tail(&self) -> bool {
        self.last_loop_result
            .as_ref()
            .is_some_and(|batch| !batch.is_empty())
    }
}

/// Snapshot published to status watchers (health API, tests).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStatus {
    pub phase: ScanPhase,
    pub current_queries: Option<u64>,
    pub last_best_height: Option<u64>,
}

impl ScanStatus {
    pub fn from_cursor(phase: ScanPhase, cursor: &LoopCursor) -> Self {
        Self {
            phase,
            current_queries: cursor.current_queries,
            last_best_height: cursor.last_best_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_transitions_follow_pipeline_order() {
        assert!(ScanPhase::Init.can_transition_to(ScanPhase::Missing));
        assert!(ScanPhase::Missing.can_transition_to(ScanPhase::Gap));
        assert!(ScanPhase::Gap.can_transition_to(ScanPhase::Loop));
        assert!(ScanPhase::Loop.can_transition_to(ScanPhase::Loop));

        assert!(!ScanPhase::Init.can_transition_to(ScanPhase::Gap));
        assert!(!ScanPhase::Loop.can_transition_to(ScanPhase::Missing));
        assert!(!ScanPhase::Error.can_transition_to(ScanPhase::Init));
    }

    #[test]
    fn any_phase_can_fail() {
        for phase in [
            ScanPhase::Init,
            ScanPhase::Missing,
            ScanPhase::Gap,
            ScanPhase::Loop,
        ] {
            assert!(phase.can_transition_to(ScanPhase::Error), "{phase}");
        }
    }

    #[test]
    fn cursor_starts_below_start_height() {
        let cursor = LoopCursor::new(100);
        assert_eq!(cursor.current_queries, Some(99));
        assert_eq!(cursor.next_height(), 100);
        assert!(cursor.last_best_height.is_none());
        assert!(!cursor.has_unconfirmed_tail());
    }

    #[test]
    fn genesis_cursor_is_empty_and_only_moves_forward() {
        let mut cursor = LoopCursor::new(0);
        assert_eq!(cursor.current_queries, None);
        assert_eq!(cursor.next_height(), 0);

        cursor.advance_to(0);
        assert_eq!(cursor.current_queries, Some(0));
        assert_eq!(cursor.next_height(), 1);

        cursor.advance_to(12);
        cursor.advance_to(7);
        assert_eq!(cursor.current_queries, Some(12));
    }

    #[test]
    fn fetch_result_counts_blocks_per_bucket() {
        let block = BlockRecord {
            height: 7,
            hash: "0x07".to_string(),
            data: Value::Null,
        };
        let mut batch = BlockBatch::default();
        batch.push(block, vec![]);

        let result = FetchResult::new(
            ScanType::Loop,
            ScanPayload::Listener {
                buckets: vec![
                    ListenerBucket {
                        tag: "a".to_string(),
                        batch: batch.clone(),
                    },
                    ListenerBucket {
                        tag: "b".to_string(),
                        batch,
                    },
                ],
            },
        );

        assert_eq!(result.block_count(), 2);
        assert!(result.bucket("a").is_some());
        assert!(result.bucket("c").is_none());
        assert!(result.as_all().is_none());
    }
}
