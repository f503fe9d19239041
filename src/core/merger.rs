//! Stitches a loop tick's fetch together with the unconfirmed tail of the
//! previous tick.
//!
//! Heights in `(lib_height, last_best_height]` were fetched as unconfirmed by
//! the previous tick and are not queried again, yet the sink must still see
//! the complete unconfirmed window each cycle. The output is
//!
//! ```text
//! [finalized prefix] ++ [retained previous blocks] ++ [fresh suffix]
//!      <= lib            (lib, last_best]              > last_best
//! ```
//!
//! which is strictly ascending by construction.

use crate::core::{
    error::{ScanError, ScanResult},
    types::BlockBatch,
};

/// Merges `fresh` (finalized prefix of `finalized_count` blocks followed by
/// `fresh_count` new unconfirmed blocks) with the still-unconfirmed part of
/// `previous`.
pub fn merge(
    fresh: BlockBatch,
    finalized_count: usize,
    fresh_count: usize,
    lib_height: u64,
    last_best_height: u64,
    previous: Option<BlockBatch>,
) -> ScanResult<BlockBatch> {
    if fresh.len() != finalized_count + fresh_count {
        return Err(ScanError::invariant(format!(
            "fetched {} blocks, planned {} finalized + {} fresh",
            fresh.len(),
            finalized_count,
            fresh_count
        )));
    }

    let previous = match previous {
        Some(previous) if !previous.is_empty() => previous,
        _ => return Ok(fresh),
    };

    let mut prefix = fresh.into_pairs();
    let suffix = prefix.split_off(finalized_count);

    let retained: Vec<_> = previous
        .into_pairs()
        .into_iter()
        .filter(|(block, _)| block.height > lib_height && block.height <= last_best_height)
        .collect();

    let mut merged = BlockBatch::with_capacity(prefix.len() + retained.len() + suffix.len());
    merged.extend(prefix);
    merged.extend(retained);
    merged.extend(suffix);

    Ok(merged)
}

/// True when heights strictly increase along the batch.
pub fn is_strictly_ascending(batch: &BlockBatch) -> bool {
    batch
        .blocks
        .windows(2)
        .all(|pair| pair[0].height < pair[1].height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BlockRecord, TransactionRecord};
    use serde_json::json;

    fn batch(heights: &[u64], version: &str) -> BlockBatch {
        heights
            .iter()
            .map(|&height| {
                (
                    BlockRecord {
                        height,
                        hash: format!("{version}-{height}"),
                        data: json!({ "number": height }),
                    },
                    vec![TransactionRecord {
                        hash: format!("{version}-tx-{height}"),
                        data: json!(null),
                    }],
                )
            })
            .collect()
    }

    #[test]
    fn empty_previous_returns_fresh_unchanged() {
        let fresh = batch(&[11, 12, 13], "new");

        let merged = merge(fresh.clone(), 1, 2, 11, 12, None).unwrap();
        assert_eq!(merged, fresh);

        let merged = merge(fresh.clone(), 1, 2, 11, 12, Some(BlockBatch::default())).unwrap();
        assert_eq!(merged, fresh);
    }

    #[test]
    fn retains_previous_unconfirmed_window() {
        let previous = batch(&[98, 100, 102, 104, 105], "old");
        let fresh = batch(&[101, 106, 107], "new");

        let merged = merge(fresh, 1, 2, 100, 105, Some(previous)).unwrap();

        assert_eq!(merged.heights(), vec![101, 102, 104, 105, 106, 107]);
        let hashes: Vec<&str> = merged.blocks.iter().map(|b| b.hash.as_str()).collect();
        assert_eq!(
            hashes,
            vec!["new-101", "old-102", "old-104", "old-105", "new-106", "new-107"]
        );
        assert!(is_strictly_ascending(&merged));
    }

    #[test]
    fn transactions_follow_their_blocks() {
        let previous = batch(&[102, 103], "old");
        let fresh = batch(&[101, 104], "new");

        let merged = merge(fresh, 1, 1, 101, 103, Some(previous)).unwrap();

        for (block, txs) in merged.iter() {
            assert_eq!(txs.len(), 1);
            let version = block.hash.split('-').next().unwrap();
            assert_eq!(txs[0].hash, format!("{version}-tx-{}", block.height));
        }
    }

    #[test]
    fn lib_past_last_best_retains_nothing() {
        let previous = batch(&[101, 102, 103], "old");
        let fresh = batch(&[101, 102, 103, 104, 105, 106, 107], "new");

        let merged = merge(fresh.clone(), 5, 2, 105, 103, Some(previous)).unwrap();

        assert_eq!(merged, fresh);
    }

    #[test]
    fn blocks_beyond_old_best_are_dropped() {
        // Previous result somehow extends past last_best; those blocks are stale.
        let previous = batch(&[101, 102, 103, 104], "old");
        let fresh = batch(&[104, 105], "new");

        let merged = merge(fresh, 0, 2, 100, 103, Some(previous)).unwrap();

        assert_eq!(merged.heights(), vec![101, 102, 103, 104, 105]);
        assert_eq!(merged.blocks[3].hash, "new-104");
    }

    #[test]
    fn count_mismatch_is_an_invariant_violation() {
        let err = merge(batch(&[1, 2], "new"), 1, 2, 1, 1, None).unwrap_err();
        assert!(matches!(err, ScanError::InvariantViolation(_)));
    }

    #[test]
    fn merged_output_is_ascending_over_many_windows() {
        let mut previous: Option<BlockBatch> = None;
        let mut last_best = 10;
        let mut current = 5;

        for step in 1..=20u64 {
            let lib = 5 + step * 2;
            let best = lib + 4 + step % 3;
            let floor = if previous.is_some() {
                last_best.max(lib)
            } else {
                lib
            };
            let finalized: Vec<u64> = (current + 1..=lib).collect();
            let fresh: Vec<u64> = (floor.max(current) + 1..=best).collect();
            let mut heights = finalized.clone();
            heights.extend(&fresh);

            let merged = merge(
                batch(&heights, "n"),
                finalized.len(),
                fresh.len(),
                lib,
                last_best,
                previous.take(),
            )
            .unwrap();

            assert!(is_strictly_ascending(&merged), "step {step}");
            assert_eq!(merged.heights(), (current + 1..=best).collect::<Vec<_>>());

            current = lib;
            last_best = best;
            previous = Some(merged);
        }
    }
}
