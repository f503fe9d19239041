use std::str::FromStr;

use alloy::primitives::{Address, B256, Bloom, BloomInput};
use anyhow::{Context, Result};
use serde_json::Value;

use crate::core::types::Listener;

/// A listener filter with its addresses and topics parsed.
///
/// Empty address or topic lists act as wildcards. A log matches when its
/// address is one of `addresses` and any of its topics is one of `topics`.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub tag: String,
    addresses: Vec<Address>,
    topics: Vec<B256>,
}

impl CompiledFilter {
    pub fn compile(listener: &Listener) -> Result<Self> {
        let addresses = listener
            .filter
            .addresses
            .iter()
            .map(|raw| {
                Address::from_str(raw).with_context(|| {
                    format!("Listener {}: invalid address {}", listener.tag, raw)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let topics = listener
            .filter
            .topics
            .iter()
            .map(|raw| {
                B256::from_str(raw)
                    .with_context(|| format!("Listener {}: invalid topic {}", listener.tag, raw))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tag: listener.tag.clone(),
            addresses,
            topics,
        })
    }

    pub fn compile_all(listeners: &[Listener]) -> Result<Vec<Self>> {
        listeners.iter().map(Self::compile).collect()
    }

    /// False only when the bloom proves no log of the block can match.
    pub fn may_match_bloom(&self, bloom: &Bloom) -> bool {
        let address_hit = self.addresses.is_empty()
            || self
                .addresses
                .iter()
                .any(|address| bloom.contains_input(BloomInput::Raw(address.as_slice())));
        let topic_hit = self.topics.is_empty()
            || self
                .topics
                .iter()
                .any(|topic| bloom.contains_input(BloomInput::Raw(topic.as_slice())));
        address_hit && topic_hit
    }

    /// Exact match against one JSON-RPC log object.
    pub fn matches_log(&self, log: &Value) -> bool {
        let address_hit = self.addresses.is_empty()
            || log
                .get("address")
                .and_then(Value::as_str)
                .and_then(|raw| Address::from_str(raw).ok())
                .is_some_and(|address| self.addresses.contains(&address));
        if !address_hit {
            return false;
        }

        self.topics.is_empty()
            || log
                .get("topics")
                .and_then(Value::as_array)
                .is_some_and(|topics| {
                    topics
                        .iter()
                        .filter_map(Value::as_str)
                        .filter_map(|raw| B256::from_str(raw).ok())
                        .any(|topic| self.topics.contains(&topic))
                })
    }

    /// Whether any log of a JSON-RPC receipt matches.
    pub fn matches_receipt(&self, receipt: &Value) -> bool {
        receipt
            .get("logs")
            .and_then(Value::as_array)
            .is_some_and(|logs| logs.iter().any(|log| self.matches_log(log)))
    }
}

/// Reads the `logsBloom` field of a JSON-RPC block.
pub fn block_bloom(block: &Value) -> Result<Bloom> {
    let raw = block
        .get("logsBloom")
        .and_then(Value::as_str)
        .context("Block has no logsBloom")?;
    Bloom::from_str(raw).with_context(|| format!("Invalid logsBloom: {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ListenerFilter;
    use serde_json::json;

    const TOKEN: &str = "0x00000000000000000000000000000000000000aa";
    const OTHER: &str = "0x00000000000000000000000000000000000000bb";
    const TRANSFER: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
    const APPROVAL: &str = "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

    fn listener(addresses: &[&str], topics: &[&str]) -> Listener {
        Listener {
            tag: "token".to_string(),
            filter: ListenerFilter {
                addresses: addresses.iter().map(|s| s.to_string()).collect(),
                topics: topics.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    fn bloom_with(address: &str, topic: &str) -> Bloom {
        let mut bloom = Bloom::default();
        bloom.accrue(BloomInput::Raw(Address::from_str(address).unwrap().as_slice()));
        bloom.accrue(BloomInput::Raw(B256::from_str(topic).unwrap().as_slice()));
        bloom
    }

    #[test]
    fn bloom_admits_contained_address_and_topic() {
        let filter = CompiledFilter::compile(&listener(&[TOKEN], &[TRANSFER])).unwrap();

        assert!(filter.may_match_bloom(&bloom_with(TOKEN, TRANSFER)));
        assert!(!filter.may_match_bloom(&Bloom::default()));
    }

    #[test]
    fn wildcard_filter_matches_everything() {
        let filter = CompiledFilter::compile(&listener(&[], &[])).unwrap();

        assert!(filter.may_match_bloom(&Bloom::default()));
        assert!(filter.matches_log(&json!({ "address": OTHER, "topics": [] })));
    }

    #[test]
    fn log_match_requires_address_and_topic() {
        let filter = CompiledFilter::compile(&listener(&[TOKEN], &[TRANSFER])).unwrap();

        assert!(filter.matches_log(&json!({ "address": TOKEN, "topics": [TRANSFER] })));
        assert!(!filter.matches_log(&json!({ "address": OTHER, "topics": [TRANSFER] })));
        assert!(!filter.matches_log(&json!({ "address": TOKEN, "topics": [APPROVAL] })));
    }

    #[test]
    fn receipt_matches_when_any_log_matches() {
        let filter = CompiledFilter::compile(&listener(&[TOKEN], &[])).unwrap();
        let receipt = json!({
            "logs": [
                { "address": OTHER, "topics": [APPROVAL] },
                { "address": TOKEN, "topics": [TRANSFER] }
            ]
        });

        assert!(filter.matches_receipt(&receipt));
        assert!(!filter.matches_receipt(&json!({ "logs": [] })));
    }

    #[test]
    fn invalid_address_is_rejected() {
        let err = CompiledFilter::compile(&listener(&["0xnope"], &[])).unwrap_err();
        assert!(err.to_string().contains("invalid address"));
    }

    #[test]
    fn reads_bloom_from_block_json() {
        let bloom = bloom_with(TOKEN, TRANSFER);
        let block = json!({ "logsBloom": bloom.to_string() });

        assert_eq!(block_bloom(&block).unwrap(), bloom);
        assert!(block_bloom(&json!({})).is_err());
    }
}
