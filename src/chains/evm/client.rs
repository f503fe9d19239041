use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloy::{
    providers::{Provider, ProviderBuilder, RootProvider},
    transports::http::{Client, Http},
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::chains::evm::bloom::{CompiledFilter, block_bloom};
use crate::core::client::ChainQueryClient;
use crate::core::types::{
    BlockRecord, BlockWithTransactions, ChainStatus, Listener, TaggedBlock,
    TaggedBlockWithTransactions, TaggedTransaction, TransactionRecord,
};
use crate::utils::retry::{RetryConfig, retry_async};

/// JSON-RPC client for EVM chains.
///
/// The LIB is the node's `finalized` block. Nodes that do not serve the
/// `finalized` tag fall back to `best - confirm_blocks`. Reported LIBs never
/// move backward.
pub struct EvmChainClient {
    provider: RootProvider<Http<Client>>,
    retry: RetryConfig,
    page_size: usize,
    confirm_blocks: u64,
    finalized_supported: AtomicBool,
    block_receipts_supported: AtomicBool,
    last_lib: AtomicU64,
    listeners: Vec<Listener>,
    filters: Vec<CompiledFilter>,
}

impl EvmChainClient {
    pub fn new(rpc_url: &str, page_size: usize, confirm_blocks: u64, retry: RetryConfig) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC url: {}", rpc_url))?;
        Ok(Self {
            provider: ProviderBuilder::new().on_http(url),
            retry,
            page_size: page_size.max(1),
            confirm_blocks,
            finalized_supported: AtomicBool::new(true),
            block_receipts_supported: AtomicBool::new(true),
            last_lib: AtomicU64::new(0),
            listeners: Vec::new(),
            filters: Vec::new(),
        })
    }

    /// Compiles the listener filters up front so malformed addresses or
    /// topics are reported before scanning starts.
    pub fn with_listeners(mut self, listeners: &[Listener]) -> Result<Self> {
        self.filters = CompiledFilter::compile_all(listeners)?;
        self.listeners = listeners.to_vec();
        Ok(self)
    }

    fn is_compiled_for(&self, listeners: &[Listener]) -> bool {
        self.listeners.as_slice() == listeners
    }

    /// Raw JSON-RPC call with transport retries. `params` must be a JSON array.
    async fn call(&self, method: &'static str, params: Value) -> Result<Value> {
        retry_async(
            method,
            || {
                let params = params.clone();
                async move {
                    self.provider
                        .raw_request::<_, Value>(method.into(), params)
                        .await
                }
            },
            &self.retry,
        )
        .await
        .map_err(|e| anyhow!("{} failed: {}", method, e))
    }

    async fn best_height(&self) -> Result<u64> {
        retry_async(
            "eth_blockNumber",
            || async { self.provider.get_block_number().await },
            &self.retry,
        )
        .await
        .map_err(|e| anyhow!("eth_blockNumber failed: {}", e))
    }

    async fn finalized_height(&self) -> Option<u64> {
        if !self.finalized_supported.load(Ordering::Relaxed) {
            return None;
        }

        let response = self
            .provider
            .raw_request::<_, Value>("eth_getBlockByNumber".into(), json!(["finalized", false]))
            .await;
        match response {
            Ok(block) if !block.is_null() => match block_number(&block) {
                Ok(number) => Some(number),
                Err(e) => {
                    warn!(error = %e, "⚠️ Unreadable finalized block, using confirmation depth");
                    None
                }
            },
            Ok(_) => {
                self.disable_finalized("node returned no finalized block");
                None
            }
            Err(e) if is_unsupported(&e.to_string()) => {
                self.disable_finalized(&e.to_string());
                None
            }
            Err(e) => {
                warn!(error = %e, "⚠️ Finalized block query failed, using confirmation depth");
                None
            }
        }
    }

    fn disable_finalized(&self, reason: &str) {
        if self.finalized_supported.swap(false, Ordering::Relaxed) {
            warn!(
                reason,
                confirm_blocks = self.confirm_blocks,
                "⚠️ Finalized tag not supported, LIB follows confirmation depth"
            );
        }
    }

    async fn block_by_height(&self, height: u64) -> Result<Value> {
        let block = self
            .call("eth_getBlockByNumber", json!([hex_height(height), true]))
            .await?;
        if block.is_null() {
            return Err(anyhow!("Block {} not found", height));
        }
        Ok(block)
    }

    /// Receipts of every transaction in `block`, keyed by transaction hash.
    async fn receipts(&self, height: u64, block: &Value) -> Result<HashMap<String, Value>> {
        let tx_hashes: Vec<String> = transactions(block)
            .iter()
            .filter_map(|tx| tx.get("hash").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        if tx_hashes.is_empty() {
            return Ok(HashMap::new());
        }

        let receipts = match self.block_receipts(height).await? {
            Some(receipts) => receipts,
            None => self.receipts_by_transaction(&tx_hashes).await?,
        };

        Ok(receipts
            .into_iter()
            .filter_map(|receipt| {
                let hash = receipt.get("transactionHash")?.as_str()?.to_string();
                Some((hash, receipt))
            })
            .collect())
    }

    async fn block_receipts(&self, height: u64) -> Result<Option<Vec<Value>>> {
        if !self.block_receipts_supported.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let response = self
            .provider
            .raw_request::<_, Value>("eth_getBlockReceipts".into(), json!([hex_height(height)]))
            .await;
        match response {
            Ok(Value::Array(receipts)) => Ok(Some(receipts)),
            Ok(other) if other.is_null() => Err(anyhow!("Receipts for block {} not found", height)),
            Ok(other) => Err(anyhow!("Unexpected eth_getBlockReceipts response: {}", other)),
            Err(e) if is_unsupported(&e.to_string()) => {
                warn!("⚠️ eth_getBlockReceipts not supported by this node, fetching receipts per transaction");
                self.block_receipts_supported.store(false, Ordering::Relaxed);
                Ok(None)
            }
            Err(_) => {
                // Transient failure: retry through the regular path
                let receipts = self
                    .call("eth_getBlockReceipts", json!([hex_height(height)]))
                    .await?;
                match receipts {
                    Value::Array(receipts) => Ok(Some(receipts)),
                    other => Err(anyhow!("Unexpected eth_getBlockReceipts response: {}", other)),
                }
            }
        }
    }

    async fn receipts_by_transaction(&self, tx_hashes: &[String]) -> Result<Vec<Value>> {
        let mut receipts = Vec::with_capacity(tx_hashes.len());
        for page in tx_hashes.chunks(self.page_size) {
            let fetched = try_join_all(
                page.iter()
                    .map(|hash| self.call("eth_getTransactionReceipt", json!([hash]))),
            )
            .await?;
            receipts.extend(fetched.into_iter().filter(|receipt| !receipt.is_null()));
        }
        debug!(count = receipts.len(), "🧾 Receipts fetched per transaction");
        Ok(receipts)
    }
}

#[async_trait]
impl ChainQueryClient for EvmChainClient {
    async fn chain_status(&self) -> Result<ChainStatus> {
        let best = self.best_height().await?;
        let lib = self
            .finalized_height()
            .await
            .unwrap_or_else(|| best.saturating_sub(self.confirm_blocks))
            .min(best);
        let lib = self.last_lib.fetch_max(lib, Ordering::SeqCst).max(lib);

        Ok(ChainStatus {
            best_height: best,
            lib_height: lib,
        })
    }

    async fn query_transactions_by_height(&self, height: u64) -> Result<BlockWithTransactions> {
        let block = self.block_by_height(height).await?;
        let receipts = self.receipts(height, &block).await?;
        let transactions = transactions(&block)
            .iter()
            .map(|tx| transaction_record(tx, &receipts))
            .collect::<Result<Vec<_>>>()?;

        Ok(BlockWithTransactions {
            block: block_record(block)?,
            transactions,
        })
    }

    async fn query_blocks_and_txs_by_bloom(
        &self,
        height: u64,
        listeners: &[Listener],
    ) -> Result<TaggedBlockWithTransactions> {
        let compiled;
        let filters: &[CompiledFilter] = if self.is_compiled_for(listeners) {
            &self.filters
        } else {
            compiled = CompiledFilter::compile_all(listeners)?;
            &compiled
        };
        let block = self.block_by_height(height).await?;
        let bloom = block_bloom(&block)?;

        let candidates: Vec<&CompiledFilter> = filters
            .iter()
            .filter(|filter| filter.may_match_bloom(&bloom))
            .collect();

        let mut tagged_txs = Vec::new();
        if !candidates.is_empty() {
            let receipts = self.receipts(height, &block).await?;
            for tx in transactions(&block) {
                let Some(receipt) = tx
                    .get("hash")
                    .and_then(Value::as_str)
                    .and_then(|hash| receipts.get(hash))
                else {
                    continue;
                };
                let scan_tags: Vec<String> = candidates
                    .iter()
                    .filter(|filter| filter.matches_receipt(receipt))
                    .map(|filter| filter.tag.clone())
                    .collect();
                if !scan_tags.is_empty() {
                    tagged_txs.push(TaggedTransaction {
                        transaction: transaction_record(tx, &receipts)?,
                        scan_tags,
                    });
                }
            }
        }

        debug!(
            height,
            tags = candidates.len(),
            txs = tagged_txs.len(),
            "🌸 Bloom scan"
        );

        Ok(TaggedBlockWithTransactions {
            block: TaggedBlock {
                scan_tags: candidates.iter().map(|filter| filter.tag.clone()).collect(),
                block: block_record(block)?,
            },
            transactions: tagged_txs,
        })
    }
}

fn hex_height(height: u64) -> String {
    format!("0x{:x}", height)
}

fn is_unsupported(message: &str) -> bool {
    message.contains("-32601") || message.contains("Method not found") || message.contains("-32602")
}

fn block_number(block: &Value) -> Result<u64> {
    let raw = block
        .get("number")
        .and_then(Value::as_str)
        .context("Block has no number")?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid block number: {}", raw))
}

fn transactions(block: &Value) -> &[Value] {
    block
        .get("transactions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn block_record(block: Value) -> Result<BlockRecord> {
    let height = block_number(&block)?;
    let hash = block
        .get("hash")
        .and_then(Value::as_str)
        .with_context(|| format!("Block {} has no hash", height))?
        .to_string();
    Ok(BlockRecord {
        height,
        hash,
        data: block,
    })
}

fn transaction_record(tx: &Value, receipts: &HashMap<String, Value>) -> Result<TransactionRecord> {
    let hash = tx
        .get("hash")
        .and_then(Value::as_str)
        .context("Transaction has no hash")?;
    let receipt = receipts.get(hash).cloned().unwrap_or(Value::Null);
    Ok(TransactionRecord {
        hash: hash.to_string(),
        data: json!({ "transaction": tx, "receipt": receipt }),
    })
}
