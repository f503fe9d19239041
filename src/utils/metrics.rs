use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::core::types::{ScanPhase, ScanType};

/// Installs the global Prometheus recorder with its scrape endpoint on `port`.
pub fn install_prometheus_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to install Prometheus exporter on {}", addr))
}

/// Abstraction over scan runtime metrics, allowing a no-op implementation when disabled.
pub trait ScanMetrics: Send + Sync {
    fn record_blocks_fetched(&self, count: usize);
    fn record_query_failure(&self);
    fn record_insert(&self, scan_type: ScanType, duration: Duration, block_count: usize);
    fn record_cursor(&self, current_queries: u64, best_height: u64);
    fn record_tick_skipped(&self);
    fn record_phase(&self, phase: ScanPhase);
    fn record_unconfirmed_window(&self, size: u64);
}

#[derive(Default)]
pub struct NoopScanMetrics;

impl NoopScanMetrics {
    pub fn new() -> Self {
        Self
    }
}

impl ScanMetrics for NoopScanMetrics {
    fn record_blocks_fetched(&self, _count: usize) {}

    fn record_query_failure(&self) {}

    fn record_insert(&self, _scan_type: ScanType, _duration: Duration, _block_count: usize) {}

    fn record_cursor(&self, _current_queries: u64, _best_height: u64) {}

    fn record_tick_skipped(&self) {}

    fn record_phase(&self, _phase: ScanPhase) {}

    fn record_unconfirmed_window(&self, _size: u64) {}
}

pub struct PrometheusScanMetrics {
    chain: String,
}

impl PrometheusScanMetrics {
    pub fn new(chain: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
        }
    }
}

impl ScanMetrics for PrometheusScanMetrics {
    fn record_blocks_fetched(&self, count: usize) {
        let chain = self.chain.clone();
        metrics::counter!(
            "scanner_blocks_fetched_total",
            count as u64,
            "chain" => chain
        );
    }

    fn record_query_failure(&self) {
        let chain = self.chain.clone();
        metrics::counter!(
            "scanner_query_failure_total",
            1,
            "chain" => chain
        );
    }

    fn record_insert(&self, scan_type: ScanType, duration: Duration, block_count: usize) {
        let chain = self.chain.clone();
        let scan_type = scan_type.as_str();
        metrics::histogram!(
            "scanner_insert_seconds",
            duration.as_secs_f64(),
            "chain" => chain.clone(),
            "scan_type" => scan_type
        );
        metrics::counter!(
            "scanner_inserted_blocks_total",
            block_count as u64,
            "chain" => chain,
            "scan_type" => scan_type
        );
    }

    fn record_cursor(&self, current_queries: u64, best_height: u64) {
        let chain = self.chain.clone();
        metrics::gauge!(
            "scanner_current_queries",
            current_queries as f64,
            "chain" => chain.clone()
        );
        metrics::gauge!(
            "scanner_sync_gap_blocks",
            best_height.saturating_sub(current_queries) as f64,
            "chain" => chain
        );
    }

    fn record_tick_skipped(&self) {
        let chain = self.chain.clone();
        metrics::counter!(
            "scanner_ticks_skipped_total",
            1,
            "chain" => chain
        );
    }

    fn record_phase(&self, phase: ScanPhase) {
        let chain = self.chain.clone();
        let code = match phase {
            ScanPhase::Init => 0.0,
            ScanPhase::Missing => 1.0,
            ScanPhase::Gap => 2.0,
            ScanPhase::Loop => 3.0,
            ScanPhase::Error => -1.0,
        };
        metrics::gauge!("scanner_phase", code, "chain" => chain);
    }

    fn record_unconfirmed_window(&self, size: u64) {
        let chain = self.chain.clone();
        metrics::gauge!(
            "scanner_unconfirmed_window_blocks",
            size as f64,
            "chain" => chain
        );
    }
}
