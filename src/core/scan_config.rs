use std::collections::HashSet;
use std::time::Duration;

use crate::core::{
    error::{ScanError, ScanResult},
    types::{Listener, ScanMode},
};

/// Immutable options of one scan run. Only obtainable through
/// [`ScanConfigBuilder::build`], so every instance has passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    interval_millis: u64,
    page_size: usize,
    concurrent_query_limit: usize,
    start_height: u64,
    missing_height_list: Vec<u64>,
    max_insert_batch: usize,
    scan_mode: ScanMode,
    listeners: Vec<Listener>,
    unconfirmed_block_buffer: u64,
    mined_speed: f64,
    loop_coef: f64,
}

impl ScanConfig {
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }

    pub fn interval_millis(&self) -> u64 {
        self.interval_millis
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn concurrent_query_limit(&self) -> usize {
        self.concurrent_query_limit
    }

    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    pub fn missing_height_list(&self) -> &[u64] {
        &self.missing_height_list
    }

    pub fn max_insert_batch(&self) -> usize {
        self.max_insert_batch
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.scan_mode
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn unconfirmed_block_buffer(&self) -> u64 {
        self.unconfirmed_block_buffer
    }

    pub fn mined_speed(&self) -> f64 {
        self.mined_speed
    }

    pub fn loop_coef(&self) -> f64 {
        self.loop_coef
    }

    /// Blocks the chain must produce between two ticks before a tick is worth
    /// querying: `ceil(interval_ms * mined_speed * loop_coef / 1000)`.
    pub fn loop_skip_threshold(&self) -> u64 {
        let expected = self.interval_millis as f64 * self.mined_speed * self.loop_coef / 1000.0;
        expected.ceil() as u64
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_millis: 4000,
            page_size: 100,
            concurrent_query_limit: 5,
            start_height: 1,
            missing_height_list: Vec::new(),
            max_insert_batch: 200,
            scan_mode: ScanMode::All,
            listeners: Vec::new(),
            unconfirmed_block_buffer: 60,
            mined_speed: 2.0,
            loop_coef: 0.6,
        }
    }
}

/// Collects options, then validates them once in [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn interval_millis(mut self, interval_millis: u64) -> Self {
        self.config.interval_millis = interval_millis;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn concurrent_query_limit(mut self, limit: usize) -> Self {
        self.config.concurrent_query_limit = limit;
        self
    }

    pub fn start_height(mut self, start_height: u64) -> Self {
        self.config.start_height = start_height;
        self
    }

    pub fn missing_height_list(mut self, heights: Vec<u64>) -> Self {
        self.config.missing_height_list = heights;
        self
    }

    pub fn max_insert_batch(mut self, max_insert_batch: usize) -> Self {
        self.config.max_insert_batch = max_insert_batch;
        self
    }

    pub fn scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.config.scan_mode = scan_mode;
        self
    }

    /// Parses `"all"` / `"listener"` (case-insensitive).
    pub fn scan_mode_str(mut self, scan_mode: &str) -> ScanResult<Self> {
        self.config.scan_mode = parse_scan_mode(scan_mode)?;
        Ok(self)
    }

    pub fn listeners(mut self, listeners: Vec<Listener>) -> Self {
        self.config.listeners = listeners;
        self
    }

    pub fn unconfirmed_block_buffer(mut self, buffer: u64) -> Self {
        self.config.unconfirmed_block_buffer = buffer;
        self
    }

    pub fn mined_speed(mut self, mined_speed: f64) -> Self {
        self.config.mined_speed = mined_speed;
        self
    }

    pub fn loop_coef(mut self, loop_coef: f64) -> Self {
        self.config.loop_coef = loop_coef;
        self
    }

    pub fn build(self) -> ScanResult<ScanConfig> {
        let config = self.config;

        if config.interval_millis == 0 {
            return Err(ScanError::config("interval must be greater than zero"));
        }
        if config.page_size == 0 {
            return Err(ScanError::config("page_size must be greater than zero"));
        }
        if config.concurrent_query_limit == 0 {
            return Err(ScanError::config(
                "concurrent_query_limit must be greater than zero",
            ));
        }
        if config.max_insert_batch == 0 {
            return Err(ScanError::config(
                "max_insert_batch must be greater than zero",
            ));
        }
        if !config.mined_speed.is_finite() || config.mined_speed < 0.0 {
            return Err(ScanError::config(format!(
                "mined_speed must be a non-negative number, got {}",
                config.mined_speed
            )));
        }
        if !config.loop_coef.is_finite() || config.loop_coef < 0.0 {
            return Err(ScanError::config(format!(
                "loop_coef must be a non-negative number, got {}",
                config.loop_coef
            )));
        }

        let mut seen = HashSet::new();
        for listener in &config.listeners {
            if listener.tag.is_empty() {
                return Err(ScanError::config("listener tag cannot be empty"));
            }
            if !seen.insert(listener.tag.as_str()) {
                return Err(ScanError::config(format!(
                    "duplicate listener tag: {}",
                    listener.tag
                )));
            }
        }
        if config.scan_mode == ScanMode::Listener && config.listeners.is_empty() {
            return Err(ScanError::config(
                "listener scan mode requires at least one listener",
            ));
        }

        Ok(config)
    }
}

pub fn parse_scan_mode(value: &str) -> ScanResult<ScanMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "all" => Ok(ScanMode::All),
        "listener" => Ok(ScanMode::Listener),
        other => Err(ScanError::config(format!("unrecognized scan mode: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ListenerFilter;

    fn listener(tag: &str) -> Listener {
        Listener {
            tag: tag.to_string(),
            filter: ListenerFilter::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = ScanConfig::builder().build().expect("defaults must build");
        assert_eq!(config.interval(), Duration::from_millis(4000));
        assert_eq!(config.scan_mode(), ScanMode::All);
        assert_eq!(config.start_height(), 1);
        assert!(config.missing_height_list().is_empty());
    }

    #[test]
    fn skip_threshold_rounds_up() {
        let config = ScanConfig::builder()
            .interval_millis(4000)
            .mined_speed(2.0)
            .loop_coef(0.6)
            .build()
            .unwrap();
        assert_eq!(config.loop_skip_threshold(), 5);

        let config = ScanConfig::builder()
            .interval_millis(100)
            .mined_speed(2.0)
            .loop_coef(0.6)
            .build()
            .unwrap();
        assert_eq!(config.loop_skip_threshold(), 1);

        let config = ScanConfig::builder().loop_coef(0.0).build().unwrap();
        assert_eq!(config.loop_skip_threshold(), 0);
    }

    #[test]
    fn duplicate_listener_tags_are_rejected() {
        let err = ScanConfig::builder()
            .scan_mode(ScanMode::Listener)
            .listeners(vec![listener("swap"), listener("mint"), listener("swap")])
            .build()
            .expect_err("duplicate tags must fail");
        assert!(matches!(err, ScanError::Configuration(_)));
        assert!(err.to_string().contains("duplicate listener tag: swap"));
    }

    #[test]
    fn listener_mode_needs_listeners() {
        let err = ScanConfig::builder()
            .scan_mode(ScanMode::Listener)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("requires at least one listener"));
    }

    #[test]
    fn unknown_scan_mode_is_a_configuration_error() {
        let err = ScanConfig::builder()
            .scan_mode_str("everything")
            .unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));

        let builder = ScanConfig::builder().scan_mode_str(" Listener ").unwrap();
        let config = builder.listeners(vec![listener("a")]).build().unwrap();
        assert_eq!(config.scan_mode(), ScanMode::Listener);
    }

    #[test]
    fn genesis_start_height_is_accepted() {
        let config = ScanConfig::builder().start_height(0).build().unwrap();
        assert_eq!(config.start_height(), 0);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(ScanConfig::builder().max_insert_batch(0).build().is_err());
        assert!(ScanConfig::builder().concurrent_query_limit(0).build().is_err());
        assert!(ScanConfig::builder().page_size(0).build().is_err());
        assert!(ScanConfig::builder().interval_millis(0).build().is_err());
        assert!(ScanConfig::builder().mined_speed(f64::NAN).build().is_err());
        assert!(ScanConfig::builder().loop_coef(-1.0).build().is_err());
    }
}
