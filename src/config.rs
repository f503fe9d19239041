use anyhow::Result;
use config as config_loader;
use dotenvy::dotenv;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::core::error::ScanError;
use crate::core::scan_config::ScanConfig;
use crate::core::types::Listener;
use crate::utils::retry::RetryConfig;

/// Global config structure
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub storage: StorageConfig,
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// RPC related config
#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    pub url: String,
    #[serde(default = "RpcConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "RpcConfig::default_retry_base_delay_millis")]
    pub retry_base_delay_millis: u64,
}

impl RpcConfig {
    fn default_max_retries() -> u32 {
        3
    }
    fn default_retry_base_delay_millis() -> u64 {
        500
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_millis),
        )
    }
}

/// RocksDB storage config
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub path: String,
    #[serde(default = "StorageConfig::default_compression")]
    pub compression: bool,
}

impl StorageConfig {
    fn default_compression() -> bool {
        true
    }
}

/// Scanner task config
#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    pub chain_type: String,
    pub chain_name: String,
    /// "all" or "listener"
    #[serde(default = "ScannerConfig::default_scan_mode")]
    pub scan_mode: String,
    #[serde(default = "ScannerConfig::default_interval_millis")]
    pub interval_millis: u64,
    #[serde(default = "ScannerConfig::default_page_size")]
    pub page_size: usize,
    #[serde(default = "ScannerConfig::default_concurrent_query_limit")]
    pub concurrent_query_limit: usize,
    #[serde(default = "ScannerConfig::default_start_height")]
    pub start_height: u64,
    #[serde(default)]
    pub missing_height_list: Vec<u64>,
    #[serde(default = "ScannerConfig::default_max_insert_batch")]
    pub max_insert_batch: usize,
    #[serde(default)]
    pub listeners: Vec<Listener>,
    #[serde(default = "ScannerConfig::default_unconfirmed_block_buffer")]
    pub unconfirmed_block_buffer: u64,
    /// Blocks per second produced by the chain
    #[serde(default = "ScannerConfig::default_mined_speed")]
    pub mined_speed: f64,
    #[serde(default = "ScannerConfig::default_loop_coef")]
    pub loop_coef: f64,
    /// LIB depth used when the node has no `finalized` tag
    #[serde(default = "ScannerConfig::default_confirm_blocks")]
    pub confirm_blocks: u64,
}

impl ScannerConfig {
    fn default_scan_mode() -> String {
        "all".to_string()
    }
    fn default_interval_millis() -> u64 {
        4000
    }
    fn default_page_size() -> usize {
        100
    }
    fn default_concurrent_query_limit() -> usize {
        5
    }
    fn default_start_height() -> u64 {
        1
    }
    fn default_max_insert_batch() -> usize {
        200
    }
    fn default_unconfirmed_block_buffer() -> u64 {
        60
    }
    fn default_mined_speed() -> f64 {
        2.0
    }
    fn default_loop_coef() -> f64 {
        0.6
    }
    fn default_confirm_blocks() -> u64 {
        12
    }
}

impl TryFrom<&ScannerConfig> for ScanConfig {
    type Error = ScanError;

    fn try_from(cfg: &ScannerConfig) -> Result<Self, Self::Error> {
        ScanConfig::builder()
            .interval_millis(cfg.interval_millis)
            .page_size(cfg.page_size)
            .concurrent_query_limit(cfg.concurrent_query_limit)
            .start_height(cfg.start_height)
            .missing_height_list(cfg.missing_height_list.clone())
            .max_insert_batch(cfg.max_insert_batch)
            .scan_mode_str(&cfg.scan_mode)?
            .listeners(cfg.listeners.clone())
            .unconfirmed_block_buffer(cfg.unconfirmed_block_buffer)
            .mined_speed(cfg.mined_speed)
            .loop_coef(cfg.loop_coef)
            .build()
    }
}

/// Logging config
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default = "LoggingConfig::default_to_file")]
    pub to_file: bool,
    #[serde(default = "LoggingConfig::default_file_path")]
    pub file_path: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
    fn default_to_file() -> bool {
        true
    }
    fn default_file_path() -> String {
        "./logs/scanner.log".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            to_file: Self::default_to_file(),
            file_path: Self::default_file_path(),
        }
    }
}

/// Metrics config
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "MetricsConfig::default_enable")]
    pub enable: bool,
    #[serde(default = "MetricsConfig::default_prometheus_exporter_port")]
    pub prometheus_exporter_port: u16,
}

impl MetricsConfig {
    fn default_enable() -> bool {
        true
    }
    fn default_prometheus_exporter_port() -> u16 {
        9100
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable: Self::default_enable(),
            prometheus_exporter_port: Self::default_prometheus_exporter_port(),
        }
    }
}

/// Status API config
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "ApiConfig::default_enable")]
    pub enable: bool,
    #[serde(default = "ApiConfig::default_listen_addr")]
    pub listen_addr: String,
}

impl ApiConfig {
    fn default_enable() -> bool {
        true
    }
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable: Self::default_enable(),
            listen_addr: Self::default_listen_addr(),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenv().ok(); // Load the .env file

        if !path.as_ref().exists() {
            anyhow::bail!("Config file not found: {:?}", path.as_ref());
        }

        let builder = config_loader::Config::builder()
            .add_source(config_loader::File::from(path.as_ref().to_path_buf()))
            .add_source(config_loader::Environment::with_prefix("SCANNER").separator("__"))
            .build()?;

        Ok(builder.try_deserialize::<AppConfig>()?)
    }

    pub fn scan_config(&self) -> Result<ScanConfig> {
        Ok(ScanConfig::try_from(&self.scanner)?)
    }
}
