pub mod client;
pub mod error;
pub mod fetcher;
pub mod merger;
pub mod planner;
pub mod scan_config;
pub mod scanner;
pub mod scheduler;
pub mod sink;
pub mod types;
