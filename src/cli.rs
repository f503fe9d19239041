use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "scanner",
    version,
    about = "LIB-aware block scanner: missing heights, gap backfill, then tip polling"
)]
pub struct Cli {
    /// Config file path
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start scanning (default)
    Run,
    /// Validate the config file and print the effective scan settings
    Check,
}
