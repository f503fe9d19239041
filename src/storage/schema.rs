// Key naming conventions for the RocksDB sink
pub mod keys {
    /// Sink progress key suffix: "{chain}:progress"
    pub const PROGRESS_PREFIX: &str = "progress";

    /// Block key segment: "{chain}:block:{height}"
    pub const BLOCK_PREFIX: &str = "block";

    /// Heights are zero padded so that prefix scans come back in height order.
    const HEIGHT_WIDTH: usize = 12;

    // example: ethereum:progress
    pub fn progress_key(chain: &str) -> String {
        format!("{}:{}", chain, PROGRESS_PREFIX)
    }

    // example: ethereum:block:
    pub fn block_prefix(chain: &str) -> String {
        format!("{}:{}:", chain, BLOCK_PREFIX)
    }

    // example: ethereum:block:000001000000
    pub fn block_key(chain: &str, height: u64) -> String {
        format!("{}{:0width$}", block_prefix(chain), height, width = HEIGHT_WIDTH)
    }

    // example: ethereum:swap:block:
    pub fn listener_block_prefix(chain: &str, tag: &str) -> String {
        format!("{}:{}:{}:", chain, tag, BLOCK_PREFIX)
    }

    // example: ethereum:swap:block:000001000000
    pub fn listener_block_key(chain: &str, tag: &str, height: u64) -> String {
        format!(
            "{}{:0width$}",
            listener_block_prefix(chain, tag),
            height,
            width = HEIGHT_WIDTH
        )
    }
}

// Data version management
pub const SCHEMA_VERSION: u32 = 1;
