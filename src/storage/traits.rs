use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};

pub trait KVStorage: Send + Sync {
    fn init(&self) -> Result<()>;

    // Basic string operations
    fn write(&self, key: &str, value: &str) -> Result<()>;
    fn read(&self, key: &str) -> Result<Option<String>>;

    // JSON serialization/deserialization
    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()>;
    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>>;

    /// Atomic multi-key write, `deletes` removed in the same batch
    fn batch_write_delete(&self, pairs: Vec<(String, String)>, deletes: Vec<String>) -> Result<()>;

    /// Ordered key range starting at `prefix`
    fn scan_prefix(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<(String, String)>>;

    /// Ordered keys in `[from, to]`
    fn scan_range(&self, from: &str, to: &str) -> Result<Vec<(String, String)>>;

    /// Persist buffered writes
    fn flush(&self) -> Result<()>;
}
