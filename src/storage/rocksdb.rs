use std::sync::Arc;

use anyhow::{Context, Result};
use rocksdb::{DB, DBCompactionStyle, DBCompressionType, Direction, IteratorMode, Options, WriteBatch};
use serde::{Serialize, de::DeserializeOwned};

use crate::storage::traits::KVStorage;

#[derive(Clone)]
pub struct RocksDBStorage {
    db: Arc<DB>,
}

impl RocksDBStorage {
    pub fn new(path: &str) -> Result<Self> {
        Self::with_compression(path, true)
    }

    pub fn with_compression(path: &str, compression: bool) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Scanned blocks arrive in large sequential batches
        opts.set_write_buffer_size(128 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_target_file_size_base(256 * 1024 * 1024);
        opts.set_compaction_style(DBCompactionStyle::Universal);
        opts.set_max_background_jobs(4);

        if compression {
            opts.set_compression_type(DBCompressionType::Lz4);
        } else {
            opts.set_compression_type(DBCompressionType::None);
        }

        // Bound WAL growth between flushes
        opts.set_max_total_wal_size(512 * 1024 * 1024);
        opts.set_bytes_per_sync(8 * 1024 * 1024);
        opts.set_paranoid_checks(true);

        let db = DB::open(&opts, path)
            .with_context(|| format!("Failed to open RocksDB at path: {}", path))?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl KVStorage for RocksDBStorage {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .put(key.as_bytes(), value.as_bytes())
            .with_context(|| format!("Failed to write key: {}", key))
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.db.get(key.as_bytes())? {
            Some(value) => {
                let s = String::from_utf8(value)
                    .with_context(|| format!("Failed to parse value for key: {}", key))?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)
            .with_context(|| format!("Failed to serialize value for key: {}", key))?;
        self.write(key, &json)
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read(key)? {
            Some(json) => {
                let value = serde_json::from_str(&json)
                    .with_context(|| format!("Failed to deserialize value for key: {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn batch_write_delete(&self, pairs: Vec<(String, String)>, deletes: Vec<String>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for key in deletes {
            batch.delete(key.as_bytes());
        }
        for (key, value) in pairs {
            batch.put(key.as_bytes(), value.as_bytes());
        }
        self.db
            .write(batch)
            .context("Failed to execute batch write")
    }

    fn scan_prefix(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<(String, String)>> {
        let mut results = Vec::new();
        let prefix_bytes = prefix.as_bytes();

        let iter = self
            .db
            .iterator(IteratorMode::From(prefix_bytes, Direction::Forward));

        for item in iter {
            let (key, value) = item.context("Failed to read from iterator")?;
            if !key.starts_with(prefix_bytes) {
                break;
            }

            let key_str =
                String::from_utf8(key.to_vec()).context("Failed to parse key as UTF-8")?;
            let value_str =
                String::from_utf8(value.to_vec()).context("Failed to parse value as UTF-8")?;
            results.push((key_str, value_str));

            if let Some(limit) = limit
                && results.len() >= limit
            {
                break;
            }
        }

        Ok(results)
    }

    fn scan_range(&self, from: &str, to: &str) -> Result<Vec<(String, String)>> {
        let mut results = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(from.as_bytes(), Direction::Forward));

        for item in iter {
            let (key, value) = item.context("Failed to read from iterator")?;
            if &*key > to.as_bytes() {
                break;
            }
            let key_str =
                String::from_utf8(key.to_vec()).context("Failed to parse key as UTF-8")?;
            let value_str =
                String::from_utf8(value.to_vec()).context("Failed to parse value as UTF-8")?;
            results.push((key_str, value_str));
        }

        Ok(results)
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .context("Failed to flush database to disk")
    }
}
