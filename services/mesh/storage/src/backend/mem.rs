//! In-memory storage backend for development and testing

use crate::{KvStore, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// In-memory key-value store
#[derive(Default)]
pub struct MemoryKv {
    entries: Arc<DashMap<String, Vec<u8>>>,
    commits: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemoryKv {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Make every write and erase fail, to exercise best-effort callers
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::Backend("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.check_writable()?;
        debug!("KV set key={} len={}", key, value.len());
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn erase_all(&self) -> Result<(), StorageError> {
        self.check_writable()?;
        debug!("KV erase_all ({} keys)", self.entries.len());
        self.entries.clear();
        Ok(())
    }

    async fn commit(&self) -> Result<(), StorageError> {
        self.check_writable()?;
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
