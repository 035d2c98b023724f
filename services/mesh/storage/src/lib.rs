//! Key-value persistence for meshtalk.
//!
//! This crate stands in for the flash key-value store a node mirrors its
//! contact table into. It provides a small [`KvStore`] trait with in-memory and
//! file backends, and [`ContactMirror`], which lays contacts out as one blob per
//! table index plus a separate count key.
//!
//! Persistence is best-effort everywhere: a missing or corrupt store loads as
//! empty and is never fatal to the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod mirror;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Stable code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::Io(_) => "IO_ERROR",
            StorageError::Corruption(_) => "CORRUPTION",
            StorageError::Backend(_) => "BACKEND_ERROR",
            StorageError::Serialization(_) => "SERIALIZATION",
        }
    }
}

/// Namespaced key-value store with explicit commit
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stage a value; visible to `get` immediately, durable after `commit`
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove every key in the namespace (durable immediately)
    async fn erase_all(&self) -> Result<(), StorageError>;

    /// Make staged writes durable
    async fn commit(&self) -> Result<(), StorageError>;
}

/// Storage backend configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StorageMode {
    /// In-memory storage (dev/tests only)
    InMemory,
    /// Single-file storage
    File {
        /// Path of the store file
        path: PathBuf,
    },
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::InMemory
    }
}

// Re-export backend implementations
pub use backend::file::FileKv;
pub use backend::mem::MemoryKv;
pub use mirror::{ContactMirror, StoredContact, USER_COUNT_KEY, USER_KEY_PREFIX};

/// Opened storage
#[derive(Clone)]
pub struct Storage {
    /// Underlying key-value namespace
    pub kv: Arc<dyn KvStore>,
}

impl Storage {
    /// Create storage from configuration
    pub async fn from_mode(mode: StorageMode) -> Result<Self, StorageError> {
        match mode {
            StorageMode::InMemory => Ok(Storage {
                kv: Arc::new(MemoryKv::new()),
            }),
            StorageMode::File { path } => Ok(Storage {
                kv: Arc::new(FileKv::open(path).await?),
            }),
        }
    }

    /// Contact mirror over this storage
    pub fn contact_mirror(&self) -> ContactMirror {
        ContactMirror::new(self.kv.clone())
    }
}
