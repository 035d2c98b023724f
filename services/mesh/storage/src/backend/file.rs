//! File-based storage backend with checksummed snapshots

use crate::{KvStore, StorageError};
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Snapshot header: crc32 then body length, both little-endian
#[derive(Debug)]
struct SnapshotHeader {
    crc32: u32,
    len: u32,
}

impl SnapshotHeader {
    const SIZE: usize = 4 + 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.crc32);
        buf.put_u32_le(self.len);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, StorageError> {
        if buf.remaining() < Self::SIZE {
            return Err(StorageError::Corruption(
                "Incomplete snapshot header".to_string(),
            ));
        }

        Ok(Self {
            crc32: buf.get_u32_le(),
            len: buf.get_u32_le(),
        })
    }

    fn compute_crc(body: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(body);
        hasher.finalize()
    }
}

/// Key-value store persisted as a single snapshot file.
///
/// Writes are staged in memory and written on [`KvStore::commit`] through a
/// temporary file and rename, so a crash leaves either the old or the new
/// snapshot on disk.
pub struct FileKv {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FileKv {
    /// Open (or create) a store at `path`.
    ///
    /// A corrupt snapshot is logged and treated as empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let entries = if path.exists() {
            match Self::load_snapshot(&path) {
                Ok(entries) => {
                    info!("Loaded {} keys from {:?}", entries.len(), path);
                    entries
                }
                Err(e) => {
                    warn!("Ignoring unreadable store {:?}: {}", path, e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_snapshot(path: &Path) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        let content = std::fs::read(path)?;
        let mut buf = content.as_slice();
        let header = SnapshotHeader::decode(&mut buf)?;

        if buf.remaining() != header.len as usize {
            return Err(StorageError::Corruption(format!(
                "Snapshot length mismatch: header says {}, file has {}",
                header.len,
                buf.remaining()
            )));
        }
        if SnapshotHeader::compute_crc(buf) != header.crc32 {
            return Err(StorageError::Corruption("Snapshot crc mismatch".to_string()));
        }

        Ok(serde_json::from_slice(buf)?)
    }

    fn write_snapshot(
        path: &Path,
        entries: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), StorageError> {
        let body = serde_json::to_vec(entries)?;
        let header = SnapshotHeader {
            crc32: SnapshotHeader::compute_crc(&body),
            len: body.len() as u32,
        };

        let mut buf = BytesMut::with_capacity(SnapshotHeader::SIZE + body.len());
        header.encode(&mut buf);
        buf.put_slice(&body);

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &buf)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        debug!("FileKv set key={} len={}", key, value.len());
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn erase_all(&self) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        info!("Erased store {:?}", self.path);
        Ok(())
    }

    async fn commit(&self) -> Result<(), StorageError> {
        let entries = self.entries.lock().await;
        Self::write_snapshot(&self.path, &entries)?;
        debug!("FileKv committed {} keys to {:?}", entries.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_kv_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meshtalk.kv");

        let kv = FileKv::open(&path).await.unwrap();
        kv.set("user_0", b"alice").await.unwrap();
        kv.commit().await.unwrap();
        drop(kv);

        let kv = FileKv::open(&path).await.unwrap();
        assert_eq!(kv.get("user_0").await.unwrap(), Some(b"alice".to_vec()));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_not_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meshtalk.kv");

        let kv = FileKv::open(&path).await.unwrap();
        kv.set("user_0", b"alice").await.unwrap();
        drop(kv);

        let kv = FileKv::open(&path).await.unwrap();
        assert_eq!(kv.get("user_0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meshtalk.kv");

        let kv = FileKv::open(&path).await.unwrap();
        kv.set("user_count", b"1").await.unwrap();
        kv.commit().await.unwrap();
        drop(kv);

        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        let kv = FileKv::open(&path).await.unwrap();
        assert_eq!(kv.get("user_count").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meshtalk.kv");
        std::fs::write(&path, b"xx").unwrap();

        let kv = FileKv::open(&path).await.unwrap();
        assert_eq!(kv.get("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_erase_all_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meshtalk.kv");

        let kv = FileKv::open(&path).await.unwrap();
        kv.set("k", b"v").await.unwrap();
        kv.commit().await.unwrap();
        assert!(path.exists());

        kv.erase_all().await.unwrap();
        assert!(!path.exists());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
