//! Contact table mirror over a [`KvStore`].
//!
//! Layout: `user_count` holds the number of saved contacts as an `i32`
//! little-endian, and `user_0 .. user_{n-1}` hold one JSON blob each.

use crate::{KvStore, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key holding the number of saved contacts
pub const USER_COUNT_KEY: &str = "user_count";

/// Prefix of the per-index contact keys
pub const USER_KEY_PREFIX: &str = "user_";

/// One persisted contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContact {
    /// Display name
    pub name: String,
    /// Mesh address
    pub address: u16,
}

/// Mirrors the contact table into a key-value namespace
#[derive(Clone)]
pub struct ContactMirror {
    store: Arc<dyn KvStore>,
}

impl ContactMirror {
    /// Create a mirror over `store`
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn user_key(index: usize) -> String {
        format!("{}{}", USER_KEY_PREFIX, index)
    }

    /// Save the live contacts, densely re-indexed from zero
    pub async fn save(&self, contacts: &[StoredContact]) -> Result<(), StorageError> {
        self.store
            .set(USER_COUNT_KEY, &(contacts.len() as i32).to_le_bytes())
            .await?;

        for (i, contact) in contacts.iter().enumerate() {
            let blob = serde_json::to_vec(contact)?;
            if let Err(e) = self.store.set(&Self::user_key(i), &blob).await {
                warn!("Error saving contact {}: {}", i, e);
                continue;
            }
            debug!("Saved contact {} (0x{:04X}) at key {}", contact.name, contact.address, i);
        }

        self.store.commit().await?;
        info!("Saved {} contacts", contacts.len());
        Ok(())
    }

    /// Load at most `limit` contacts.
    ///
    /// A missing count yields an empty list; unreadable entries are skipped.
    pub async fn load(&self, limit: usize) -> Result<Vec<StoredContact>, StorageError> {
        let count = match self.store.get(USER_COUNT_KEY).await? {
            Some(raw) if raw.len() == 4 => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            Some(raw) => {
                warn!("Ignoring malformed contact count ({} bytes)", raw.len());
                return Ok(Vec::new());
            }
            None => {
                info!("No contacts found in storage");
                return Ok(Vec::new());
            }
        };

        if count <= 0 {
            return Ok(Vec::new());
        }

        let mut contacts = Vec::new();
        for i in 0..count as usize {
            if contacts.len() >= limit {
                warn!("Stored contact count {} exceeds capacity {}", count, limit);
                break;
            }
            match self.store.get(&Self::user_key(i)).await {
                Ok(Some(blob)) => match serde_json::from_slice::<StoredContact>(&blob) {
                    Ok(contact) => contacts.push(contact),
                    Err(e) => warn!("Failed to decode contact {}: {}", i, e),
                },
                Ok(None) => warn!("Contact {} missing from storage", i),
                Err(e) => warn!("Failed to load contact {}: {}", i, e),
            }
        }

        info!("Loaded {} contacts from storage", contacts.len());
        Ok(contacts)
    }

    /// Erase the mirrored copy
    pub async fn erase(&self) -> Result<(), StorageError> {
        self.store.erase_all().await
    }
}
