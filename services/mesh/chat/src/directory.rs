//! Bounded contact directory.
//!
//! A fixed number of slots, each either free or holding one contact. Slots
//! are filled in order and never freed individually; only [`ContactDirectory::clear`]
//! empties them. A slot's index is stable for its lifetime and is how chat
//! history and unread flags refer to the contact.

use crate::error::DirectoryError;
use meshtalk_storage::{ContactMirror, StoredContact};
use meshtalk_wire::DisplayName;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Default number of contact slots
pub const DEFAULT_CAPACITY: usize = 3;

/// Default bound on waiting for a table lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// A live directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Display name
    pub name: DisplayName,
    /// Mesh address
    pub address: u16,
}

impl From<&Contact> for StoredContact {
    fn from(contact: &Contact) -> Self {
        StoredContact {
            name: contact.name.to_string(),
            address: contact.address,
        }
    }
}

/// Result of [`ContactDirectory::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New contact stored at this slot
    Added(usize),
    /// Existing contact at this slot renamed
    Updated(usize),
    /// Contact already present with this name
    Unchanged(usize),
    /// No free slot; nothing changed
    Full,
    /// Empty name; nothing changed
    Rejected,
}

impl UpsertOutcome {
    /// Slot holding the contact, unless the table was full
    pub fn index(&self) -> Option<usize> {
        match *self {
            UpsertOutcome::Added(i) | UpsertOutcome::Updated(i) | UpsertOutcome::Unchanged(i) => {
                Some(i)
            }
            UpsertOutcome::Full | UpsertOutcome::Rejected => None,
        }
    }

    /// Whether the table changed
    pub fn is_mutation(&self) -> bool {
        matches!(self, UpsertOutcome::Added(_) | UpsertOutcome::Updated(_))
    }
}

/// Bounded name/address table shared by the inbound and UI paths
pub struct ContactDirectory {
    slots: Mutex<Vec<Option<Contact>>>,
    capacity: usize,
    lock_timeout: Duration,
    mirror: Option<ContactMirror>,
    // Bumped under the table lock on every change; a mirror write carrying
    // an older value is stale and skipped.
    generation: AtomicU64,
    mirror_lock: Mutex<()>,
}

impl ContactDirectory {
    /// Create an empty directory with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(vec![None; capacity]),
            capacity,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            mirror: None,
            generation: AtomicU64::new(0),
            mirror_lock: Mutex::new(()),
        }
    }

    /// Mirror every change into persistent storage
    pub fn with_mirror(mut self, mirror: ContactMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Override the lock timeout
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Vec<Option<Contact>>>, DirectoryError> {
        tokio::time::timeout(self.lock_timeout, self.slots.lock())
            .await
            .map_err(|_| DirectoryError::Busy(self.lock_timeout))
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live contacts
    pub async fn len(&self) -> Result<usize, DirectoryError> {
        Ok(self.lock().await?.iter().flatten().count())
    }

    /// Whether no slot is occupied
    pub async fn is_empty(&self) -> Result<bool, DirectoryError> {
        Ok(self.len().await? == 0)
    }

    /// Insert a contact, or rename the one already holding `address`.
    ///
    /// Address decides identity: a colliding name under a different address
    /// still gets its own slot. An empty name is never stored.
    pub async fn upsert(
        &self,
        name: &DisplayName,
        address: u16,
    ) -> Result<UpsertOutcome, DirectoryError> {
        let (outcome, snapshot) = {
            let mut slots = self.lock().await?;
            let outcome = Self::upsert_locked(&mut slots, name, address);
            let snapshot = outcome.is_mutation().then(|| {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                (generation, Self::stored(&slots))
            });
            (outcome, snapshot)
        };

        match outcome {
            UpsertOutcome::Added(i) => {
                info!("Added contact {} (0x{:04X}) at slot {}", name, address, i)
            }
            UpsertOutcome::Updated(i) => {
                info!("Renamed contact 0x{:04X} to {} at slot {}", address, name, i)
            }
            UpsertOutcome::Unchanged(_) => {
                debug!("Contact {} (0x{:04X}) unchanged", name, address)
            }
            UpsertOutcome::Full => {
                warn!("Contact directory full, cannot add {} (0x{:04X})", name, address)
            }
            UpsertOutcome::Rejected => {
                warn!("Invalid contact name from 0x{:04X}, not stored", address)
            }
        }

        if let Some((generation, contacts)) = snapshot {
            self.save_mirror(&contacts, generation).await;
        }
        Ok(outcome)
    }

    fn upsert_locked(
        slots: &mut [Option<Contact>],
        name: &DisplayName,
        address: u16,
    ) -> UpsertOutcome {
        if name.is_empty() {
            return UpsertOutcome::Rejected;
        }

        if let Some(i) = Self::position(slots, |c| c.address == address) {
            if let Some(contact) = slots[i].as_mut() {
                if contact.name == *name {
                    return UpsertOutcome::Unchanged(i);
                }
                contact.name = name.clone();
            }
            return UpsertOutcome::Updated(i);
        }

        if let Some(other) = slots.iter().flatten().find(|c| c.name == *name) {
            warn!(
                "Name {} already used by 0x{:04X}, adding 0x{:04X} as a separate contact",
                name, other.address, address
            );
        }

        match slots.iter().position(Option::is_none) {
            Some(i) => {
                slots[i] = Some(Contact {
                    name: name.clone(),
                    address,
                });
                UpsertOutcome::Added(i)
            }
            None => UpsertOutcome::Full,
        }
    }

    fn position(slots: &[Option<Contact>], pred: impl Fn(&Contact) -> bool) -> Option<usize> {
        slots
            .iter()
            .position(|slot| slot.as_ref().map_or(false, &pred))
    }

    fn stored(slots: &[Option<Contact>]) -> Vec<StoredContact> {
        slots.iter().flatten().map(StoredContact::from).collect()
    }

    async fn save_mirror(&self, contacts: &[StoredContact], generation: u64) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let _writer = self.mirror_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Skipping stale contact snapshot (generation {})", generation);
            return;
        }
        if let Err(e) = mirror.save(contacts).await {
            warn!("Failed to persist contacts [{}]: {}", e.error_code(), e);
        }
    }

    /// Address of the first contact named `name` (exact, case-sensitive)
    pub async fn lookup_by_name(&self, name: &str) -> Result<Option<u16>, DirectoryError> {
        Ok(self.find_by_name(name).await?.map(|(_, contact)| contact.address))
    }

    /// Name of the contact at `address`
    pub async fn lookup_by_address(
        &self,
        address: u16,
    ) -> Result<Option<DisplayName>, DirectoryError> {
        let slots = self.lock().await?;
        Ok(Self::position(&slots, |c| c.address == address)
            .and_then(|i| slots[i].as_ref().map(|c| c.name.clone())))
    }

    /// Slot of the first contact named `name`
    pub async fn index_of_name(&self, name: &str) -> Result<Option<usize>, DirectoryError> {
        let slots = self.lock().await?;
        Ok(Self::position(&slots, |c| c.name == name))
    }

    /// Slot of the contact at `address`
    pub async fn index_of_address(&self, address: u16) -> Result<Option<usize>, DirectoryError> {
        let slots = self.lock().await?;
        Ok(Self::position(&slots, |c| c.address == address))
    }

    /// Slot and entry of the first contact named `name`, read under one lock
    pub async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<(usize, Contact)>, DirectoryError> {
        let slots = self.lock().await?;
        Ok(Self::position(&slots, |c| c.name == name)
            .and_then(|i| slots[i].clone().map(|c| (i, c))))
    }

    /// Entry at slot `index`
    pub async fn contact_at(&self, index: usize) -> Result<Option<Contact>, DirectoryError> {
        Ok(self.lock().await?.get(index).cloned().flatten())
    }

    /// Live contacts with their slots, in slot order
    pub async fn contacts(&self) -> Result<Vec<(usize, Contact)>, DirectoryError> {
        let slots = self.lock().await?;
        Ok(slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.clone().map(|c| (i, c)))
            .collect())
    }

    /// Live contact names, in slot order
    pub async fn names(&self) -> Result<Vec<DisplayName>, DirectoryError> {
        let slots = self.lock().await?;
        Ok(slots.iter().flatten().map(|c| c.name.clone()).collect())
    }

    /// Empty every slot and erase the mirrored copy.
    ///
    /// The in-memory clear stands even when the erase fails.
    pub async fn clear(&self) -> Result<(), DirectoryError> {
        {
            let mut slots = self.lock().await?;
            slots.iter_mut().for_each(|slot| *slot = None);
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        info!("Contact directory cleared");

        if let Some(mirror) = &self.mirror {
            let _writer = self.mirror_lock.lock().await;
            if let Err(e) = mirror.erase().await {
                warn!("Failed to erase persisted contacts [{}]: {}", e.error_code(), e);
            }
        }
        Ok(())
    }

    /// Restore contacts from the mirror.
    ///
    /// Returns how many entries were loaded. Missing or corrupt data loads
    /// nothing.
    pub async fn load_from_mirror(&self) -> Result<usize, DirectoryError> {
        let Some(mirror) = &self.mirror else {
            return Ok(0);
        };

        let stored = match mirror.load(self.capacity).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to load persisted contacts [{}]: {}", e.error_code(), e);
                return Ok(0);
            }
        };

        let mut slots = self.lock().await?;
        let mut loaded = 0;
        for contact in stored {
            let name = DisplayName::new(&contact.name);
            match Self::upsert_locked(&mut slots, &name, contact.address) {
                UpsertOutcome::Added(_) | UpsertOutcome::Updated(_) => loaded += 1,
                UpsertOutcome::Unchanged(_) => {}
                UpsertOutcome::Rejected => warn!("Skipping stored contact with an empty name"),
                UpsertOutcome::Full => break,
            }
        }
        info!("Restored {} contacts from storage", loaded);
        Ok(loaded)
    }
}

impl Default for ContactDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtalk_storage::{KvStore, MemoryKv};
    use std::sync::Arc;

    fn name(s: &str) -> DisplayName {
        DisplayName::new(s)
    }

    fn stored(name: &str, address: u16) -> StoredContact {
        StoredContact {
            name: name.to_string(),
            address,
        }
    }

    #[tokio::test]
    async fn test_upsert_add_update_unchanged() {
        let dir = ContactDirectory::new(3);

        assert_eq!(dir.upsert(&name("Alice"), 1).await.unwrap(), UpsertOutcome::Added(0));
        assert_eq!(dir.upsert(&name("Alice"), 1).await.unwrap(), UpsertOutcome::Unchanged(0));
        assert_eq!(dir.upsert(&name("Alicia"), 1).await.unwrap(), UpsertOutcome::Updated(0));

        assert_eq!(dir.lookup_by_address(1).await.unwrap(), Some(name("Alicia")));
        assert_eq!(dir.lookup_by_name("Alice").await.unwrap(), None);
        assert_eq!(dir.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_idempotent_contents() {
        let dir = ContactDirectory::new(3);
        dir.upsert(&name("Bob"), 2).await.unwrap();
        let before = dir.contacts().await.unwrap();
        assert_eq!(dir.upsert(&name("Bob"), 2).await.unwrap(), UpsertOutcome::Unchanged(0));
        assert_eq!(dir.contacts().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_capacity() {
        let dir = ContactDirectory::new(3);
        for (i, n) in ["A", "B", "C"].iter().enumerate() {
            assert_eq!(
                dir.upsert(&name(n), i as u16 + 1).await.unwrap(),
                UpsertOutcome::Added(i)
            );
        }
        assert_eq!(dir.upsert(&name("D"), 4).await.unwrap(), UpsertOutcome::Full);
        assert_eq!(dir.upsert(&name("E"), 5).await.unwrap(), UpsertOutcome::Full);

        let names: Vec<String> = dir
            .names()
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        // An existing address can still be renamed when full
        assert_eq!(dir.upsert(&name("Cee"), 3).await.unwrap(), UpsertOutcome::Updated(2));
    }

    #[tokio::test]
    async fn test_duplicate_names_keep_separate_slots() {
        let dir = ContactDirectory::new(3);
        dir.upsert(&name("Sam"), 0x0010).await.unwrap();
        assert_eq!(dir.upsert(&name("Sam"), 0x0020).await.unwrap(), UpsertOutcome::Added(1));

        assert_eq!(dir.len().await.unwrap(), 2);
        // First slot wins a name lookup
        assert_eq!(dir.lookup_by_name("Sam").await.unwrap(), Some(0x0010));
        assert_eq!(dir.index_of_address(0x0020).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_lookups_are_exact() {
        let dir = ContactDirectory::new(3);
        dir.upsert(&name("Alice"), 1).await.unwrap();

        assert_eq!(dir.index_of_name("Alice").await.unwrap(), Some(0));
        assert_eq!(dir.index_of_name("alice").await.unwrap(), None);
        assert_eq!(dir.index_of_name("Ali").await.unwrap(), None);
        assert_eq!(dir.lookup_by_address(9).await.unwrap(), None);
        assert_eq!(
            dir.find_by_name("Alice").await.unwrap(),
            Some((0, Contact { name: name("Alice"), address: 1 }))
        );
        assert_eq!(dir.contact_at(5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mirror_written_on_change_only() {
        let kv = Arc::new(MemoryKv::new());
        let dir = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv.clone()));

        dir.upsert(&name("Alice"), 1).await.unwrap();
        assert_eq!(kv.commit_count(), 1);
        dir.upsert(&name("Alice"), 1).await.unwrap();
        assert_eq!(kv.commit_count(), 1);
        dir.upsert(&name("Bob"), 2).await.unwrap();
        assert_eq!(kv.commit_count(), 2);

        let restored = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv.clone()));
        assert_eq!(restored.load_from_mirror().await.unwrap(), 2);
        assert_eq!(restored.contacts().await.unwrap(), dir.contacts().await.unwrap());
    }

    #[tokio::test]
    async fn test_mirror_failure_is_not_fatal() {
        let kv = Arc::new(MemoryKv::new());
        let dir = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv.clone()));
        kv.set_fail_writes(true);

        assert_eq!(dir.upsert(&name("Alice"), 1).await.unwrap(), UpsertOutcome::Added(0));
        dir.clear().await.unwrap();
        assert!(dir.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_erases_mirror() {
        let kv = Arc::new(MemoryKv::new());
        let dir = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv.clone()));
        dir.upsert(&name("Alice"), 1).await.unwrap();
        assert!(!kv.is_empty());

        dir.clear().await.unwrap();
        assert!(dir.is_empty().await.unwrap());
        assert!(kv.is_empty());
        assert_eq!(dir.upsert(&name("Bob"), 2).await.unwrap(), UpsertOutcome::Added(0));
    }

    #[tokio::test]
    async fn test_load_from_corrupt_mirror() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("user_count", b"garbage").await.unwrap();
        let dir = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv));
        assert_eq!(dir.load_from_mirror().await.unwrap(), 0);
        assert!(dir.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_without_mirror() {
        let dir = ContactDirectory::default();
        assert_eq!(dir.load_from_mirror().await.unwrap(), 0);
        assert_eq!(dir.capacity(), DEFAULT_CAPACITY);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let dir = ContactDirectory::new(3);
        assert_eq!(dir.upsert(&name(""), 5).await.unwrap(), UpsertOutcome::Rejected);
        assert_eq!(dir.upsert(&name("\0junk"), 6).await.unwrap(), UpsertOutcome::Rejected);
        assert!(dir.is_empty().await.unwrap());

        // Renaming a known address to nothing keeps the old name
        dir.upsert(&name("Alice"), 1).await.unwrap();
        assert_eq!(dir.upsert(&name(""), 1).await.unwrap(), UpsertOutcome::Rejected);
        assert_eq!(dir.lookup_by_address(1).await.unwrap(), Some(name("Alice")));
    }

    #[tokio::test]
    async fn test_load_skips_empty_names() {
        let kv = Arc::new(MemoryKv::new());
        let mirror = ContactMirror::new(kv.clone());
        mirror
            .save(&[stored("", 5), stored("Bob", 2)])
            .await
            .unwrap();

        let dir = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv));
        assert_eq!(dir.load_from_mirror().await.unwrap(), 1);
        assert_eq!(dir.lookup_by_name("Bob").await.unwrap(), Some(2));
        assert_eq!(dir.names().await.unwrap(), vec![name("Bob")]);
    }

    #[tokio::test]
    async fn test_snapshot_taken_before_clear_is_not_written() {
        let kv = Arc::new(MemoryKv::new());
        let dir = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv.clone()));
        dir.upsert(&name("Alice"), 1).await.unwrap();

        // An upsert that lost the race with clear still holds its old snapshot
        let stale_generation = dir.generation.load(Ordering::SeqCst);
        dir.clear().await.unwrap();
        dir.save_mirror(&[stored("Alice", 1)], stale_generation).await;

        assert!(kv.is_empty());
        let restored = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv));
        assert_eq!(restored.load_from_mirror().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_older_snapshot_does_not_overwrite_newer() {
        let kv = Arc::new(MemoryKv::new());
        let dir = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv.clone()));
        dir.upsert(&name("Alice"), 1).await.unwrap();
        let older = dir.generation.load(Ordering::SeqCst);
        dir.upsert(&name("Bob"), 2).await.unwrap();

        dir.save_mirror(&[stored("Alice", 1)], older).await;

        let restored = ContactDirectory::new(3).with_mirror(ContactMirror::new(kv));
        assert_eq!(restored.load_from_mirror().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_when_lock_held() {
        let dir = Arc::new(ContactDirectory::new(3).with_lock_timeout(Duration::from_millis(20)));
        let guard = dir.slots.lock().await;

        let err = dir.upsert(&name("Alice"), 1).await.unwrap_err();
        assert_eq!(err, DirectoryError::Busy(Duration::from_millis(20)));

        drop(guard);
        assert!(dir.upsert(&name("Alice"), 1).await.is_ok());
    }
}
