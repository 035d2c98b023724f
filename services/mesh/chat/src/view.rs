//! UI view state consumed by the chat core: which conversation is open and
//! which contacts have unread messages.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Open conversation and per-slot unread flags
#[derive(Debug)]
pub struct ViewState {
    open: RwLock<Option<usize>>,
    unread: Vec<AtomicBool>,
}

impl ViewState {
    /// Create view state for `slots` contacts
    pub fn new(slots: usize) -> Self {
        Self {
            open: RwLock::new(None),
            unread: (0..slots.max(1)).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Open the conversation at `index` and mark it read
    pub async fn open(&self, index: usize) {
        *self.open.write().await = Some(index);
        self.mark_read(index);
    }

    /// Close whatever conversation is open
    pub async fn close(&self) {
        *self.open.write().await = None;
    }

    /// Slot of the open conversation
    pub async fn open_index(&self) -> Option<usize> {
        *self.open.read().await
    }

    /// Record an incoming message for `index`.
    ///
    /// Returns true when the message was flagged unread, i.e. its
    /// conversation is not the one on screen.
    pub async fn mark_incoming(&self, index: usize) -> bool {
        if self.open_index().await == Some(index) {
            self.mark_read(index);
            return false;
        }
        match self.unread.get(index) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Clear the unread flag of `index`
    pub fn mark_read(&self, index: usize) {
        if let Some(flag) = self.unread.get(index) {
            flag.store(false, Ordering::Relaxed);
        }
    }

    /// Whether `index` has unread messages
    pub fn has_unread(&self, index: usize) -> bool {
        self.unread
            .get(index)
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Close the open conversation and clear every flag
    pub async fn reset(&self) {
        self.close().await;
        self.unread
            .iter()
            .for_each(|flag| flag.store(false, Ordering::Relaxed));
    }
}
