//! Per-contact chat history.
//!
//! Each directory slot owns a ring of display-ready lines. Once a ring is
//! full the oldest line is overwritten, so only the last `depth` lines of a
//! conversation survive.

use crate::error::HistoryError;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Default lines kept per contact
pub const DEFAULT_DEPTH: usize = 6;

/// Marker prepended to lines this node sent
pub const OUTGOING_PREFIX: &str = "> ";

/// Default bound on waiting for the history lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct Ring {
    lines: Vec<String>,
    write_cursor: usize,
    count: usize,
}

impl Ring {
    fn new(depth: usize) -> Self {
        Self {
            lines: vec![String::new(); depth],
            write_cursor: 0,
            count: 0,
        }
    }

    fn depth(&self) -> usize {
        self.lines.len()
    }

    fn push(&mut self, line: String) {
        let depth = self.depth();
        self.lines[self.write_cursor] = line;
        self.write_cursor = (self.write_cursor + 1) % depth;
        self.count = (self.count + 1).min(depth);
    }

    /// Newest `max` lines, oldest first
    fn recent(&self, max: usize) -> Vec<String> {
        let depth = self.depth();
        let n = self.count.min(max);
        let start = (self.write_cursor + depth - n) % depth;
        (0..n)
            .map(|i| self.lines[(start + i) % depth].clone())
            .collect()
    }

    fn clear(&mut self) {
        self.lines.iter_mut().for_each(String::clear);
        self.write_cursor = 0;
        self.count = 0;
    }
}

/// Bounded chat logs, one per contact slot
pub struct ChatHistory {
    rings: Mutex<Vec<Ring>>,
    lock_timeout: Duration,
}

impl ChatHistory {
    /// Create logs for `slots` contacts keeping `depth` lines each (both at least one)
    pub fn new(slots: usize, depth: usize) -> Self {
        Self {
            rings: Mutex::new(vec![Ring::new(depth.max(1)); slots.max(1)]),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the lock timeout
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Vec<Ring>>, HistoryError> {
        tokio::time::timeout(self.lock_timeout, self.rings.lock())
            .await
            .map_err(|_| HistoryError::Busy(self.lock_timeout))
    }

    /// Append a line to a contact's log.
    ///
    /// An out-of-range index or empty text is ignored.
    pub async fn append(
        &self,
        contact_index: usize,
        text: &str,
        outgoing: bool,
    ) -> Result<(), HistoryError> {
        if text.is_empty() {
            return Ok(());
        }

        let mut rings = self.lock().await?;
        let Some(ring) = rings.get_mut(contact_index) else {
            debug!("Ignoring history append for slot {}", contact_index);
            return Ok(());
        };

        let line = if outgoing {
            format!("{}{}", OUTGOING_PREFIX, text)
        } else {
            text.to_string()
        };
        ring.push(line);
        debug!(
            "History slot {}: {} of {} lines",
            contact_index,
            ring.count,
            ring.depth()
        );
        Ok(())
    }

    /// Up to `max_count` most recent lines of a contact, oldest first
    pub async fn read_recent(
        &self,
        contact_index: usize,
        max_count: usize,
    ) -> Result<Vec<String>, HistoryError> {
        let rings = self.lock().await?;
        Ok(rings
            .get(contact_index)
            .map(|ring| ring.recent(max_count))
            .unwrap_or_default())
    }

    /// Number of lines stored for a contact
    pub async fn len(&self, contact_index: usize) -> Result<usize, HistoryError> {
        let rings = self.lock().await?;
        Ok(rings.get(contact_index).map_or(0, |ring| ring.count))
    }

    /// Empty every log
    pub async fn clear(&self) -> Result<(), HistoryError> {
        let mut rings = self.lock().await?;
        rings.iter_mut().for_each(Ring::clear);
        info!("Chat history cleared");
        Ok(())
    }
}
