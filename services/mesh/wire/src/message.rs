//! Domain message types carried over the mesh.

use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Width of the sender name field, and maximum display name length in bytes
pub const NAME_CAPACITY: usize = 10;

/// Message kinds
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Chat text addressed to one node
    Text = 1,
    /// Self-announcement carrying name and address, no payload
    Broadcast = 2,
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageKind::Text),
            2 => Ok(MessageKind::Broadcast),
            _ => Err(CodecError::UnknownKind(value)),
        }
    }
}

/// Display name bounded to [`NAME_CAPACITY`] bytes of UTF-8.
///
/// Construction never fails: input is cut at the first NUL and then truncated
/// on a char boundary so the stored name always fits the wire field.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    /// Build a name, truncating to capacity
    pub fn new(name: &str) -> Self {
        let name = match name.find('\0') {
            Some(nul) => &name[..nul],
            None => name,
        };
        Self(truncate_str(name, NAME_CAPACITY).to_string())
    }

    /// Build a name from raw wire bytes.
    ///
    /// Stops at the first NUL, then keeps the longest valid UTF-8 prefix.
    pub fn from_wire(field: &[u8]) -> Self {
        let field = &field[..field.len().min(NAME_CAPACITY)];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let bytes = &field[..end];
        let text = match std::str::from_utf8(bytes) {
            Ok(s) => s,
            // valid_up_to always lands on a char boundary
            Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
        };
        Self(text.to_string())
    }

    /// Name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name bytes (never more than [`NAME_CAPACITY`])
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Whether the name is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for DisplayName {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for DisplayName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<DisplayName> for String {
    fn from(value: DisplayName) -> Self {
        value.0
    }
}

impl PartialEq<str> for DisplayName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for DisplayName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Truncate a string to at most `max` bytes without splitting a char
pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Inline payload buffer, never spills to the heap
pub type Payload = SmallVec<[u8; MAX_PAYLOAD_SIZE]>;

/// A chat message as exchanged between nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message kind
    pub kind: MessageKind,
    /// Producer-assigned time value, not validated by receivers
    pub timestamp: u64,
    /// Display name of the originator
    pub sender_name: DisplayName,
    /// Mesh address of the originator
    pub sender_address: u16,
    /// Payload bytes (text for `Text`, empty for `Broadcast`)
    pub payload: Payload,
}

impl ChatMessage {
    /// Create a text message, truncating the text to [`MAX_PAYLOAD_SIZE`]
    pub fn text(timestamp: u64, sender_name: DisplayName, sender_address: u16, text: &str) -> Self {
        let text = truncate_str(text, MAX_PAYLOAD_SIZE);
        Self {
            kind: MessageKind::Text,
            timestamp,
            sender_name,
            sender_address,
            payload: SmallVec::from_slice(text.as_bytes()),
        }
    }

    /// Create a self-announcement
    pub fn broadcast(timestamp: u64, sender_name: DisplayName, sender_address: u16) -> Self {
        Self {
            kind: MessageKind::Broadcast,
            timestamp,
            sender_name,
            sender_address,
            payload: SmallVec::new(),
        }
    }

    /// Payload length as carried on the wire
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Payload decoded as text, replacing invalid UTF-8
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
