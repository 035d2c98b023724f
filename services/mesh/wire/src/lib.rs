//! Chat message wire codec and CRC-16 frame checksum for meshtalk.
//!
//! This crate is the leaf of the chat stack. It defines the domain message
//! exchanged between nodes, its fixed binary layout, and the checksum used to
//! protect a frame on the mesh. It has no knowledge of contacts, history or
//! transports.
//!
//! ## Wire Format
//!
//! ```text
//! +---------------------+---------------------------------+
//! | u8 type             | 1 = text, 2 = broadcast         |
//! +---------------------+---------------------------------+
//! | u64 timestamp       | little-endian                   |
//! +---------------------+---------------------------------+
//! | sender_name (10B)   | zero padded, not NUL-guaranteed |
//! +---------------------+---------------------------------+
//! | u16 sender_address  | big-endian                      |
//! +---------------------+---------------------------------+
//! | u8 payload_len      | 0..255                          |
//! +---------------------+---------------------------------+
//! | payload             | payload_len bytes               |
//! +---------------------+---------------------------------+
//! | u16 checksum        | big-endian CRC-16, added by the |
//! |                     | router over all preceding bytes |
//! +---------------------+---------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod codec;
pub mod error;
pub mod message;

// Re-export main types
pub use checksum::{crc16, Crc16, CHECKSUM_SIZE};
pub use codec::{decode, encode, encode_into, encoded_len, HEADER_SIZE, MAX_ENCODED_SIZE};
pub use error::CodecError;
pub use message::{
    truncate_str, ChatMessage, DisplayName, MessageKind, Payload, MAX_PAYLOAD_SIZE, NAME_CAPACITY,
};

/// Smallest valid frame: header plus checksum
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Largest valid frame: full payload plus checksum
pub const MAX_FRAME_SIZE: usize = MAX_ENCODED_SIZE + CHECKSUM_SIZE;
