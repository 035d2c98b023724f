//! Chat core error types.

use meshtalk_transport::TransportError;
use meshtalk_wire::CodecError;
use std::time::Duration;
use thiserror::Error;

/// Contact directory errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The table lock could not be taken in time; skip this cycle
    #[error("contact directory busy (lock not acquired within {0:?})")]
    Busy(Duration),
}

/// Chat history errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// The history lock could not be taken in time; skip this cycle
    #[error("chat history busy (lock not acquired within {0:?})")]
    Busy(Duration),
}

/// Message router errors
#[derive(Error, Debug)]
pub enum RouterError {
    /// Frame did not match the wire layout
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Trailing checksum disagrees with the frame body
    #[error("checksum mismatch: frame carries 0x{expected:04X}, body hashes to 0x{actual:04X}")]
    ChecksumMismatch {
        /// Checksum carried by the frame
        expected: u16,
        /// Checksum computed over the body
        actual: u16,
    },

    /// The transport did not take the frame
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RouterError {
    /// Stable code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            RouterError::Codec(e) => e.error_code(),
            RouterError::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            RouterError::Transport(e) => e.error_code(),
        }
    }

    /// Whether this is an integrity failure
    pub fn is_integrity(&self) -> bool {
        matches!(self, RouterError::ChecksumMismatch { .. })
    }
}

/// Application facade errors
#[derive(Error, Debug)]
pub enum AppError {
    /// No contact with this name
    #[error("unknown contact: {0}")]
    UnknownContact(String),

    /// The local node has no mesh address yet
    #[error("node not provisioned")]
    NotProvisioned,

    /// Contact directory unavailable
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Chat history unavailable
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Router failure
    #[error(transparent)]
    Router(#[from] RouterError),
}

impl AppError {
    /// Stable code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::UnknownContact(_) => "UNKNOWN_CONTACT",
            AppError::NotProvisioned => "NOT_PROVISIONED",
            AppError::Directory(_) | AppError::History(_) => "BUSY",
            AppError::Router(e) => e.error_code(),
        }
    }
}
