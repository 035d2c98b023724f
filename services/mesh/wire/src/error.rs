//! Wire codec error types.

use thiserror::Error;

/// Errors produced while encoding or decoding a chat message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before the layout was complete
    #[error("truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required to continue decoding
        needed: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Payload exceeds the 255-byte maximum
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Unknown message type tag
    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    /// Bytes left over after the declared payload
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

impl CodecError {
    /// Whether the input simply did not match the wire layout
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            CodecError::Truncated { .. }
                | CodecError::PayloadTooLarge(_)
                | CodecError::TrailingBytes(_)
        )
    }

    /// Stable code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            CodecError::Truncated { .. } => "TRUNCATED",
            CodecError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            CodecError::UnknownKind(_) => "UNKNOWN_KIND",
            CodecError::TrailingBytes(_) => "TRAILING_BYTES",
        }
    }
}
