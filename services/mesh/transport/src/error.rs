//! Transport error types.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by a mesh transport.
///
/// Callers treat every variant the same way: the send did not happen.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Frame larger than the transport's maximum application payload
    #[error("frame of {size} bytes exceeds transport maximum of {max} bytes")]
    Oversize {
        /// Frame size
        size: usize,
        /// Transport maximum
        max: usize,
    },

    /// The send did not complete in time
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// No route to the destination address
    #[error("destination 0x{0:04X} unreachable")]
    Unreachable(u16),

    /// The link is down
    #[error("link down")]
    LinkDown,

    /// The transport has been shut down
    #[error("transport closed")]
    Closed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether a later attempt could succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_) | TransportError::LinkDown | TransportError::Io(_)
        )
    }

    /// Stable code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::Oversize { .. } => "OVERSIZE",
            TransportError::Timeout(_) => "TIMEOUT",
            TransportError::Unreachable(_) => "UNREACHABLE",
            TransportError::LinkDown => "LINK_DOWN",
            TransportError::Closed => "CLOSED",
            TransportError::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retriable() {
        assert!(TransportError::Timeout(Duration::from_millis(5)).is_retriable());
        assert!(TransportError::LinkDown.is_retriable());
        assert!(!TransportError::Unreachable(2).is_retriable());
        assert!(!TransportError::Oversize { size: 400, max: 384 }.is_retriable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            TransportError::Unreachable(0x0002).to_string(),
            "destination 0x0002 unreachable"
        );
    }
}
