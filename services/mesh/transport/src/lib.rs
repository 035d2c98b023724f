//! Mesh transport adapters for meshtalk.
//!
//! The chat core never talks to a radio directly. It consumes the small
//! [`MeshTransport`] contract: best-effort unicast, best-effort broadcast, and
//! a single inbound channel of raw frames that have passed transport-level
//! validation but not yet the application checksum.
//!
//! Two adapters are provided:
//!
//! - [`LoopbackMesh`] - in-process mesh for tests and local demos
//! - [`UdpMesh`] - one UDP socket per node, standing in for the radio link
//!
//! Every constructor returns the transport together with the receiving half
//! of its inbound channel. There is exactly one receiver per transport.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod loopback;
pub mod udp;

use async_trait::async_trait;
use bytes::Bytes;

pub use error::TransportError;
pub use loopback::{LoopbackMesh, LoopbackTransport};
pub use udp::{UdpMesh, UdpMeshConfig};

/// Largest frame a transport accepts (segmented access payload)
pub const MAX_APP_PAYLOAD: usize = 384;

/// All-nodes destination address
pub const BROADCAST_ADDRESS: u16 = 0xFFFF;

/// Address of a node that has not been provisioned yet
pub const UNASSIGNED_ADDRESS: u16 = 0x0000;

/// Default depth of the inbound frame queue
pub const DEFAULT_INBOUND_QUEUE: usize = 32;

/// A raw frame delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Frame bytes, checksum included
    pub bytes: Bytes,
    /// Transport-level source address, when the transport knows it
    pub src_address: Option<u16>,
}

/// Send side of a mesh transport
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Send a frame to one node
    async fn raw_send(&self, frame: Bytes, dst: u16) -> Result<(), TransportError>;

    /// Send a frame to every reachable node
    async fn raw_broadcast(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Maximum frame size accepted
    fn max_payload(&self) -> usize {
        MAX_APP_PAYLOAD
    }

    /// Transport name (for logging)
    fn name(&self) -> &str;
}

/// Reject frames larger than `max`
pub fn check_frame_size(len: usize, max: usize) -> Result<(), TransportError> {
    if len > max {
        return Err(TransportError::Oversize { size: len, max });
    }
    Ok(())
}
