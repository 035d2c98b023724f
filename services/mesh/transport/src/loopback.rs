//! In-process mesh.
//!
//! A [`LoopbackMesh`] is a shared hub. Each attached node gets a
//! [`LoopbackTransport`] and the receiver of its inbound queue. Unicast
//! reaches only the addressed node; broadcast reaches every other node.

use crate::{
    check_frame_size, InboundFrame, MeshTransport, TransportError, BROADCAST_ADDRESS,
    DEFAULT_INBOUND_QUEUE, MAX_APP_PAYLOAD,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

struct Hub {
    nodes: DashMap<u16, mpsc::Sender<InboundFrame>>,
    link_down: AtomicBool,
    send_timeout: Duration,
    queue_depth: usize,
}

/// Shared in-process mesh
#[derive(Clone)]
pub struct LoopbackMesh {
    hub: Arc<Hub>,
}

impl Default for LoopbackMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackMesh {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_SEND_TIMEOUT, DEFAULT_INBOUND_QUEUE)
    }

    /// Create a mesh with a custom per-send timeout and queue depth
    pub fn with_settings(send_timeout: Duration, queue_depth: usize) -> Self {
        Self {
            hub: Arc::new(Hub {
                nodes: DashMap::new(),
                link_down: AtomicBool::new(false),
                send_timeout,
                queue_depth: queue_depth.max(1),
            }),
        }
    }

    /// Attach a node at `address`.
    ///
    /// Attaching an address twice replaces the earlier node's queue.
    pub fn attach(&self, address: u16) -> (LoopbackTransport, mpsc::Receiver<InboundFrame>) {
        let (tx, rx) = mpsc::channel(self.hub.queue_depth);
        if self.hub.nodes.insert(address, tx).is_some() {
            warn!("Loopback node 0x{:04X} re-attached", address);
        }
        debug!("Loopback node 0x{:04X} attached", address);

        let transport = LoopbackTransport {
            mesh: self.clone(),
            address,
            name: format!("loopback-{:04X}", address),
        };
        (transport, rx)
    }

    /// Remove the node at `address`
    pub fn detach(&self, address: u16) {
        if self.hub.nodes.remove(&address).is_some() {
            debug!("Loopback node 0x{:04X} detached", address);
        }
    }

    /// Number of attached nodes
    pub fn node_count(&self) -> usize {
        self.hub.nodes.len()
    }

    /// Simulate losing (or regaining) the radio link
    pub fn set_link_down(&self, down: bool) {
        self.hub.link_down.store(down, Ordering::Relaxed);
    }

    /// Deliver a raw frame to `dst` as if it came off the air
    pub async fn inject(&self, dst: u16, frame: InboundFrame) -> Result<(), TransportError> {
        self.deliver(dst, frame).await
    }

    async fn deliver(&self, dst: u16, frame: InboundFrame) -> Result<(), TransportError> {
        // Clone the sender out so no map guard is held across the await.
        let tx = self
            .hub
            .nodes
            .get(&dst)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::Unreachable(dst))?;

        match tokio::time::timeout(self.hub.send_timeout, tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.hub.nodes.remove(&dst);
                Err(TransportError::Unreachable(dst))
            }
            Err(_) => Err(TransportError::Timeout(self.hub.send_timeout)),
        }
    }

    fn check_link(&self) -> Result<(), TransportError> {
        if self.hub.link_down.load(Ordering::Relaxed) {
            return Err(TransportError::LinkDown);
        }
        Ok(())
    }
}

/// One node's handle on a [`LoopbackMesh`]
pub struct LoopbackTransport {
    mesh: LoopbackMesh,
    address: u16,
    name: String,
}

impl LoopbackTransport {
    /// Transport-level address of this node
    pub fn address(&self) -> u16 {
        self.address
    }

    /// The mesh this node is attached to
    pub fn mesh(&self) -> &LoopbackMesh {
        &self.mesh
    }
}

#[async_trait]
impl MeshTransport for LoopbackTransport {
    async fn raw_send(&self, frame: Bytes, dst: u16) -> Result<(), TransportError> {
        check_frame_size(frame.len(), MAX_APP_PAYLOAD)?;
        self.mesh.check_link()?;

        if dst == BROADCAST_ADDRESS {
            return self.raw_broadcast(frame).await;
        }

        trace!("{} -> 0x{:04X}: {} bytes", self.name, dst, frame.len());
        self.mesh
            .deliver(
                dst,
                InboundFrame {
                    bytes: frame,
                    src_address: Some(self.address),
                },
            )
            .await
    }

    async fn raw_broadcast(&self, frame: Bytes) -> Result<(), TransportError> {
        check_frame_size(frame.len(), MAX_APP_PAYLOAD)?;
        self.mesh.check_link()?;

        let targets: Vec<u16> = self
            .mesh
            .hub
            .nodes
            .iter()
            .map(|entry| *entry.key())
            .filter(|addr| *addr != self.address)
            .collect();

        trace!("{} broadcast to {} nodes: {} bytes", self.name, targets.len(), frame.len());
        let mut delivered = 0;
        let mut last_error = None;
        for dst in targets {
            let inbound = InboundFrame {
                bytes: frame.clone(),
                src_address: Some(self.address),
            };
            match self.mesh.deliver(dst, inbound).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!("{} broadcast to 0x{:04X} dropped: {}", self.name, dst, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.mesh.detach(self.address);
    }
}
