//! UDP stand-in for the radio link.
//!
//! Each node binds one socket. A datagram carries a 4-byte envelope in front
//! of the application frame:
//!
//! ```text
//! | src: u16 BE | dst: u16 BE | frame ... |
//! ```
//!
//! Peers are a static map from mesh address to socket address. There is no
//! relaying: a frame reaches a node only if the sender lists it as a peer.

use crate::{
    check_frame_size, InboundFrame, MeshTransport, TransportError, BROADCAST_ADDRESS,
    DEFAULT_INBOUND_QUEUE, MAX_APP_PAYLOAD,
};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Size of the src/dst envelope
pub const ENVELOPE_SIZE: usize = 4;

const RECV_BUFFER_SIZE: usize = ENVELOPE_SIZE + MAX_APP_PAYLOAD + 64;

const RECV_BACKOFF_MIN: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay between failed socket reads, doubling up to a cap
#[derive(Debug)]
struct RecvBackoff {
    next: Duration,
}

impl RecvBackoff {
    fn new() -> Self {
        Self {
            next: RECV_BACKOFF_MIN,
        }
    }

    fn on_error(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(RECV_BACKOFF_MAX);
        delay
    }

    fn on_success(&mut self) {
        self.next = RECV_BACKOFF_MIN;
    }
}

/// UDP mesh settings
#[derive(Debug, Clone)]
pub struct UdpMeshConfig {
    /// Local bind address
    pub listen: SocketAddr,
    /// This node's mesh address
    pub local_address: u16,
    /// Known peers by mesh address
    pub peers: HashMap<u16, SocketAddr>,
    /// Per-datagram send timeout
    pub send_timeout: Duration,
    /// Inbound queue depth
    pub inbound_queue: usize,
}

impl Default for UdpMeshConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            local_address: 0,
            peers: HashMap::new(),
            send_timeout: Duration::from_secs(1),
            inbound_queue: DEFAULT_INBOUND_QUEUE,
        }
    }
}

/// Mesh transport over a UDP socket
pub struct UdpMesh {
    socket: Arc<UdpSocket>,
    local_address: Arc<AtomicU16>,
    peers: DashMap<u16, SocketAddr>,
    send_timeout: Duration,
    name: String,
    reader: JoinHandle<()>,
}

impl UdpMesh {
    /// Bind the socket and start the reader task
    pub async fn bind(
        config: UdpMeshConfig,
    ) -> Result<(Self, mpsc::Receiver<InboundFrame>), TransportError> {
        let socket = Arc::new(UdpSocket::bind(config.listen).await?);
        let bound = socket.local_addr()?;
        info!(
            "UDP mesh node 0x{:04X} listening on {} with {} peers",
            config.local_address,
            bound,
            config.peers.len()
        );

        let local_address = Arc::new(AtomicU16::new(config.local_address));
        let (tx, rx) = mpsc::channel(config.inbound_queue.max(1));
        let reader = tokio::spawn(Self::read_loop(
            socket.clone(),
            local_address.clone(),
            tx,
        ));

        let mesh = Self {
            socket,
            local_address,
            peers: config.peers.into_iter().collect(),
            send_timeout: config.send_timeout,
            name: format!("udp-{}", bound),
            reader,
        };
        Ok((mesh, rx))
    }

    /// Bound socket address
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// This node's mesh address
    pub fn local_address(&self) -> u16 {
        self.local_address.load(Ordering::Relaxed)
    }

    /// Change this node's mesh address (after provisioning)
    pub fn set_local_address(&self, address: u16) {
        self.local_address.store(address, Ordering::Relaxed);
        info!("UDP mesh local address set to 0x{:04X}", address);
    }

    /// Add or replace a peer
    pub fn add_peer(&self, address: u16, socket: SocketAddr) {
        self.peers.insert(address, socket);
        debug!("Added peer 0x{:04X} at {}", address, socket);
    }

    /// Forget a peer
    pub fn remove_peer(&self, address: u16) {
        self.peers.remove(&address);
    }

    /// Number of known peers
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn envelope(&self, dst: u16, frame: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENVELOPE_SIZE + frame.len());
        buf.put_u16(self.local_address());
        buf.put_u16(dst);
        buf.put_slice(frame);
        buf.freeze()
    }

    async fn send_datagram(&self, datagram: &[u8], to: SocketAddr) -> Result<(), TransportError> {
        match tokio::time::timeout(self.send_timeout, self.socket.send_to(datagram, to)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::Timeout(self.send_timeout)),
        }
    }

    async fn read_loop(
        socket: Arc<UdpSocket>,
        local_address: Arc<AtomicU16>,
        tx: mpsc::Sender<InboundFrame>,
    ) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut backoff = RecvBackoff::new();
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(r) => {
                    backoff.on_success();
                    r
                }
                Err(e) => {
                    let delay = backoff.on_error();
                    error!("UDP receive failed: {} (retrying in {:?})", e, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            if len < ENVELOPE_SIZE {
                debug!("Dropping {} byte datagram from {}: no envelope", len, from);
                continue;
            }

            let src = u16::from_be_bytes([buf[0], buf[1]]);
            let dst = u16::from_be_bytes([buf[2], buf[3]]);
            let me = local_address.load(Ordering::Relaxed);
            if dst != me && dst != BROADCAST_ADDRESS {
                trace!("Ignoring datagram for 0x{:04X} (we are 0x{:04X})", dst, me);
                continue;
            }

            let frame = InboundFrame {
                bytes: Bytes::copy_from_slice(&buf[ENVELOPE_SIZE..len]),
                src_address: Some(src),
            };
            if tx.send(frame).await.is_err() {
                debug!("Inbound receiver dropped, stopping UDP reader");
                break;
            }
        }
    }
}

#[async_trait]
impl MeshTransport for UdpMesh {
    async fn raw_send(&self, frame: Bytes, dst: u16) -> Result<(), TransportError> {
        check_frame_size(frame.len(), MAX_APP_PAYLOAD)?;
        if dst == BROADCAST_ADDRESS {
            return self.raw_broadcast(frame).await;
        }

        let to = self
            .peers
            .get(&dst)
            .map(|entry| *entry.value())
            .ok_or(TransportError::Unreachable(dst))?;

        trace!("{} -> 0x{:04X} ({}): {} bytes", self.name, dst, to, frame.len());
        self.send_datagram(&self.envelope(dst, &frame), to).await
    }

    async fn raw_broadcast(&self, frame: Bytes) -> Result<(), TransportError> {
        check_frame_size(frame.len(), MAX_APP_PAYLOAD)?;

        let datagram = self.envelope(BROADCAST_ADDRESS, &frame);
        let targets: Vec<(u16, SocketAddr)> = self
            .peers
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        let sends = targets
            .iter()
            .map(|(_, to)| self.send_datagram(&datagram, *to));
        let results = futures::future::join_all(sends).await;

        let mut delivered = 0;
        let mut last_error = None;
        for ((addr, _), result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("{} broadcast to 0x{:04X} failed: {}", self.name, addr, e);
                    last_error = Some(e);
                }
            }
        }

        // Best-effort: one reached peer is a success
        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for UdpMesh {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
