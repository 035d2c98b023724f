//! Message router: framing, checksum and the inbound pump.
//!
//! Outbound, a message is encoded, a big-endian CRC-16 over the body is
//! appended, and the frame is handed to the transport. Inbound, a raw frame
//! is length-checked, checksum-verified and decoded before anything else
//! sees it; a frame that fails any step is dropped without touching shared
//! state.

use crate::error::RouterError;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use meshtalk_transport::{InboundFrame, MeshTransport};
use meshtalk_wire::{
    crc16, encode_into, encoded_len, ChatMessage, CodecError, CHECKSUM_SIZE, MIN_FRAME_SIZE,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receiver of accepted inbound messages
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one decoded message
    async fn on_message(&self, message: ChatMessage, src_address: Option<u16>);
}

/// Router counters
#[derive(Debug, Default)]
pub struct RouterStats {
    frames_in: AtomicU64,
    frames_accepted: AtomicU64,
    frames_out: AtomicU64,
    checksum_failures: AtomicU64,
    framing_errors: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStatsSnapshot {
    /// Raw frames received
    pub frames_in: u64,
    /// Frames that decoded cleanly
    pub frames_accepted: u64,
    /// Frames handed to the transport
    pub frames_out: u64,
    /// Frames dropped for a bad checksum
    pub checksum_failures: u64,
    /// Frames dropped for a bad layout
    pub framing_errors: u64,
    /// Sends the transport refused
    pub send_failures: u64,
}

impl RouterStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Encode a message and append its checksum
pub fn frame_message(message: &ChatMessage) -> Result<Bytes, RouterError> {
    let mut buf = BytesMut::with_capacity(encoded_len(message) + CHECKSUM_SIZE);
    encode_into(message, &mut buf)?;
    let checksum = crc16(&buf);
    buf.put_u16(checksum);
    Ok(buf.freeze())
}

/// Verify a frame's checksum and decode its body
pub fn unframe(raw: &[u8]) -> Result<ChatMessage, RouterError> {
    if raw.len() < MIN_FRAME_SIZE {
        return Err(CodecError::Truncated {
            needed: MIN_FRAME_SIZE,
            available: raw.len(),
        }
        .into());
    }

    let (body, trailer) = raw.split_at(raw.len() - CHECKSUM_SIZE);
    let expected = u16::from_be_bytes([trailer[0], trailer[1]]);
    let actual = crc16(body);
    if expected != actual {
        return Err(RouterError::ChecksumMismatch { expected, actual });
    }

    Ok(meshtalk_wire::decode(body)?)
}

/// Bridges chat messages to a [`MeshTransport`]
pub struct MessageRouter {
    transport: Arc<dyn MeshTransport>,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
    stats: RouterStats,
}

impl MessageRouter {
    /// Create a router over `transport`
    pub fn new(transport: Arc<dyn MeshTransport>) -> Self {
        Self {
            transport,
            handler: RwLock::new(None),
            stats: RouterStats::default(),
        }
    }

    /// Underlying transport
    pub fn transport(&self) -> &Arc<dyn MeshTransport> {
        &self.transport
    }

    /// Current counters
    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Install the single inbound handler, replacing any earlier one
    pub async fn register_receive_callback(&self, handler: Arc<dyn InboundHandler>) {
        if self.handler.write().await.replace(handler).is_some() {
            debug!("Replaced inbound handler");
        }
    }

    /// Frame `message` and send it to `dst`.
    ///
    /// The transport's outcome is returned as is; nothing is retried.
    pub async fn send(&self, message: &ChatMessage, dst: u16) -> Result<(), RouterError> {
        let frame = frame_message(message)?;
        let len = frame.len();
        match self.transport.raw_send(frame, dst).await {
            Ok(()) => {
                RouterStats::bump(&self.stats.frames_out);
                debug!("Sent {:?} frame ({} bytes) to 0x{:04X}", message.kind, len, dst);
                Ok(())
            }
            Err(e) => {
                RouterStats::bump(&self.stats.send_failures);
                warn!("Send to 0x{:04X} failed [{}]: {}", dst, e.error_code(), e);
                Err(e.into())
            }
        }
    }

    /// Frame `message` and send it to every reachable node
    pub async fn broadcast(&self, message: &ChatMessage) -> Result<(), RouterError> {
        let frame = frame_message(message)?;
        let len = frame.len();
        match self.transport.raw_broadcast(frame).await {
            Ok(()) => {
                RouterStats::bump(&self.stats.frames_out);
                debug!("Broadcast {:?} frame ({} bytes)", message.kind, len);
                Ok(())
            }
            Err(e) => {
                RouterStats::bump(&self.stats.send_failures);
                warn!("Broadcast failed [{}]: {}", e.error_code(), e);
                Err(e.into())
            }
        }
    }

    /// Validate and decode one raw frame
    pub fn process_incoming(&self, raw: &[u8]) -> Result<ChatMessage, RouterError> {
        RouterStats::bump(&self.stats.frames_in);
        match unframe(raw) {
            Ok(message) => {
                RouterStats::bump(&self.stats.frames_accepted);
                Ok(message)
            }
            Err(e) => {
                if e.is_integrity() {
                    RouterStats::bump(&self.stats.checksum_failures);
                } else {
                    RouterStats::bump(&self.stats.framing_errors);
                }
                Err(e)
            }
        }
    }

    /// Drain `inbound` until the transport closes it, handing accepted
    /// messages to the registered handler
    pub async fn run_inbound(&self, mut inbound: mpsc::Receiver<InboundFrame>) {
        info!("Inbound pump started on {}", self.transport.name());
        while let Some(frame) = inbound.recv().await {
            let message = match self.process_incoming(&frame.bytes) {
                Ok(message) => message,
                Err(e) => {
                    warn!(
                        "Dropping {} byte frame from {:?} [{}]: {}",
                        frame.bytes.len(),
                        frame.src_address,
                        e.error_code(),
                        e
                    );
                    continue;
                }
            };

            let handler = self.handler.read().await.clone();
            match handler {
                Some(handler) => handler.on_message(message, frame.src_address).await,
                None => debug!("No inbound handler registered, dropping message"),
            }
        }
        info!("Inbound pump stopped on {}", self.transport.name());
    }

    /// Run the inbound pump on its own task
    pub fn spawn_inbound(
        self: &Arc<Self>,
        inbound: mpsc::Receiver<InboundFrame>,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move { router.run_inbound(inbound).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtalk_transport::{LoopbackMesh, TransportError};
    use meshtalk_wire::{DisplayName, HEADER_SIZE};
    use tokio::sync::Mutex;

    fn hello() -> ChatMessage {
        ChatMessage::text(42, DisplayName::new("Alice"), 0x0001, "hi")
    }

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<(ChatMessage, Option<u16>)>>,
    }

    #[async_trait]
    impl InboundHandler for Collect {
        async fn on_message(&self, message: ChatMessage, src_address: Option<u16>) {
            self.seen.lock().await.push((message, src_address));
        }
    }

    #[test]
    fn test_frame_layout() {
        let frame = frame_message(&hello()).unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + 2 + CHECKSUM_SIZE);

        let (body, trailer) = frame.split_at(frame.len() - 2);
        assert_eq!(u16::from_be_bytes([trailer[0], trailer[1]]), crc16(body));
    }

    #[test]
    fn test_process_incoming_round_trip() {
        let router = MessageRouter::new(Arc::new(LoopbackMesh::new().attach(1).0));
        let frame = frame_message(&hello()).unwrap();
        assert_eq!(router.process_incoming(&frame).unwrap(), hello());
        assert_eq!(router.stats().frames_accepted, 1);
    }

    #[test]
    fn test_truncated_frame() {
        let router = MessageRouter::new(Arc::new(LoopbackMesh::new().attach(1).0));
        let err = router.process_incoming(&[0x01, 0x02]).unwrap_err();
        assert!(matches!(
            err,
            RouterError::Codec(CodecError::Truncated { needed: MIN_FRAME_SIZE, available: 2 })
        ));
        assert_eq!(router.stats().framing_errors, 1);
    }

    #[test]
    fn test_every_single_bit_flip_is_rejected() {
        let frame = frame_message(&hello()).unwrap().to_vec();
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                let err = unframe(&corrupted).unwrap_err();
                assert!(
                    err.is_integrity(),
                    "flip of byte {} bit {} gave {:?}",
                    byte,
                    bit,
                    err
                );
            }
        }
    }

    #[test]
    fn test_valid_checksum_bad_body() {
        // Correct checksum over a body with an unknown kind tag
        let mut body = BytesMut::new();
        encode_into(&hello(), &mut body).unwrap();
        body[0] = 9;
        let checksum = crc16(&body);
        body.put_u16(checksum);

        let err = unframe(&body).unwrap_err();
        assert!(matches!(err, RouterError::Codec(CodecError::UnknownKind(9))));
    }

    #[tokio::test]
    async fn test_send_counts_failures() {
        let mesh = LoopbackMesh::new();
        let (a, _rx_a) = mesh.attach(0x0001);
        let router = MessageRouter::new(Arc::new(a));

        let err = router.send(&hello(), 0x0002).await.unwrap_err();
        assert!(matches!(err, RouterError::Transport(TransportError::Unreachable(2))));
        assert_eq!(router.stats().send_failures, 1);
        assert_eq!(router.stats().frames_out, 0);
    }

    #[tokio::test]
    async fn test_inbound_pump_delivers_and_drops() {
        let mesh = LoopbackMesh::new();
        let (a, _rx_a) = mesh.attach(0x0001);
        let (b, rx_b) = mesh.attach(0x0002);

        let sender = MessageRouter::new(Arc::new(a));
        let receiver = Arc::new(MessageRouter::new(Arc::new(b)));
        let collect = Arc::new(Collect::default());
        receiver.register_receive_callback(collect.clone()).await;
        let pump = receiver.spawn_inbound(rx_b);

        mesh.inject(
            0x0002,
            InboundFrame {
                bytes: Bytes::from_static(&[0xFF; 3]),
                src_address: None,
            },
        )
        .await
        .unwrap();
        sender.send(&hello(), 0x0002).await.unwrap();

        // The hub holds the only sender for b's queue
        drop(sender);
        mesh.detach(0x0002);
        drop(receiver);
        pump.await.unwrap();

        let seen = collect.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (hello(), Some(0x0001)));
    }
}
