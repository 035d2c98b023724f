//! Application facade.
//!
//! Turns UI intents into chat messages for the router, and turns accepted
//! inbound messages into directory updates, history lines, unread flags and
//! a UI callback.

use crate::directory::{ContactDirectory, UpsertOutcome};
use crate::error::AppError;
use crate::history::ChatHistory;
use crate::identity::NodeIdentity;
use crate::router::{InboundHandler, MessageRouter, RouterStatsSnapshot};
use crate::view::ViewState;
use async_trait::async_trait;
use meshtalk_wire::{truncate_str, ChatMessage, MessageKind, MAX_PAYLOAD_SIZE};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// UI callback invoked with `(sender_name, text)` for every delivered chat
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// What the facade did with an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Our own message came back; ignored
    SelfEcho,
    /// A self-announcement; directory updated only
    Announced(UpsertOutcome),
    /// Chat text stored for the contact at `index`
    Delivered {
        /// Directory slot of the sender
        index: usize,
        /// Whether the contact was flagged unread
        unread: bool,
    },
    /// Chat text from a sender the directory could not take (full, or an
    /// empty name); dropped without notifying the UI
    Unregistered,
}

/// Microsecond timestamp stamped on outgoing messages
fn now_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

struct Shared {
    identity: Arc<NodeIdentity>,
    directory: Arc<ContactDirectory>,
    history: Arc<ChatHistory>,
    view: ViewState,
    callback: RwLock<Option<MessageCallback>>,
}

impl Shared {
    async fn handle(&self, message: ChatMessage) -> Result<InboundOutcome, AppError> {
        if message.sender_address == self.identity.address() {
            debug!(
                "Ignoring self-message from address 0x{:04X}",
                message.sender_address
            );
            return Ok(InboundOutcome::SelfEcho);
        }

        if message.kind == MessageKind::Broadcast {
            let outcome = self
                .directory
                .upsert(&message.sender_name, message.sender_address)
                .await?;
            debug!(
                "Announcement from {} (0x{:04X}): {:?}",
                message.sender_name, message.sender_address, outcome
            );
            return Ok(InboundOutcome::Announced(outcome));
        }

        // Known senders come back Unchanged; strangers are registered here
        let upsert = self
            .directory
            .upsert(&message.sender_name, message.sender_address)
            .await?;
        if let UpsertOutcome::Added(i) = upsert {
            info!(
                "Auto-registered {} (0x{:04X}) at slot {}",
                message.sender_name, message.sender_address, i
            );
        }

        let Some(index) = upsert.index() else {
            warn!(
                "Failed to register unknown node {:?} (0x{:04X}), message dropped",
                message.sender_name, message.sender_address
            );
            return Ok(InboundOutcome::Unregistered);
        };

        let text = message.text_lossy();
        if let Err(e) = self.history.append(index, &text, false).await {
            warn!("Message from {} not stored: {}", message.sender_name, e);
        }
        let unread = self.view.mark_incoming(index).await;

        let callback = self.callback.read().await.clone();
        if let Some(callback) = callback {
            callback(message.sender_name.as_str(), &text);
        }
        Ok(InboundOutcome::Delivered { index, unread })
    }
}

#[async_trait]
impl InboundHandler for Shared {
    async fn on_message(&self, message: ChatMessage, src_address: Option<u16>) {
        if let Some(src) = src_address {
            if src != message.sender_address {
                debug!(
                    "Frame relayed by 0x{:04X} for 0x{:04X}",
                    src, message.sender_address
                );
            }
        }
        match self.handle(message).await {
            Ok(outcome) => debug!("Inbound message handled: {:?}", outcome),
            Err(e) => warn!("Inbound message skipped [{}]: {}", e.error_code(), e),
        }
    }
}

/// The chat core as seen by a UI
pub struct ChatApp {
    shared: Arc<Shared>,
    router: Arc<MessageRouter>,
}

impl ChatApp {
    /// Wire the facade to its collaborators and register it as the
    /// router's inbound handler
    pub async fn new(
        identity: Arc<NodeIdentity>,
        directory: Arc<ContactDirectory>,
        history: Arc<ChatHistory>,
        router: Arc<MessageRouter>,
    ) -> Self {
        let shared = Arc::new(Shared {
            view: ViewState::new(directory.capacity()),
            identity,
            directory,
            history,
            callback: RwLock::new(None),
        });
        router.register_receive_callback(shared.clone()).await;
        Self { shared, router }
    }

    /// Local identity
    pub fn identity(&self) -> &Arc<NodeIdentity> {
        &self.shared.identity
    }

    /// Contact directory
    pub fn directory(&self) -> &Arc<ContactDirectory> {
        &self.shared.directory
    }

    /// Chat history
    pub fn history(&self) -> &Arc<ChatHistory> {
        &self.shared.history
    }

    /// Message router
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Router counters
    pub fn stats(&self) -> RouterStatsSnapshot {
        self.router.stats()
    }

    fn require_provisioned(&self) -> Result<(), AppError> {
        if !self.shared.identity.is_provisioned() {
            return Err(AppError::NotProvisioned);
        }
        Ok(())
    }

    /// Send chat text to a contact.
    ///
    /// Text beyond the payload limit is cut on a char boundary. The line is
    /// recorded in history before the transport is tried and stays there
    /// even if the send fails.
    pub async fn send_text(&self, contact_name: &str, text: &str) -> Result<(), AppError> {
        self.require_provisioned()?;
        let (index, contact) = self
            .shared
            .directory
            .find_by_name(contact_name)
            .await?
            .ok_or_else(|| AppError::UnknownContact(contact_name.to_string()))?;

        let text = truncate_str(text, MAX_PAYLOAD_SIZE);
        let identity = &self.shared.identity;
        let message = ChatMessage::text(
            now_micros(),
            identity.name().clone(),
            identity.address(),
            text,
        );

        if let Err(e) = self.shared.history.append(index, text, true).await {
            warn!("Outgoing message to {} not stored: {}", contact.name, e);
        }

        self.router.send(&message, contact.address).await?;
        debug!("Sent {} bytes to {}", text.len(), contact.name);
        Ok(())
    }

    /// Announce our name and address to every reachable node
    pub async fn broadcast_self_announce(&self) -> Result<(), AppError> {
        self.require_provisioned()?;
        let identity = &self.shared.identity;
        let message =
            ChatMessage::broadcast(now_micros(), identity.name().clone(), identity.address());
        self.router.broadcast(&message).await?;
        info!(
            "Announced {} (0x{:04X})",
            identity.name(),
            identity.address()
        );
        Ok(())
    }

    /// Contact names in slot order
    pub async fn get_contact_names(&self) -> Result<Vec<String>, AppError> {
        Ok(self
            .shared
            .directory
            .names()
            .await?
            .into_iter()
            .map(String::from)
            .collect())
    }

    /// Up to `max_count` most recent lines with a contact, oldest first.
    ///
    /// An unknown contact has no lines.
    pub async fn get_recent_messages(
        &self,
        contact_name: &str,
        max_count: usize,
    ) -> Result<Vec<String>, AppError> {
        match self.shared.directory.index_of_name(contact_name).await? {
            Some(index) => Ok(self.shared.history.read_recent(index, max_count).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Install the UI callback, replacing any earlier one
    pub async fn register_message_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.shared.callback.write().await = Some(Arc::new(callback));
    }

    /// Apply one decoded inbound message
    pub async fn handle_message(&self, message: ChatMessage) -> Result<InboundOutcome, AppError> {
        self.shared.handle(message).await
    }

    /// Validate, decode and apply one raw frame
    pub async fn handle_frame(&self, raw: &[u8]) -> Result<InboundOutcome, AppError> {
        let message = self.router.process_incoming(raw)?;
        self.shared.handle(message).await
    }

    /// Mark the conversation with `contact_name` as the one on screen
    pub async fn open_conversation(&self, contact_name: &str) -> Result<(), AppError> {
        let index = self
            .shared
            .directory
            .index_of_name(contact_name)
            .await?
            .ok_or_else(|| AppError::UnknownContact(contact_name.to_string()))?;
        self.shared.view.open(index).await;
        Ok(())
    }

    /// Leave the open conversation
    pub async fn close_conversation(&self) {
        self.shared.view.close().await;
    }

    /// Name of the open conversation, if any
    pub async fn open_conversation_name(&self) -> Result<Option<String>, AppError> {
        let Some(index) = self.shared.view.open_index().await else {
            return Ok(None);
        };
        Ok(self
            .shared
            .directory
            .contact_at(index)
            .await?
            .map(|c| c.name.to_string()))
    }

    /// Whether `contact_name` has unread messages
    pub async fn has_unread(&self, contact_name: &str) -> Result<bool, AppError> {
        Ok(self
            .shared
            .directory
            .index_of_name(contact_name)
            .await?
            .map_or(false, |index| self.shared.view.has_unread(index)))
    }

    /// Forget every contact, line and unread flag, and erase persisted
    /// contacts.
    ///
    /// The directory is cleared before the history.
    pub async fn factory_reset(&self) -> Result<(), AppError> {
        self.shared.directory.clear().await?;
        self.shared.history.clear().await?;
        self.shared.view.reset().await;
        info!("Factory reset complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use meshtalk_transport::LoopbackMesh;
    use meshtalk_wire::DisplayName;
    use std::sync::Mutex;

    struct Node {
        app: ChatApp,
        rx: tokio::sync::mpsc::Receiver<meshtalk_transport::InboundFrame>,
    }

    async fn node(mesh: &LoopbackMesh, name: &str, address: u16) -> Node {
        let (transport, rx) = mesh.attach(address);
        let router = Arc::new(MessageRouter::new(Arc::new(transport)));
        let app = ChatApp::new(
            Arc::new(NodeIdentity::new(name, address)),
            Arc::new(ContactDirectory::new(3)),
            Arc::new(ChatHistory::new(3, 6)),
            router,
        )
        .await;
        Node { app, rx }
    }

    fn text_from(name: &str, address: u16, text: &str) -> ChatMessage {
        ChatMessage::text(1, DisplayName::new(name), address, text)
    }

    #[tokio::test]
    async fn test_inbound_text_auto_registers() {
        let mesh = LoopbackMesh::new();
        let bob = node(&mesh, "Bob", 0x0002).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bob.app
            .register_message_callback(move |from, text| {
                sink.lock().unwrap().push((from.to_string(), text.to_string()))
            })
            .await;

        let outcome = bob
            .app
            .handle_message(text_from("Alice", 0x0001, "hi"))
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::Delivered { index: 0, unread: true });
        assert_eq!(bob.app.get_contact_names().await.unwrap(), vec!["Alice"]);
        assert_eq!(bob.app.get_recent_messages("Alice", 6).await.unwrap(), vec!["hi"]);
        assert!(bob.app.has_unread("Alice").await.unwrap());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("Alice".to_string(), "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn test_broadcast_updates_directory_only() {
        let mesh = LoopbackMesh::new();
        let bob = node(&mesh, "Bob", 0x0002).await;
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        bob.app
            .register_message_callback(move |_, _| *counter.lock().unwrap() += 1)
            .await;

        let outcome = bob
            .app
            .handle_message(ChatMessage::broadcast(1, DisplayName::new("Carol"), 0x0003))
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::Announced(UpsertOutcome::Added(0)));
        assert_eq!(bob.app.get_contact_names().await.unwrap(), vec!["Carol"]);
        assert!(bob.app.get_recent_messages("Carol", 6).await.unwrap().is_empty());
        assert!(!bob.app.has_unread("Carol").await.unwrap());
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_self_echo_suppressed() {
        let mesh = LoopbackMesh::new();
        let alice = node(&mesh, "Alice", 0x0001).await;
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        alice
            .app
            .register_message_callback(move |_, _| *counter.lock().unwrap() += 1)
            .await;

        let outcome = alice
            .app
            .handle_message(text_from("Alice", 0x0001, "echo"))
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::SelfEcho);
        let outcome = alice
            .app
            .handle_message(ChatMessage::broadcast(1, DisplayName::new("Alice"), 0x0001))
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::SelfEcho);

        assert!(alice.app.get_contact_names().await.unwrap().is_empty());
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_conversation_suppresses_unread() {
        let mesh = LoopbackMesh::new();
        let bob = node(&mesh, "Bob", 0x0002).await;
        bob.app
            .handle_message(text_from("Alice", 0x0001, "one"))
            .await
            .unwrap();
        assert!(bob.app.has_unread("Alice").await.unwrap());

        bob.app.open_conversation("Alice").await.unwrap();
        assert!(!bob.app.has_unread("Alice").await.unwrap());
        assert_eq!(
            bob.app.open_conversation_name().await.unwrap().as_deref(),
            Some("Alice")
        );

        let outcome = bob
            .app
            .handle_message(text_from("Alice", 0x0001, "two"))
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::Delivered { index: 0, unread: false });

        bob.app.close_conversation().await;
        bob.app
            .handle_message(text_from("Alice", 0x0001, "three"))
            .await
            .unwrap();
        assert!(bob.app.has_unread("Alice").await.unwrap());
        assert!(matches!(
            bob.app.open_conversation("Nobody").await,
            Err(AppError::UnknownContact(_))
        ));
    }

    #[tokio::test]
    async fn test_full_directory_drops_text_silently() {
        let mesh = LoopbackMesh::new();
        let bob = node(&mesh, "Bob", 0x0002).await;
        for (i, n) in ["A", "B", "C"].iter().enumerate() {
            bob.app
                .handle_message(ChatMessage::broadcast(1, DisplayName::new(n), 0x0010 + i as u16))
                .await
                .unwrap();
        }
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        bob.app
            .register_message_callback(move |from, _| sink.lock().unwrap().push(from.to_string()))
            .await;

        let outcome = bob
            .app
            .handle_message(text_from("Dave", 0x0040, "hello?"))
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::Unregistered);
        assert!(calls.lock().unwrap().is_empty());
        assert!(bob.app.get_recent_messages("Dave", 6).await.unwrap().is_empty());
        assert!(!bob.app.has_unread("Dave").await.unwrap());
    }

    #[tokio::test]
    async fn test_nameless_sender_is_not_registered() {
        let mesh = LoopbackMesh::new();
        let bob = node(&mesh, "Bob", 0x0002).await;
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        bob.app
            .register_message_callback(move |_, _| *counter.lock().unwrap() += 1)
            .await;

        let announced = bob
            .app
            .handle_message(ChatMessage::broadcast(1, DisplayName::new(""), 0x0005))
            .await
            .unwrap();
        assert_eq!(announced, InboundOutcome::Announced(UpsertOutcome::Rejected));

        let text = bob
            .app
            .handle_message(text_from("\0", 0x0006, "hi"))
            .await
            .unwrap();
        assert_eq!(text, InboundOutcome::Unregistered);

        // An all-zero name field decodes to an empty name
        let mut frame = crate::frame_message(&text_from("Eve", 0x0007, "hi"))
            .unwrap()
            .to_vec();
        frame[9..19].fill(0);
        let body_len = frame.len() - meshtalk_wire::CHECKSUM_SIZE;
        let crc = meshtalk_wire::crc16(&frame[..body_len]);
        frame[body_len..].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(
            bob.app.handle_frame(&frame).await.unwrap(),
            InboundOutcome::Unregistered
        );

        assert!(bob.app.get_contact_names().await.unwrap().is_empty());
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rename_on_text() {
        let mesh = LoopbackMesh::new();
        let bob = node(&mesh, "Bob", 0x0002).await;
        bob.app
            .handle_message(text_from("Al", 0x0001, "a"))
            .await
            .unwrap();
        bob.app
            .handle_message(text_from("Alice", 0x0001, "b"))
            .await
            .unwrap();

        assert_eq!(bob.app.get_contact_names().await.unwrap(), vec!["Alice"]);
        assert_eq!(bob.app.get_recent_messages("Alice", 6).await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_send_requires_provisioning_and_contact() {
        let mesh = LoopbackMesh::new();
        let (transport, _rx) = mesh.attach(0x0009);
        let app = ChatApp::new(
            Arc::new(NodeIdentity::unprovisioned("Eve")),
            Arc::new(ContactDirectory::new(3)),
            Arc::new(ChatHistory::new(3, 6)),
            Arc::new(MessageRouter::new(Arc::new(transport))),
        )
        .await;

        assert!(matches!(app.send_text("Bob", "x").await, Err(AppError::NotProvisioned)));
        assert!(matches!(
            app.broadcast_self_announce().await,
            Err(AppError::NotProvisioned)
        ));

        app.identity().set_address(0x0009);
        assert!(matches!(
            app.send_text("Bob", "x").await,
            Err(AppError::UnknownContact(name)) if name == "Bob"
        ));
    }

    #[tokio::test]
    async fn test_failed_send_keeps_history() {
        let mesh = LoopbackMesh::new();
        let alice = node(&mesh, "Alice", 0x0001).await;
        alice
            .app
            .directory()
            .upsert(&DisplayName::new("Bob"), 0x0002)
            .await
            .unwrap();

        let err = alice.app.send_text("Bob", "anyone?").await.unwrap_err();
        assert!(matches!(err, AppError::Router(RouterError::Transport(_))));
        assert_eq!(
            alice.app.get_recent_messages("Bob", 6).await.unwrap(),
            vec!["> anyone?"]
        );
        assert_eq!(alice.app.stats().send_failures, 1);
    }

    #[tokio::test]
    async fn test_send_truncates_long_text() {
        let mesh = LoopbackMesh::new();
        let alice = node(&mesh, "Alice", 0x0001).await;
        let mut bob = node(&mesh, "Bob", 0x0002).await;
        alice
            .app
            .directory()
            .upsert(&DisplayName::new("Bob"), 0x0002)
            .await
            .unwrap();

        let long = "x".repeat(300);
        alice.app.send_text("Bob", &long).await.unwrap();

        let frame = bob.rx.recv().await.unwrap();
        let message = bob.app.router().process_incoming(&frame.bytes).unwrap();
        assert_eq!(message.payload_len(), MAX_PAYLOAD_SIZE);
        assert_eq!(message.sender_name, "Alice");
    }

    #[tokio::test]
    async fn test_factory_reset() {
        let mesh = LoopbackMesh::new();
        let bob = node(&mesh, "Bob", 0x0002).await;
        bob.app
            .handle_message(text_from("Alice", 0x0001, "hi"))
            .await
            .unwrap();

        bob.app.factory_reset().await.unwrap();
        assert!(bob.app.get_contact_names().await.unwrap().is_empty());
        assert!(bob.app.history().read_recent(0, 6).await.unwrap().is_empty());
        assert!(!bob.app.has_unread("Alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_handle_frame_rejects_garbage() {
        let mesh = LoopbackMesh::new();
        let bob = node(&mesh, "Bob", 0x0002).await;
        let err = bob.app.handle_frame(&[0x01, 0x02]).await.unwrap_err();
        assert_eq!(err.error_code(), "TRUNCATED");
        assert!(bob.app.get_contact_names().await.unwrap().is_empty());
    }
}
