//! Chat core for meshtalk.
//!
//! Owns the per-node chat state and the path between a UI and a mesh
//! transport:
//!
//! - [`NodeIdentity`] - local name and provisioned address
//! - [`ContactDirectory`] - bounded name/address table, optionally mirrored
//!   to storage
//! - [`ChatHistory`] - bounded per-contact line history
//! - [`MessageRouter`] - framing, checksum and inbound pump over a
//!   [`meshtalk_transport::MeshTransport`]
//! - [`ChatApp`] - the facade a UI drives
//!
//! Every structure is constructed explicitly and shared by `Arc`; there is
//! no process-wide state. Directory and history locks are taken with a
//! timeout, and a timeout is reported as a busy error for the caller to skip.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod directory;
pub mod error;
pub mod history;
pub mod identity;
pub mod router;
pub mod view;

pub use app::{ChatApp, InboundOutcome, MessageCallback};
pub use directory::{Contact, ContactDirectory, UpsertOutcome, DEFAULT_CAPACITY};
pub use error::{AppError, DirectoryError, HistoryError, RouterError};
pub use history::{ChatHistory, DEFAULT_DEPTH, OUTGOING_PREFIX};
pub use identity::NodeIdentity;
pub use router::{
    frame_message, unframe, InboundHandler, MessageRouter, RouterStats, RouterStatsSnapshot,
};
pub use view::ViewState;
