//! # cardlink-core
//!
//! Shared library for Cardlink, a virtualization layer that lets a master
//! process drive a smart-card reader attached to a slave process as if it
//! were local. This crate holds everything both endpoints agree on:
//!
//! - **`protocol`** – the [`Envelope`] message unit and its binary codec,
//!   the closed [`RemoteMethod`] set, per-method body payloads,
//!   pending-request correlation, and session-id allocation.
//!
//! - **`domain`** – APDU command/response units with status classification,
//!   default-selection descriptors, and the reader/plugin event types
//!   observers consume.
//!
//! - **`transport`** – the send contract concrete transports implement; the
//!   inbound half is each endpoint's `on_envelope`.
//!
//! It performs no I/O of its own and is used by both the master and slave
//! crates.

pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export the most-used types at the crate root so callers can write
// `cardlink_core::Envelope` instead of the full module path.
pub use config::{ConfigError, NodeConfig};
pub use domain::apdu::{ApduRequest, ApduResponse, ChannelControl};
pub use domain::event::{
    PluginEvent, PluginEventKind, ReaderEvent, ReaderEventKind, TransmissionMode,
};
pub use domain::selection::{DefaultSelectionRequest, NotificationMode};
pub use error::{ErrorKind, ErrorPayload, ReaderError};
pub use protocol::codec::{decode_envelope, encode_envelope, ProtocolError};
pub use protocol::envelope::{Envelope, NodeId, RemoteMethod};
pub use protocol::pending::PendingRequests;
pub use transport::{EnvelopeSender, TransportError};
