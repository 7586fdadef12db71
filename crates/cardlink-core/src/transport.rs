//! The abstract channel envelopes travel through.
//!
//! Concrete transports (sockets, HTTP long-poll, push) live outside this
//! crate. They must satisfy exactly two obligations: deliver [`Envelope`]s
//! addressed to a node via [`EnvelopeSender::send`], and hand every inbound
//! envelope to the receiving endpoint's `on_envelope`. Per-connection FIFO is
//! assumed; nothing else is.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::envelope::{Envelope, NodeId};

/// Failure of the channel itself, not attributable to reader state.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The envelope could not be handed to the transport.
    #[error("send to {target} failed: {reason}")]
    SendFailed { target: NodeId, reason: String },

    /// The link went away while a caller was still waiting on it.
    #[error("transport link closed")]
    Closed,
}

/// Outbound half of the transport contract.
#[async_trait]
pub trait EnvelopeSender: Send + Sync {
    /// Ships one envelope towards `target`. Completion means the transport
    /// accepted the message, not that the peer processed it.
    async fn send(&self, target: &NodeId, envelope: Envelope) -> Result<(), TransportError>;
}
