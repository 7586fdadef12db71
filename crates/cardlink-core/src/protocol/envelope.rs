//! The Cardlink envelope: the single message unit exchanged between nodes.
//!
//! Every remote-method call, response, and event travels as one [`Envelope`].
//! The body is opaque at this layer — it is interpreted only by the handler
//! registered for the envelope's [`RemoteMethod`] tag.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorPayload;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the fixed part of the envelope header in bytes
/// (version + method + flags + reserved + body length).
pub const FIXED_HEADER_SIZE: usize = 8;

// ── Node identity ─────────────────────────────────────────────────────────────

/// Opaque string identifier naming a master or slave endpoint.
///
/// Two bindings to the same native reader name are distinguishable only if
/// their slave node identities differ, so the identity participates in every
/// session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ── Remote method tags ────────────────────────────────────────────────────────

/// The closed set of remote operations.
///
/// Tag values are part of the wire contract; new methods get new values and
/// old values are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RemoteMethod {
    // Request/response pairs (0x00–0x0F)
    ConnectReader = 0x01,
    DisconnectReader = 0x02,
    TransmitSet = 0x03,
    SetDefaultSelection = 0x04,
    // One-way notifications, slave to master (0x10–0x1F)
    ReaderEvent = 0x10,
    PluginEvent = 0x11,
}

impl RemoteMethod {
    /// Returns `true` for the one-way notification methods that never get a
    /// response envelope.
    pub fn is_notification(&self) -> bool {
        matches!(self, RemoteMethod::ReaderEvent | RemoteMethod::PluginEvent)
    }
}

impl TryFrom<u8> for RemoteMethod {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(RemoteMethod::ConnectReader),
            0x02 => Ok(RemoteMethod::DisconnectReader),
            0x03 => Ok(RemoteMethod::TransmitSet),
            0x04 => Ok(RemoteMethod::SetDefaultSelection),
            0x10 => Ok(RemoteMethod::ReaderEvent),
            0x11 => Ok(RemoteMethod::PluginEvent),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteMethod::ConnectReader => "CONNECT_READER",
            RemoteMethod::DisconnectReader => "DISCONNECT_READER",
            RemoteMethod::TransmitSet => "TRANSMIT_SET",
            RemoteMethod::SetDefaultSelection => "SET_DEFAULT_SELECTION",
            RemoteMethod::ReaderEvent => "READER_EVENT",
            RemoteMethod::PluginEvent => "PLUGIN_EVENT",
        };
        f.write_str(name)
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One message unit: a remote-method request, its response, or an event.
///
/// Created per call or per event, immutable, never persisted. A response is
/// recognized by its `correlation_id` matching a pending request on the
/// receiving node; there is no separate request/response flag on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operation tag.
    pub method: RemoteMethod,
    /// Session this message belongs to; empty until assigned by
    /// `CONNECT_READER`.
    pub session_id: String,
    /// Name of the physical reader on the slave.
    pub native_reader_name: String,
    /// Name of the master-side proxy reader; empty before a session exists.
    pub virtual_reader_name: String,
    /// Node that built this envelope.
    pub requester_node_id: NodeId,
    /// Node this envelope is addressed to.
    pub target_node_id: NodeId,
    /// Pairs a request with its response.
    pub correlation_id: Uuid,
    /// Failure carried back by a response; `None` on requests, events, and
    /// successful responses.
    pub error: Option<ErrorPayload>,
    /// Method-specific payload, opaque to the envelope layer.
    pub body: Vec<u8>,
}

impl Envelope {
    /// Builds a request envelope with a fresh correlation id.
    pub fn request(
        method: RemoteMethod,
        requester: NodeId,
        target: NodeId,
        body: Vec<u8>,
    ) -> Self {
        Self {
            method,
            session_id: String::new(),
            native_reader_name: String::new(),
            virtual_reader_name: String::new(),
            requester_node_id: requester,
            target_node_id: target,
            correlation_id: Uuid::new_v4(),
            error: None,
            body,
        }
    }

    /// Builds the success response to `self`: same method and correlation id,
    /// requester and target swapped.
    pub fn success_response(&self, body: Vec<u8>) -> Self {
        let mut response = self.response_shell();
        response.body = body;
        response
    }

    /// Builds the error response to `self`, carrying `payload` and no body.
    pub fn error_response(&self, payload: ErrorPayload) -> Self {
        let mut response = self.response_shell();
        response.error = Some(payload);
        response
    }

    fn response_shell(&self) -> Self {
        Self {
            method: self.method,
            session_id: self.session_id.clone(),
            native_reader_name: self.native_reader_name.clone(),
            virtual_reader_name: self.virtual_reader_name.clone(),
            requester_node_id: self.target_node_id.clone(),
            target_node_id: self.requester_node_id.clone(),
            correlation_id: self.correlation_id,
            error: None,
            body: Vec::new(),
        }
    }

    /// Sets the session id, consuming and returning the envelope.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Sets the native reader name, consuming and returning the envelope.
    pub fn with_native_reader(mut self, name: impl Into<String>) -> Self {
        self.native_reader_name = name.into();
        self
    }

    /// Sets the virtual reader name, consuming and returning the envelope.
    pub fn with_virtual_reader(mut self, name: impl Into<String>) -> Self {
        self.virtual_reader_name = name.into();
        self
    }
}
