//! Per-method request and response payloads.
//!
//! These ride inside [`crate::protocol::envelope::Envelope::body`] and are
//! serialized with `bincode`; the envelope codec never looks at them.
//! `DISCONNECT_READER` carries no payload in either direction — everything it
//! needs is in the envelope fields.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::apdu::{ApduRequest, ApduResponse, ChannelControl};
use crate::domain::event::{PluginEvent, ReaderEvent, TransmissionMode};
use crate::domain::selection::DefaultSelectionRequest;
use crate::error::ErrorPayload;
use crate::protocol::codec::ProtocolError;

/// Serializes a method body.
pub fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(body).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
}

/// Deserializes a method body.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(bytes).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
}

// ── CONNECT_READER ────────────────────────────────────────────────────────────

/// Slave → master: offer a native reader for binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectReaderRequest {
    /// Interface the native reader reports.
    pub transmission_mode: TransmissionMode,
    /// Free-form connection options forwarded to the master.
    pub options: BTreeMap<String, String>,
}

/// Master → slave: the binding succeeded; the virtual reader name travels in
/// the envelope's `virtual_reader_name` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectReaderResponse {
    pub session_id: String,
}

// ── TRANSMIT_SET ──────────────────────────────────────────────────────────────

/// Master → slave: an ordered set of command exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitSetRequest {
    pub apdus: Vec<ApduRequest>,
    pub channel: ChannelControl,
}

/// Slave → master: responses in request order. If an I/O failure terminated
/// the exchange early, `responses` holds what was obtained before the fault
/// and `failure` carries the terminal error — the call itself still succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitSetResponse {
    pub responses: Vec<ApduResponse>,
    pub failure: Option<ErrorPayload>,
}

// ── SET_DEFAULT_SELECTION ─────────────────────────────────────────────────────

/// Master → slave: register a selection to evaluate on next card presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetDefaultSelectionRequest {
    pub selection: DefaultSelectionRequest,
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Slave → master, one-way: a native reader state change, already addressed
/// by virtual reader name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderEventBody {
    pub event: ReaderEvent,
}

/// Slave → master, one-way: reader attach/detach at the slave's plugin level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEventBody {
    pub event: PluginEvent,
}
