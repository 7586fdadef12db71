//! Error classification and marshalling.
//!
//! Receive-role failures are serialized as a stable `{kind, message}` pair —
//! never stack traces — and reconstructed as a typed [`ReaderError`] on the
//! calling node. Local-only failures (decode, timeout, send failure) are
//! raised directly and never cross the wire.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::codec::ProtocolError;
use crate::transport::TransportError;

// ── Wire error kinds ──────────────────────────────────────────────────────────

/// The fixed set of error kinds. Codes are part of the wire contract.
///
/// Only the reader-state and I/O kinds are ever produced by a receive role;
/// `TransportTimeout`, `Protocol`, and `Transport` are local classifications
/// that exist so every [`ReaderError`] maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorKind {
    ReaderNotFound = 0x01,
    ReaderAlreadyConnected = 0x02,
    ReaderNotConnected = 0x03,
    Io = 0x04,
    TransportTimeout = 0x05,
    Protocol = 0x06,
    Transport = 0x07,
}

impl TryFrom<u8> for ErrorKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(ErrorKind::ReaderNotFound),
            0x02 => Ok(ErrorKind::ReaderAlreadyConnected),
            0x03 => Ok(ErrorKind::ReaderNotConnected),
            0x04 => Ok(ErrorKind::Io),
            0x05 => Ok(ErrorKind::TransportTimeout),
            0x06 => Ok(ErrorKind::Protocol),
            0x07 => Ok(ErrorKind::Transport),
            _ => Err(()),
        }
    }
}

/// The serialized form of a failure: what actually crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

// ── Typed errors ──────────────────────────────────────────────────────────────

/// Every failure a Cardlink operation can surface to a caller.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The named native reader is absent on the slave.
    #[error("native reader not found: {0}")]
    ReaderNotFound(String),

    /// A session is already active for this `(reader, slave node)` pair.
    #[error("reader already connected: {0}")]
    ReaderAlreadyConnected(String),

    /// Disconnect or transmit on a pair with no active session.
    #[error("reader not connected: {0}")]
    ReaderNotConnected(String),

    /// Hardware or transmission failure while exchanging with the card.
    #[error("reader I/O failure: {0}")]
    Io(String),

    /// No response envelope arrived within the deadline.
    #[error("no response within {0:?}")]
    TransportTimeout(Duration),

    /// A locally detected protocol fault (malformed or unrecognized envelope).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The remote side answered with a protocol-kind error payload
    /// (misdirected request, undecodable body).
    #[error("remote protocol fault: {0}")]
    RemoteProtocol(String),

    /// The send/receive channel itself failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ReaderError {
    /// Classifies this error into its wire kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReaderError::ReaderNotFound(_) => ErrorKind::ReaderNotFound,
            ReaderError::ReaderAlreadyConnected(_) => ErrorKind::ReaderAlreadyConnected,
            ReaderError::ReaderNotConnected(_) => ErrorKind::ReaderNotConnected,
            ReaderError::Io(_) => ErrorKind::Io,
            ReaderError::TransportTimeout(_) => ErrorKind::TransportTimeout,
            ReaderError::Protocol(_) | ReaderError::RemoteProtocol(_) => ErrorKind::Protocol,
            ReaderError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Serializes this error for an error envelope.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// Reconstructs the typed error a remote receive role reported.
    ///
    /// `TransportTimeout` and `Transport` are local-only kinds; if one shows
    /// up in a payload anyway it is treated as a remote protocol fault.
    pub fn from_payload(payload: &ErrorPayload) -> Self {
        let message = payload.message.clone();
        match payload.kind {
            ErrorKind::ReaderNotFound => ReaderError::ReaderNotFound(message),
            ErrorKind::ReaderAlreadyConnected => ReaderError::ReaderAlreadyConnected(message),
            ErrorKind::ReaderNotConnected => ReaderError::ReaderNotConnected(message),
            ErrorKind::Io => ReaderError::Io(message),
            ErrorKind::Protocol => ReaderError::RemoteProtocol(message),
            ErrorKind::TransportTimeout | ErrorKind::Transport => {
                ReaderError::RemoteProtocol(format!(
                    "unexpected remote error kind {:?}: {message}",
                    payload.kind
                ))
            }
        }
    }
}
