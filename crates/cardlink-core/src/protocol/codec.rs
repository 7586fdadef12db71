//! Binary codec for the Cardlink envelope.
//!
//! Wire format:
//! ```text
//! [version:1][method:1][flags:1][reserved:1][body_len:4]
//! [session_id][native_reader_name][virtual_reader_name]
//! [requester_node_id][target_node_id][correlation_id:16]
//! ([error_kind:1][error_message]  iff flags bit 0)
//! [body:N]
//! ```
//! Strings are 2-byte-length-prefixed UTF-8; multi-byte integers are
//! big-endian. The body is opaque here — per-method payloads are encoded and
//! decoded by [`crate::protocol::bodies`].

use thiserror::Error;
use uuid::Uuid;

use crate::error::{ErrorKind, ErrorPayload};
use crate::protocol::envelope::{Envelope, NodeId, RemoteMethod, FIXED_HEADER_SIZE, PROTOCOL_VERSION};

/// Flag bit set when an error payload follows the correlation id.
const FLAG_HAS_ERROR: u8 = 0x01;

/// Errors that can occur while encoding or decoding an envelope.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The method tag in the header is not in the closed set.
    #[error("unknown method tag: 0x{0:02X}")]
    UnknownMethod(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// A header field could not be parsed (bad string, bad error kind, etc.).
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The declared body length exceeds the data available.
    #[error("body length mismatch: header says {declared}, available is {available}")]
    BodyLengthMismatch { declared: usize, available: usize },

    /// A method-specific body payload could not be decoded.
    #[error("malformed body: {0}")]
    MalformedBody(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] into its wire representation.
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FIXED_HEADER_SIZE + 64 + envelope.body.len());

    let mut flags = 0u8;
    if envelope.error.is_some() {
        flags |= FLAG_HAS_ERROR;
    }

    buf.push(PROTOCOL_VERSION);
    buf.push(envelope.method as u8);
    buf.push(flags);
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(envelope.body.len() as u32).to_be_bytes());

    write_length_prefixed_string(&mut buf, &envelope.session_id);
    write_length_prefixed_string(&mut buf, &envelope.native_reader_name);
    write_length_prefixed_string(&mut buf, &envelope.virtual_reader_name);
    write_length_prefixed_string(&mut buf, envelope.requester_node_id.as_str());
    write_length_prefixed_string(&mut buf, envelope.target_node_id.as_str());
    buf.extend_from_slice(envelope.correlation_id.as_bytes());

    if let Some(payload) = &envelope.error {
        buf.push(payload.kind as u8);
        write_length_prefixed_string(&mut buf, &payload.message);
    }

    buf.extend_from_slice(&envelope.body);
    buf
}

/// Decodes one [`Envelope`] from the beginning of `bytes`.
///
/// Returns the envelope and the total number of bytes consumed so the caller
/// can advance a read cursor over a framed stream.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed; an envelope whose
/// method tag is outside the closed set fails with
/// [`ProtocolError::UnknownMethod`] rather than being silently dropped.
pub fn decode_envelope(bytes: &[u8]) -> Result<(Envelope, usize), ProtocolError> {
    if bytes.len() < FIXED_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: FIXED_HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let method_byte = bytes[1];
    let method =
        RemoteMethod::try_from(method_byte).map_err(|_| ProtocolError::UnknownMethod(method_byte))?;

    let flags = bytes[2];
    // bytes[3] is reserved – ignored on decode

    let body_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

    let mut offset = FIXED_HEADER_SIZE;
    let (session_id, next) = read_length_prefixed_string(bytes, offset)?;
    offset = next;
    let (native_reader_name, next) = read_length_prefixed_string(bytes, offset)?;
    offset = next;
    let (virtual_reader_name, next) = read_length_prefixed_string(bytes, offset)?;
    offset = next;
    let (requester, next) = read_length_prefixed_string(bytes, offset)?;
    offset = next;
    let (target, next) = read_length_prefixed_string(bytes, offset)?;
    offset = next;

    let correlation_id = read_uuid(bytes, offset)?;
    offset += 16;

    let error = if flags & FLAG_HAS_ERROR != 0 {
        if bytes.len() < offset + 1 {
            return Err(ProtocolError::MalformedEnvelope(
                "missing error kind byte".to_string(),
            ));
        }
        let kind_byte = bytes[offset];
        let kind = ErrorKind::try_from(kind_byte).map_err(|_| {
            ProtocolError::MalformedEnvelope(format!("unknown error kind: 0x{kind_byte:02X}"))
        })?;
        offset += 1;
        let (message, next) = read_length_prefixed_string(bytes, offset)?;
        offset = next;
        Some(ErrorPayload { kind, message })
    } else {
        None
    };

    if bytes.len() < offset + body_len {
        return Err(ProtocolError::BodyLengthMismatch {
            declared: body_len,
            available: bytes.len() - offset,
        });
    }
    let body = bytes[offset..offset + body_len].to_vec();

    Ok((
        Envelope {
            method,
            session_id,
            native_reader_name,
            virtual_reader_name,
            requester_node_id: NodeId::from(requester),
            target_node_id: NodeId::from(target),
            correlation_id,
            error,
            body,
        },
        offset + body_len,
    ))
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    if buf.len() < offset + 16 {
        return Err(ProtocolError::MalformedEnvelope(format!(
            "need 16 bytes for correlation id at offset {offset}, got {}",
            buf.len().saturating_sub(offset)
        )));
    }
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&buf[offset..offset + 16]);
    Ok(Uuid::from_bytes(raw))
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&bytes[..len as usize]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedEnvelope(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedEnvelope(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedEnvelope(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
