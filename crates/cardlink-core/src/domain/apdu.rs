//! APDU command/response units and channel control.
//!
//! Card-command semantics stay out of scope: this layer only moves command
//! bytes to a reader and classifies the response status. The canonical text
//! form of an APDU is uppercase hex, spaces ignored.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Successful status word trailer (`SW1=0x90`, `SW2=0x00`).
pub const STATUS_SUCCESS: u16 = 0x9000;

/// Error raised when parsing hex text into APDU bytes.
#[derive(Debug, Error, PartialEq)]
pub enum HexError {
    #[error("odd number of hex digits: {0}")]
    OddLength(usize),
    #[error("invalid hex digit {0:?}")]
    InvalidDigit(char),
}

/// Parses hex text (spaces allowed) into bytes.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, HexError> {
    let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(digits.len()));
    }
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks(2) {
        let hi = pair[0].to_digit(16).ok_or(HexError::InvalidDigit(pair[0]))?;
        let lo = pair[1].to_digit(16).ok_or(HexError::InvalidDigit(pair[1]))?;
        bytes.push(((hi << 4) | lo) as u8);
    }
    Ok(bytes)
}

/// Formats bytes as uppercase hex with no separators.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

// ── Command / response units ──────────────────────────────────────────────────

/// One command unit sent to a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApduRequest {
    bytes: Vec<u8>,
}

impl ApduRequest {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Builds a request from hex text.
    pub fn from_hex(text: &str) -> Result<Self, HexError> {
        Ok(Self::new(parse_hex(text)?))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.bytes)
    }
}

impl fmt::Display for ApduRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// One response unit received from a card, status word included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApduResponse {
    bytes: Vec<u8>,
}

impl ApduResponse {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_hex(text: &str) -> Result<Self, HexError> {
        Ok(Self::new(parse_hex(text)?))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The trailing status word, or `None` if the response is shorter than
    /// two bytes.
    pub fn status_word(&self) -> Option<u16> {
        let n = self.bytes.len();
        if n < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.bytes[n - 2], self.bytes[n - 1]]))
    }

    /// Success classification: status word equals `90 00`.
    pub fn is_success(&self) -> bool {
        self.status_word() == Some(STATUS_SUCCESS)
    }

    /// The response data without the status word.
    pub fn data(&self) -> &[u8] {
        let n = self.bytes.len();
        if n < 2 {
            &self.bytes
        } else {
            &self.bytes[..n - 2]
        }
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.bytes)
    }
}

impl fmt::Display for ApduResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Whether the card's logical channel stays open after an exchange.
///
/// Forwarded verbatim to the native reader so upstream card-protocol code can
/// keep a secure session alive across transmit sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelControl {
    KeepOpen,
    CloseAfter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_ignores_spaces() {
        assert_eq!(parse_hex("00 A4 04 00").unwrap(), vec![0x00, 0xA4, 0x04, 0x00]);
    }

    #[test]
    fn test_parse_hex_rejects_odd_length() {
        assert_eq!(parse_hex("ABC"), Err(HexError::OddLength(3)));
    }

    #[test]
    fn test_parse_hex_rejects_bad_digit() {
        assert_eq!(parse_hex("0G"), Err(HexError::InvalidDigit('G')));
    }

    #[test]
    fn test_hex_round_trip() {
        let request = ApduRequest::from_hex("00B2014C00").unwrap();
        assert_eq!(request.to_hex(), "00B2014C00");
    }

    #[test]
    fn test_status_word_success() {
        let response = ApduResponse::from_hex("0102039000").unwrap();
        assert_eq!(response.status_word(), Some(0x9000));
        assert!(response.is_success());
        assert_eq!(response.data(), &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_status_word_failure() {
        let response = ApduResponse::from_hex("6A82").unwrap();
        assert_eq!(response.status_word(), Some(0x6A82));
        assert!(!response.is_success());
        assert!(response.data().is_empty());
    }

    #[test]
    fn test_short_response_has_no_status_word() {
        let response = ApduResponse::new(vec![0x90]);
        assert_eq!(response.status_word(), None);
        assert!(!response.is_success());
    }
}
