//! Observable events replicated from the slave and re-broadcast on the
//! master, plus the transmission-mode attribute readers report.

use serde::{Deserialize, Serialize};

use crate::domain::apdu::ApduResponse;

/// Physical interface a reader exchanges through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransmissionMode {
    Contacts,
    Contactless,
}

// ── Reader events ─────────────────────────────────────────────────────────────

/// What happened on a reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReaderEventKind {
    /// A card entered the field; no default selection matched (or none was
    /// registered).
    CardInserted,
    /// A card entered the field and the registered default selection
    /// matched; the selection responses ride along.
    CardMatched { responses: Vec<ApduResponse> },
    /// The card left the field.
    CardRemoved,
    /// The reader reported a hardware or transmission fault.
    IoError { message: String },
}

/// A state change on one reader, addressed by the name observers know it by
/// (the virtual reader name once replicated to the master).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderEvent {
    pub reader_name: String,
    pub kind: ReaderEventKind,
}

// ── Plugin events ─────────────────────────────────────────────────────────────

/// Reader population change at the plugin level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginEventKind {
    ReaderConnected,
    ReaderDisconnected,
}

/// A reader appearing in or vanishing from a plugin's registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEvent {
    pub plugin_name: String,
    pub reader_names: Vec<String>,
    pub kind: PluginEventKind,
}
