//! A scripted in-memory native reader.
//!
//! [`StubReader`] simulates a physical reader for tests and demos: insert a
//! [`StubCard`] scripted with hex command/response pairs, and the reader
//! answers `process_apdu` from the script, emitting the same events a real
//! driver would.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

use cardlink_core::domain::apdu::{parse_hex, to_hex, HexError};
use cardlink_core::{ApduRequest, ApduResponse, ReaderError, TransmissionMode};
use cardlink_slave::native::{NativeReader, NativeReaderEvent};

const EVENT_CAPACITY: usize = 64;

/// A simulated card: an ATR and a table of scripted exchanges.
#[derive(Debug, Clone, Default)]
pub struct StubCard {
    atr: Vec<u8>,
    commands: HashMap<String, String>,
}

impl StubCard {
    pub fn new(atr: Vec<u8>) -> Self {
        Self {
            atr,
            commands: HashMap::new(),
        }
    }

    /// Builds a card from a hex ATR.
    pub fn from_hex_atr(atr: &str) -> Result<Self, HexError> {
        Ok(Self::new(parse_hex(atr)?))
    }

    /// Scripts one exchange: when `command` arrives, `response` is returned.
    /// Spaces in either string are ignored.
    pub fn with_hex_command(mut self, command: &str, response: &str) -> Self {
        self.commands.insert(normalize(command), normalize(response));
        self
    }

    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    fn response_for(&self, apdu: &ApduRequest) -> Option<&String> {
        self.commands.get(&to_hex(apdu.bytes()))
    }
}

fn normalize(hex: &str) -> String {
    hex.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

struct StubState {
    card: Option<StubCard>,
    channel_open: bool,
}

/// Scripted native reader. Register it with a `SlaveApi`, then drive card
/// presence from the test body.
pub struct StubReader {
    name: String,
    transmission_mode: TransmissionMode,
    state: Mutex<StubState>,
    events: broadcast::Sender<NativeReaderEvent>,
}

impl StubReader {
    pub fn new(name: impl Into<String>, transmission_mode: TransmissionMode) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.into(),
            transmission_mode,
            state: Mutex::new(StubState {
                card: None,
                channel_open: false,
            }),
            events,
        }
    }

    /// Puts a card in the field and emits `CardInserted`.
    pub fn insert_card(&self, card: StubCard) {
        self.lock().card = Some(card);
        let _ = self.events.send(NativeReaderEvent::CardInserted);
    }

    /// Takes the card out of the field and emits `CardRemoved`.
    pub fn remove_card(&self) {
        let mut state = self.lock();
        state.card = None;
        state.channel_open = false;
        drop(state);
        let _ = self.events.send(NativeReaderEvent::CardRemoved);
    }

    /// Simulates a hardware fault notification.
    pub fn report_io_error(&self, message: impl Into<String>) {
        let _ = self.events.send(NativeReaderEvent::IoError {
            message: message.into(),
        });
    }

    pub fn is_channel_open(&self) -> bool {
        self.lock().channel_open
    }

    pub fn has_card(&self) -> bool {
        self.lock().card.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NativeReader for StubReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn transmission_mode(&self) -> TransmissionMode {
        self.transmission_mode
    }

    fn open_channel(&self) -> Result<(), ReaderError> {
        let mut state = self.lock();
        if state.card.is_none() {
            return Err(ReaderError::Io("no card present".to_string()));
        }
        state.channel_open = true;
        Ok(())
    }

    fn close_channel(&self) -> Result<(), ReaderError> {
        self.lock().channel_open = false;
        Ok(())
    }

    fn process_apdu(&self, apdu: &ApduRequest) -> Result<ApduResponse, ReaderError> {
        let state = self.lock();
        let card = state
            .card
            .as_ref()
            .ok_or_else(|| ReaderError::Io("no card present".to_string()))?;
        let response_hex = card
            .response_for(apdu)
            .ok_or_else(|| ReaderError::Io("no response available for this request".to_string()))?;
        let bytes = parse_hex(response_hex)
            .map_err(|e| ReaderError::Io(format!("scripted response is not valid hex: {e}")))?;
        Ok(ApduResponse::new(bytes))
    }

    fn events(&self) -> Option<broadcast::Receiver<NativeReaderEvent>> {
        Some(self.events.subscribe())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
