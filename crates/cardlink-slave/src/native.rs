//! The native reader collaborator: the driver-level object that physically
//! reaches a card. Cardlink consumes it through this trait only — send
//! command bytes, get response bytes, or fail.

use tokio::sync::broadcast;

use cardlink_core::{ApduRequest, ApduResponse, ReaderError, TransmissionMode};

/// Hardware-level event emitted by an observable native reader.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeReaderEvent {
    CardInserted,
    CardRemoved,
    IoError { message: String },
}

/// A physical reader driver instance on the slave node.
///
/// Implementations are expected to be cheap to call from async context; a
/// blocking driver should wrap its calls accordingly before registering.
#[cfg_attr(test, mockall::automock)]
pub trait NativeReader: Send + Sync {
    /// Driver-level reader name, unique on this slave.
    fn name(&self) -> &str;

    /// Physical interface this reader exchanges through.
    fn transmission_mode(&self) -> TransmissionMode;

    /// Opens the physical channel to the card. Idempotent.
    fn open_channel(&self) -> Result<(), ReaderError>;

    /// Closes the physical channel to the card. Idempotent.
    fn close_channel(&self) -> Result<(), ReaderError>;

    /// Sends one command unit to the card and returns its response.
    fn process_apdu(&self, apdu: &ApduRequest) -> Result<ApduResponse, ReaderError>;

    /// Event stream for readers that support observation; `None` otherwise.
    /// Each call returns a fresh subscription.
    fn events(&self) -> Option<broadcast::Receiver<NativeReaderEvent>> {
        None
    }
}
