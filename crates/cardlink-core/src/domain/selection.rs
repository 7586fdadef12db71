//! Default selection: a scripted exchange run automatically on card insertion.

use serde::{Deserialize, Serialize};

use crate::domain::apdu::{ApduRequest, ChannelControl};

/// How insertion events are reported when a default selection is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationMode {
    /// Only matched insertions produce an event.
    MatchedOnly,
    /// Every insertion produces an event; matched ones carry the selection
    /// responses.
    Always,
}

/// Selection descriptor stored against a native reader and evaluated on the
/// next card presence.
///
/// The card matches when every selection APDU succeeds and the final
/// response carries a success status word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultSelectionRequest {
    pub apdus: Vec<ApduRequest>,
    pub channel: ChannelControl,
    pub notification_mode: NotificationMode,
}
