//! Pending-request bookkeeping: correlates an outgoing request with the
//! caller awaiting its response.
//!
//! An entry lives from [`PendingRequests::register`] until the matching
//! response arrives, the deadline elapses, or the caller goes away — the
//! [`PendingResponse`] guard removes the entry on drop, so a cancelled caller
//! cannot leak bookkeeping (the action already applied on the remote side is
//! deliberately not undone). A response whose correlation id matches no entry
//! is handed back to the dispatcher, which discards it with a debug log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::ReaderError;
use crate::protocol::envelope::Envelope;
use crate::transport::{EnvelopeSender, TransportError};

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Envelope>>>>;

/// Shared table of in-flight requests, keyed by correlation id.
///
/// Cheap to clone; all clones observe the same table. The lock is only held
/// across map operations, never across awaits.
#[derive(Clone, Default)]
pub struct PendingRequests {
    map: PendingMap,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entry for `correlation` and returns the guard the caller
    /// awaits on.
    pub fn register(&self, correlation: Uuid) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(correlation, tx);
        PendingResponse {
            correlation,
            rx,
            map: Arc::clone(&self.map),
        }
    }

    /// Offers a received envelope to the table.
    ///
    /// Returns `None` when a waiting caller consumed it; returns the envelope
    /// back when no entry matches, so the dispatcher can treat it as a
    /// request/event — or, for a late response, discard it.
    pub fn try_complete(&self, envelope: Envelope) -> Option<Envelope> {
        let entry = self.lock().remove(&envelope.correlation_id);
        match entry {
            Some(tx) => {
                if let Err(unclaimed) = tx.send(envelope) {
                    // The caller timed out or was cancelled between lookup
                    // and delivery; same outcome as a late response.
                    debug!(
                        correlation = %unclaimed.correlation_id,
                        "response arrived for a caller that already gave up"
                    );
                }
                None
            }
            None => Some(envelope),
        }
    }

    /// Drops every entry, waking all waiters with a closed-link error.
    pub fn fail_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sends `envelope` and awaits its response, enforcing `timeout`.
    ///
    /// The pending entry is removed on every exit path: response, timeout,
    /// send failure, or caller cancellation.
    pub async fn call(
        &self,
        sender: &dyn EnvelopeSender,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, ReaderError> {
        let pending = self.register(envelope.correlation_id);
        let target = envelope.target_node_id.clone();
        sender.send(&target, envelope).await?;
        pending.wait(timeout).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<Envelope>>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Guard for one in-flight request. Dropping it releases the table entry.
pub struct PendingResponse {
    correlation: Uuid,
    rx: oneshot::Receiver<Envelope>,
    map: PendingMap,
}

impl PendingResponse {
    /// Awaits the response envelope.
    ///
    /// Raises [`ReaderError::TransportTimeout`] when the deadline elapses and
    /// a closed-link transport error when the table was torn down underneath
    /// the caller.
    pub async fn wait(mut self, timeout: Duration) -> Result<Envelope, ReaderError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(ReaderError::Transport(TransportError::Closed)),
            Err(_) => Err(ReaderError::TransportTimeout(timeout)),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.correlation);
    }
}
