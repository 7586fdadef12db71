//! Session lifecycle: the state machine binding native readers to virtual
//! readers.
//!
//! Each `(nativeReaderName, slaveNodeId)` pair is either `UNBOUND` or
//! `BOUND`; binding an already-bound pair is rejected without touching the
//! existing session, and unbinding an unbound pair is rejected without side
//! effects. The map lock is held only across map operations, so concurrent
//! connect attempts on one pair cannot both succeed while different pairs
//! proceed independently.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use cardlink_core::protocol::session_id::SessionIdFactory;
use cardlink_core::{NodeId, ReaderError};

/// Key identifying one potential binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    native_reader_name: String,
    slave_node_id: NodeId,
}

/// One active binding between a native reader and its virtual reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub virtual_reader_name: String,
    pub native_reader_name: String,
    pub slave_node_id: NodeId,
}

/// Registry of active sessions, owned by the master dispatcher.
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionKey, Session>>,
    ids: SessionIdFactory,
}

impl SessionManager {
    pub fn new(master_node_id: NodeId) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ids: SessionIdFactory::new(master_node_id),
        }
    }

    /// Transitions a pair to `BOUND`, allocating its session id and virtual
    /// reader name.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::ReaderAlreadyConnected`] when the pair already
    /// has an active session; the existing session is left untouched.
    pub async fn bind(
        &self,
        native_reader_name: &str,
        slave_node_id: &NodeId,
    ) -> Result<Session, ReaderError> {
        let key = SessionKey {
            native_reader_name: native_reader_name.to_string(),
            slave_node_id: slave_node_id.clone(),
        };
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&key) {
            return Err(ReaderError::ReaderAlreadyConnected(format!(
                "{native_reader_name} on {slave_node_id}"
            )));
        }
        let session = Session {
            session_id: self.ids.next(),
            virtual_reader_name: format!("remote-{slave_node_id}-{native_reader_name}"),
            native_reader_name: native_reader_name.to_string(),
            slave_node_id: slave_node_id.clone(),
        };
        debug!(session = %session.session_id, reader = %native_reader_name, "pair bound");
        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Transitions a pair back to `UNBOUND`.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::ReaderNotConnected`] when no session exists for
    /// the pair.
    pub async fn unbind(
        &self,
        native_reader_name: &str,
        slave_node_id: &NodeId,
    ) -> Result<Session, ReaderError> {
        let key = SessionKey {
            native_reader_name: native_reader_name.to_string(),
            slave_node_id: slave_node_id.clone(),
        };
        self.sessions.lock().await.remove(&key).ok_or_else(|| {
            ReaderError::ReaderNotConnected(format!("{native_reader_name} on {slave_node_id}"))
        })
    }

    /// Unbinds every session held with `slave_node_id`; used when the
    /// transport to that node is lost.
    pub async fn unbind_all_for(&self, slave_node_id: &NodeId) -> Vec<Session> {
        let mut sessions = self.sessions.lock().await;
        let keys: Vec<SessionKey> = sessions
            .keys()
            .filter(|key| &key.slave_node_id == slave_node_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| sessions.remove(&key))
            .collect()
    }

    /// Looks up the active session for a pair, if any.
    pub async fn find(
        &self,
        native_reader_name: &str,
        slave_node_id: &NodeId,
    ) -> Option<Session> {
        let key = SessionKey {
            native_reader_name: native_reader_name.to_string(),
            slave_node_id: slave_node_id.clone(),
        };
        self.sessions.lock().await.get(&key).cloned()
    }

    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
