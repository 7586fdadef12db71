//! The remote plugin: the master's registry of virtual readers and the
//! plugin-level event channel observers subscribe to.
//!
//! Upstream code discovers remote readers here exactly as it would discover
//! local ones from any other plugin: list names, fetch by name, watch for
//! `ReaderConnected` / `ReaderDisconnected`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use cardlink_core::{PluginEvent, PluginEventKind};

use crate::virtual_reader::VirtualReader;

/// Registry of the virtual readers currently backed by an active session.
pub struct RemotePlugin {
    name: String,
    readers: Mutex<HashMap<String, Arc<VirtualReader>>>,
    events: broadcast::Sender<PluginEvent>,
}

impl RemotePlugin {
    pub(crate) fn new(name: impl Into<String>, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            name: name.into(),
            readers: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to plugin events. Delivery is asynchronous and never blocks
    /// the publisher.
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    /// Fetches a virtual reader by name.
    pub async fn reader(&self, name: &str) -> Option<Arc<VirtualReader>> {
        self.readers.lock().await.get(name).cloned()
    }

    /// Names of all virtual readers currently present.
    pub async fn reader_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.readers.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn reader_count(&self) -> usize {
        self.readers.lock().await.len()
    }

    /// Adds a freshly bound reader and emits exactly one `ReaderConnected`.
    pub(crate) async fn insert_reader(&self, reader: Arc<VirtualReader>) {
        let name = reader.name().to_string();
        self.readers.lock().await.insert(name.clone(), reader);
        debug!(reader = %name, plugin = %self.name, "virtual reader registered");
        self.emit(PluginEventKind::ReaderConnected, vec![name]);
    }

    /// Removes a reader whose session ended and emits exactly one
    /// `ReaderDisconnected`; removing an absent name is a no-op with no event.
    pub(crate) async fn remove_reader(&self, name: &str) -> Option<Arc<VirtualReader>> {
        let removed = self.readers.lock().await.remove(name);
        if removed.is_some() {
            debug!(reader = %name, plugin = %self.name, "virtual reader removed");
            self.emit(PluginEventKind::ReaderDisconnected, vec![name.to_string()]);
        }
        removed
    }

    fn emit(&self, kind: PluginEventKind, reader_names: Vec<String>) {
        // A send error only means nobody is subscribed right now.
        let _ = self.events.send(PluginEvent {
            plugin_name: self.name.clone(),
            reader_names,
            kind,
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
