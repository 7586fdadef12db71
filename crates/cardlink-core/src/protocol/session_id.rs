//! Session-id allocation.
//!
//! Session ids are allocated by the master when a binding is created and name
//! the binding for its whole lifetime. The allocator is a plain atomic
//! counter prefixed with the allocating node's id, so ids are unique per node
//! without coordination and readable in logs (`master-1-0`, `master-1-1`, …).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::envelope::NodeId;

/// Thread-safe allocator of session ids for one node.
pub struct SessionIdFactory {
    node_id: NodeId,
    counter: AtomicU64,
}

impl SessionIdFactory {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the next session id and advances the counter.
    ///
    /// `Ordering::Relaxed` is sufficient: the counter only needs uniqueness,
    /// not memory synchronisation with other state.
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.node_id)
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
