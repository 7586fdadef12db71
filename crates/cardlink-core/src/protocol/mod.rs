//! Wire protocol: the envelope and its binary codec, per-method payloads,
//! pending-request correlation, and session-id allocation.

pub mod bodies;
pub mod codec;
pub mod envelope;
pub mod pending;
pub mod session_id;
