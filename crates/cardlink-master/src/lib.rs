//! # cardlink-master
//!
//! The master endpoint of Cardlink: the node that drives remote smart-card
//! readers through virtual-reader proxies. It owns the session state machine
//! binding `(nativeReaderName, slaveNodeId)` pairs, the plugin registry of
//! virtual readers, and the dispatcher serving connect/disconnect requests
//! and replicated events from slaves.
//!
//! Upstream card-protocol code only ever touches [`RemotePlugin`] and
//! [`VirtualReader`] — the same discover/transmit/observe surface a purely
//! local reader would offer.

pub mod api;
pub mod plugin;
pub mod session;
pub mod virtual_reader;

pub use api::MasterApi;
pub use plugin::RemotePlugin;
pub use session::{Session, SessionManager};
pub use virtual_reader::{TransmitSetResult, VirtualReader};
