//! # cardlink-slave
//!
//! The slave endpoint of Cardlink: the node the physical reader is attached
//! to. It registers native readers, offers them to the master with
//! `CONNECT_READER`, executes the master's `TRANSMIT_SET` and
//! `SET_DEFAULT_SELECTION` requests against the hardware, and forwards
//! native reader events upstream for the lifetime of each session.

pub mod api;
pub mod native;

pub use api::SlaveApi;
pub use native::{NativeReader, NativeReaderEvent};
