//! # cardlink-stub
//!
//! Test and demo plumbing for Cardlink: a scripted in-memory native reader
//! (drive card presence from the test body, answer APDUs from a hex script)
//! and an in-process loopback transport wiring a master and a slave endpoint
//! together without any network.

pub mod loopback;
pub mod reader;

pub use loopback::{channel_link, spawn_pump, ChannelSender};
pub use reader::{StubCard, StubReader};
