//! Node configuration.
//!
//! Every field except the node id has a serde default so a minimal TOML file
//! (or a bare `NodeConfig::new`) works out of the box and older files keep
//! parsing when fields are added.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Settings for one Cardlink endpoint (master or slave).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity this node advertises in every envelope it builds.
    pub node_id: String,

    /// Deadline for a request/response round trip, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Capacity of each event broadcast channel; slow observers that fall
    /// further behind than this see a lag notice, not blocked publishers.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_event_capacity() -> usize {
    64
}

impl NodeConfig {
    /// Builds a config with default tuning for `node_id`.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            request_timeout_ms: default_request_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }

    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Serializes this config to TOML text.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str(r#"node_id = "slave-1""#).unwrap();
        assert_eq!(config.node_id, "slave-1");
        assert_eq!(config.request_timeout_ms, 5_000);
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_explicit_fields_override_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            node_id = "master-1"
            request_timeout_ms = 250
            event_capacity = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = NodeConfig::new("master-1");
        let text = config.to_toml_string().unwrap();
        let parsed = NodeConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_node_id_is_an_error() {
        assert!(NodeConfig::from_toml_str("request_timeout_ms = 10").is_err());
    }
}
