//! Client configuration, loaded from RON.
//!
//! Every field has a default, so an empty file (`()`) is a valid config:
//!
//! ```ron
//! (
//!     tree: (max_depth: 512, pending_insert_ttl: 8, max_pending_inserts: 256),
//!     region_cell_size: 300.0,
//!     event_capacity: 256,
//!     resync_on_flush_failure: true,
//! )
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use folio_crdt::TreeConfig;

use crate::constants::{DEFAULT_EVENT_CAPACITY, DEFAULT_REGION_CELL_SIZE};

/// Tunables for a [`SyncClient`](crate::SyncClient).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bounds applied by the block tree.
    pub tree: TreeConfig,
    /// Cell edge of the layout region grid, in pixels.
    pub region_cell_size: f64,
    /// Buffered events per broadcast channel before slow receivers lag.
    pub event_capacity: usize,
    /// Re-fetch the snapshot after a rejected flush.
    pub resync_on_flush_failure: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tree: TreeConfig::default(),
            region_cell_size: DEFAULT_REGION_CELL_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            resync_on_flush_failure: true,
        }
    }
}

impl ClientConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = ron::from_str(text)?;
        config.validate()
    }

    /// Read and parse a `.ron` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be at least 1".into()));
        }
        if self.tree.max_depth == 0 {
            return Err(ConfigError::Invalid("tree.max_depth must be at least 1".into()));
        }
        if !(self.region_cell_size.is_finite() && self.region_cell_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "region_cell_size must be positive, got {}",
                self.region_cell_size
            )));
        }
        Ok(self)
    }
}

/// Errors that can occur when loading a client config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON write error: {0}")]
    RonWrite(#[from] ron::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = ClientConfig::from_ron_str("()").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.tree.max_depth, 512);
        assert_eq!(config.tree.pending_insert_ttl, 8);
        assert!(config.resync_on_flush_failure);
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let config = ClientConfig::from_ron_str(
            "(tree: (max_pending_inserts: 4), resync_on_flush_failure: false)",
        )
        .unwrap();
        assert_eq!(config.tree.max_pending_inserts, 4);
        assert_eq!(config.tree.max_depth, 512);
        assert!(!config.resync_on_flush_failure);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ClientConfig::from_ron_str("(event_capacity: 0)"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_ron_str("(region_cell_size: -1.0)"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_ron_str("(event_capacity: \"many\")"),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn test_load_from_file_round_trips() {
        let config = ClientConfig {
            event_capacity: 16,
            ..ClientConfig::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_ron_string().unwrap().as_bytes()).unwrap();

        let loaded = ClientConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
        assert!(matches!(
            ClientConfig::load(file.path().with_extension("missing")),
            Err(ConfigError::Io(_))
        ));
    }
}
