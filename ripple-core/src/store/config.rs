//! Store configuration.

use serde::{Deserialize, Serialize};

/// Default number of undo entries kept when history is enabled.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Options for a [`Store`](super::Store).
///
/// Missing fields take their defaults when deserialized, so a host can embed
/// this in its own configuration file:
///
/// ```rust
/// use ripple_core::store::StoreConfig;
///
/// let config: StoreConfig = serde_json::from_str(r#"{ "enable_history": true }"#).unwrap();
/// assert!(config.enable_history);
/// assert_eq!(config.history_limit, 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Record undo/redo history.
    pub enable_history: bool,

    /// Maximum number of undo entries. The oldest entry is evicted first.
    pub history_limit: usize,
}

impl StoreConfig {
    /// Enable history bounded to `limit` undo entries.
    pub fn with_history(mut self, limit: usize) -> Self {
        self.enable_history = true;
        self.history_limit = limit;
        self
    }

    pub fn without_history(mut self) -> Self {
        self.enable_history = false;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enable_history: false,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_off_by_default() {
        let config = StoreConfig::default();
        assert!(!config.enable_history);
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn builder_toggles_history() {
        let config = StoreConfig::default().with_history(3);
        assert!(config.enable_history);
        assert_eq!(config.history_limit, 3);

        let config = config.without_history();
        assert!(!config.enable_history);
        assert_eq!(config.history_limit, 3);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{ "history_limit": 7 }"#).unwrap();
        assert_eq!(
            config,
            StoreConfig {
                enable_history: false,
                history_limit: 7,
            }
        );

        let empty: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, StoreConfig::default());
    }
}
