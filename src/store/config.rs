//! Store configuration
//!
//! Configured by the host at startup and immutable afterwards. Every field
//! has a default, so an empty JSON object is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{StoreError, StoreResult};

fn default_compaction_batch_limit() -> usize {
    1000
}

fn default_compaction_sleep_interval_ms() -> u64 {
    10
}

fn default_restore_chunk_size() -> usize {
    10_000
}

/// Tunables of the MVCC store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum records deleted per compaction batch transaction.
    #[serde(default = "default_compaction_batch_limit")]
    pub compaction_batch_limit: usize,

    /// Pause between compaction batches, in milliseconds.
    ///
    /// Trades compaction throughput for foreground latency.
    #[serde(default = "default_compaction_sleep_interval_ms")]
    pub compaction_sleep_interval_ms: u64,

    /// Records read per backend transaction during restore.
    #[serde(default = "default_restore_chunk_size")]
    pub restore_chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compaction_batch_limit: default_compaction_batch_limit(),
            compaction_sleep_interval_ms: default_compaction_sleep_interval_ms(),
            restore_chunk_size: default_restore_chunk_size(),
        }
    }
}

impl StoreConfig {
    /// Parses a configuration from JSON, then validates it.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let config: StoreConfig =
            serde_json::from_str(json).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StoreResult<()> {
        if self.compaction_batch_limit == 0 {
            return Err(StoreError::InvalidConfig(
                "compaction_batch_limit must be greater than 0".to_string(),
            ));
        }
        if self.restore_chunk_size == 0 {
            return Err(StoreError::InvalidConfig(
                "restore_chunk_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Pause between compaction batches.
    pub fn compaction_sleep_interval(&self) -> Duration {
        Duration::from_millis(self.compaction_sleep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.compaction_batch_limit, 1000);
        assert_eq!(config.compaction_sleep_interval(), Duration::from_millis(10));
        assert_eq!(config.restore_chunk_size, 10_000);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = StoreConfig::from_json(r#"{"compaction_batch_limit": 50}"#).unwrap();
        assert_eq!(config.compaction_batch_limit, 50);
        assert_eq!(config.compaction_sleep_interval_ms, 10);

        assert_eq!(StoreConfig::from_json("{}").unwrap(), StoreConfig::default());
    }

    #[test]
    fn test_zero_batch_limit_rejected() {
        let err = StoreConfig::from_json(r#"{"compaction_batch_limit": 0}"#).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_restore_chunk_rejected() {
        let config = StoreConfig {
            restore_chunk_size: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            StoreConfig::from_json("not json"),
            Err(StoreError::InvalidConfig(_))
        ));
    }
}
