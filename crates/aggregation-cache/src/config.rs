//! Cache lifetimes and capacity.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a computed value is served as fresh.
    pub ready_ttl_secs: u64,
    /// How long a failure is replayed to callers before recomputing.
    pub failed_ttl_secs: u64,
    /// How long an expired value stays available to stale-allowed callers.
    pub stale_retention_secs: u64,
    /// Entry limit; least recently used settled entries go first.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ready_ttl_secs: 900,
            failed_ttl_secs: 30,
            stale_retention_secs: 6 * 3600,
            max_entries: 1024,
        }
    }
}

impl CacheConfig {
    pub fn ready_ttl(&self) -> Duration {
        Duration::from_secs(self.ready_ttl_secs)
    }

    pub fn failed_ttl(&self) -> Duration {
        Duration::from_secs(self.failed_ttl_secs)
    }

    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.stale_retention_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.ready_ttl_secs == 0 {
            return Err("cache ready_ttl_secs must be > 0".to_string());
        }
        if self.failed_ttl_secs > self.ready_ttl_secs {
            return Err(format!(
                "cache failed_ttl_secs ({}) must not exceed ready_ttl_secs ({})",
                self.failed_ttl_secs, self.ready_ttl_secs
            ));
        }
        if self.max_entries == 0 {
            return Err("cache max_entries must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.failed_ttl() < config.ready_ttl());
    }

    #[test]
    fn test_failed_ttl_longer_than_ready_rejected() {
        let config = CacheConfig {
            ready_ttl_secs: 10,
            failed_ttl_secs: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = CacheConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
