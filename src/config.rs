//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::DEFAULT_SEED;
use crate::error::{Error, Result};

/// How long finished jobs stay pollable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Terminal jobs kept before the oldest are evicted.
    pub max_finished_jobs: usize,
    /// Terminal jobs older than this (seconds since they finished) are evicted.
    pub finished_ttl_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_finished_jobs: 1024,
            finished_ttl_secs: 3600,
        }
    }
}

impl RetentionPolicy {
    pub fn finished_ttl(&self) -> Duration {
        Duration::from_secs(self.finished_ttl_secs)
    }
}

/// Settings of [`ClusteringEngine`](crate::pipeline::ClusteringEngine) and
/// [`JobOrchestrator`](crate::jobs::JobOrchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-request timeout of remote progress callbacks.
    pub callback_timeout_secs: u64,
    /// Background jobs allowed to run at once.
    pub max_concurrent_jobs: usize,
    /// Seed of the dimensionality reducer.
    pub reduction_seed: u64,
    /// Reducer optimisation epochs; `None` picks by batch size.
    pub reduction_epochs: Option<usize>,
    pub retention: RetentionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            callback_timeout_secs: 10,
            max_concurrent_jobs: 4,
            reduction_seed: DEFAULT_SEED,
            reduction_epochs: None,
            retention: RetentionPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.callback_timeout_secs == 0 {
            return Err(Error::InvalidConfig("callback_timeout_secs must be positive".into()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(Error::InvalidConfig("max_concurrent_jobs must be positive".into()));
        }
        if self.reduction_epochs == Some(0) {
            return Err(Error::InvalidConfig("reduction_epochs must be positive".into()));
        }
        if self.retention.max_finished_jobs == 0 {
            return Err(Error::InvalidConfig(
                "retention.max_finished_jobs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.callback_timeout(), Duration::from_secs(10));
        assert_eq!(config.reduction_seed, 42);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"max_concurrent_jobs": 2, "retention": {"finished_ttl_secs": 5}}"#)
            .unwrap();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.retention.finished_ttl(), Duration::from_secs(5));
        assert_eq!(config.retention.max_finished_jobs, 1024);
        assert_eq!(config.callback_timeout_secs, 10);
    }

    #[test]
    fn rejects_zero_values() {
        for json in [
            r#"{"callback_timeout_secs": 0}"#,
            r#"{"max_concurrent_jobs": 0}"#,
            r#"{"reduction_epochs": 0}"#,
            r#"{"retention": {"max_finished_jobs": 0}}"#,
        ] {
            let err = EngineConfig::from_json(json).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{json}");
        }
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(Error::InvalidConfig(_))
        ));
    }
}
