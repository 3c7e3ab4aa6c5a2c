//! Provisioner configuration
//!
//! Every section has defaults, so an empty file (or no file) yields a
//! working setup. Durations are written in seconds.

use crate::orchestrator::OrchestratorConfig;
use crate::queue::QueueConfig;
use crate::worker::WorkerConfig;
use hostflow_cloud::{CacheConfig, RetryConfig};
use hostflow_config::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Serialize a `Duration` as whole seconds
pub mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Directory of the file store; in-memory store when unset
    pub state_dir: Option<PathBuf>,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub orchestrator: OrchestratorConfig,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub outbox: OutboxSettings,
    pub reconcile: ReconcileSettings,
}

impl ProvisionerConfig {
    /// Check cross-section invariants
    pub fn validate(&self) -> Result<()> {
        if self.worker.workers == 0 {
            return Err(invalid("worker.workers must be at least 1"));
        }
        if self.queue.max_attempts == 0 {
            return Err(invalid("queue.max_attempts must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.orchestrator.poll_interval.is_zero() {
            return Err(invalid("orchestrator.poll_interval must be positive"));
        }

        let longest = self.worker.longest_budget();
        if self.queue.visibility_timeout < longest {
            return Err(invalid(format!(
                "queue.visibility_timeout ({}s) must not be shorter than the longest task budget ({}s)",
                self.queue.visibility_timeout.as_secs(),
                longest.as_secs()
            )));
        }

        let waits = [
            (
                "orchestrator.ready_timeout",
                self.orchestrator.ready_timeout,
                "worker.create_budget",
                self.worker.create_budget,
            ),
            (
                "orchestrator.delete_timeout",
                self.orchestrator.delete_timeout,
                "worker.delete_budget",
                self.worker.delete_budget,
            ),
            (
                "orchestrator.resize_timeout",
                self.orchestrator.resize_timeout,
                "worker.resize_budget",
                self.worker.resize_budget,
            ),
        ];
        for (wait_name, wait, budget_name, budget) in waits {
            if wait > budget {
                return Err(invalid(format!(
                    "{} ({}s) exceeds {} ({}s)",
                    wait_name,
                    wait.as_secs(),
                    budget_name,
                    budget.as_secs()
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Provider-call retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetrySettings {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay_ms: config.initial_delay.as_millis() as u64,
            max_delay_secs: config.max_delay.as_secs(),
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            backoff_multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// Result cache lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(with = "secs")]
    pub catalog_ttl: Duration,
    #[serde(with = "secs")]
    pub status_ttl: Duration,
    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            catalog_ttl: defaults.catalog_ttl,
            status_ttl: defaults.status_ttl,
            max_entries: defaults.max_entries,
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            catalog_ttl: self.catalog_ttl,
            status_ttl: self.status_ttl,
            max_entries: self.max_entries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    #[serde(with = "secs")]
    pub interval: Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub enabled: bool,
    #[serde(with = "secs")]
    pub interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15 * 60),
        }
    }
}
