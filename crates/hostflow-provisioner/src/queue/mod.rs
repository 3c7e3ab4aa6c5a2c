//! Task Queue Adapter
//!
//! At-least-once delivery with visibility timeouts, three priority lanes and
//! a dead-letter list. Every dequeue hands out a fresh [`Receipt`]; calls
//! made with an outdated receipt are ignored.

mod memory;

pub use memory::MemoryTaskQueue;

use crate::config::secs;
use crate::error::QueueError;
use crate::task::{Delivery, Operation, ProvisioningTask, Receipt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Priority lane, served in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Critical,
    Default,
    Low,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Critical, Lane::Default, Lane::Low];

    fn index(self) -> usize {
        match self {
            Lane::Critical => 0,
            Lane::Default => 1,
            Lane::Low => 2,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Critical => write!(f, "critical"),
            Lane::Default => write!(f, "default"),
            Lane::Low => write!(f, "low"),
        }
    }
}

/// Which lane each operation is queued in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneMapping {
    pub create: Lane,
    pub delete: Lane,
    pub resize: Lane,
}

impl Default for LaneMapping {
    fn default() -> Self {
        Self {
            create: Lane::Default,
            delete: Lane::Critical,
            resize: Lane::Low,
        }
    }
}

impl LaneMapping {
    pub fn lane_for(&self, operation: Operation) -> Lane {
        match operation {
            Operation::Create => self.create,
            Operation::Delete => self.delete,
            Operation::Resize => self.resize,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a dequeued task stays reserved
    #[serde(with = "secs")]
    pub visibility_timeout: Duration,

    /// Failures before a task is dead-lettered
    pub max_attempts: u32,

    /// Delay before the first redelivery of a failed task
    #[serde(with = "secs")]
    pub retry_delay: Duration,

    /// Upper bound of the redelivery delay
    #[serde(with = "secs")]
    pub max_retry_delay: Duration,

    pub lanes: LaneMapping,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(20 * 60),
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(5 * 60),
            lanes: LaneMapping::default(),
        }
    }
}

impl QueueConfig {
    /// Redelivery delay after `attempts` failures
    pub fn retry_delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

/// Result of [`TaskQueue::fail`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Requeued for another attempt
    Retrying { attempts: u32, delay: Duration },
    /// Moved to the dead-letter list
    DeadLettered { attempts: u32 },
    /// The receipt no longer matches a reservation
    Stale,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub task: ProvisioningTask,
    pub error: String,
    pub dead_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub critical: usize,
    pub default: usize,
    pub low: usize,
    pub in_flight: usize,
    pub dead_letters: usize,
}

impl QueueStats {
    pub fn queued(&self) -> usize {
        self.critical + self.default + self.low
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add a task; returns `false` when a task with the same id is known
    async fn enqueue(&self, task: ProvisioningTask) -> Result<bool>;

    /// Reserve the next available task, highest lane first
    async fn dequeue(&self) -> Result<Option<Delivery>>;

    /// Remove a finished task; returns `false` for a stale receipt
    async fn ack(&self, receipt: &Receipt) -> Result<bool>;

    /// Requeue after `delay` without counting a failure
    async fn release(&self, receipt: &Receipt, delay: Duration) -> Result<bool>;

    /// Count a failure and requeue with backoff or dead-letter
    async fn fail(&self, receipt: &Receipt, error: &str) -> Result<FailOutcome>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;

    /// Put a dead-lettered task back with a fresh attempt count
    ///
    /// Meant for tasks whose resource was left alone by the dead letter. A
    /// resource the worker already moved to `failed` ends the requeued task as
    /// `Outcome::Duplicate`; `ProvisioningService::retry_failed` is the way to
    /// run such a resource again.
    async fn requeue_dead_letter(&self, task_id: &str) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lane_mapping() {
        let lanes = LaneMapping::default();
        assert_eq!(lanes.lane_for(Operation::Delete), Lane::Critical);
        assert_eq!(lanes.lane_for(Operation::Create), Lane::Default);
        assert_eq!(lanes.lane_for(Operation::Resize), Lane::Low);
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let config = QueueConfig {
            retry_delay: Duration::from_secs(10),
            max_retry_delay: Duration::from_secs(60),
            ..QueueConfig::default()
        };
        assert_eq!(config.retry_delay_for(1), Duration::from_secs(10));
        assert_eq!(config.retry_delay_for(2), Duration::from_secs(20));
        assert_eq!(config.retry_delay_for(3), Duration::from_secs(40));
        assert_eq!(config.retry_delay_for(4), Duration::from_secs(60));
        assert_eq!(config.retry_delay_for(40), Duration::from_secs(60));
    }
}
