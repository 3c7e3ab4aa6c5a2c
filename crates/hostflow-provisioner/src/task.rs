//! Provisioning tasks, queue deliveries and outbox entries

use crate::resource::ManagedResource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What a task asks the orchestrator to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Delete,
    Resize,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Resize => "resize",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "delete" => Ok(Operation::Delete),
            "resize" => Ok(Operation::Resize),
            other => Err(format!("unknown operation: {}", other)),
        }
    }
}

/// Operation parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Target size of a resize
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_size: Option<String>,
}

/// A unit of work for the worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningTask {
    pub task_id: String,
    pub resource_id: String,
    pub tenant_id: String,
    pub operation: Operation,
    #[serde(default)]
    pub payload: TaskPayload,
    pub enqueued_at: DateTime<Utc>,

    /// Set by the queue when the task is handed to a worker
    #[serde(default)]
    pub visibility_deadline: Option<DateTime<Utc>>,

    /// Failed processing attempts
    #[serde(default)]
    pub attempts: u32,

    /// Times the task was handed to a worker
    #[serde(default)]
    pub deliveries: u32,
}

impl ProvisioningTask {
    fn new(resource: &ManagedResource, operation: Operation, payload: TaskPayload) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource.id.clone(),
            tenant_id: resource.tenant_id.clone(),
            operation,
            payload,
            enqueued_at: Utc::now(),
            visibility_deadline: None,
            attempts: 0,
            deliveries: 0,
        }
    }

    pub fn create(resource: &ManagedResource) -> Self {
        Self::new(resource, Operation::Create, TaskPayload::default())
    }

    pub fn delete(resource: &ManagedResource) -> Self {
        Self::new(resource, Operation::Delete, TaskPayload::default())
    }

    pub fn resize(resource: &ManagedResource, target_size: impl Into<String>) -> Self {
        Self::new(
            resource,
            Operation::Resize,
            TaskPayload {
                target_size: Some(target_size.into()),
            },
        )
    }
}

/// Identifies one delivery of a task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Receipt(String);

impl Receipt {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Receipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A task reserved by one worker
#[derive(Debug, Clone)]
pub struct Delivery {
    pub task: ProvisioningTask,
    pub receipt: Receipt,
}

/// A task persisted together with its resource row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub task: ProvisioningTask,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn new(task: ProvisioningTask) -> Self {
        Self {
            task,
            created_at: Utc::now(),
            dispatched_at: None,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }
}
