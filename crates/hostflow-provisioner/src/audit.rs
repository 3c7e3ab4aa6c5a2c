//! Audit events for resource state changes
//!
//! How events are stored is up to the sink; the default sink writes them to
//! the `hostflow::audit` tracing target.

use crate::resource::{ManagedResource, ResourceStatus};
use crate::task::{Operation, ProvisioningTask};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub resource_id: String,
    pub tenant_id: String,
    pub task_id: Option<String>,
    pub operation: Option<Operation>,
    pub from: Option<ResourceStatus>,
    pub to: Option<ResourceStatus>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(resource: &ManagedResource, message: impl Into<String>) -> Self {
        Self {
            resource_id: resource.id.clone(),
            tenant_id: resource.tenant_id.clone(),
            task_id: None,
            operation: None,
            from: None,
            to: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Event for a server with no local record
    pub fn unowned(resource_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            tenant_id: String::new(),
            task_id: None,
            operation: None,
            from: None,
            to: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn for_task(mut self, task: &ProvisioningTask) -> Self {
        self.task_id = Some(task.task_id.clone());
        self.operation = Some(task.operation);
        self
    }

    pub fn transition(mut self, from: ResourceStatus, to: ResourceStatus) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes events as structured log lines
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "hostflow::audit",
            resource_id = %event.resource_id,
            tenant_id = %event.tenant_id,
            task_id = event.task_id.as_deref().unwrap_or("-"),
            operation = event.operation.map(Operation::as_str).unwrap_or("-"),
            from = event.from.map(ResourceStatus::as_str).unwrap_or("-"),
            to = event.to.map(ResourceStatus::as_str).unwrap_or("-"),
            "{}",
            event.message
        );
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn for_resource(&self, resource_id: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.resource_id == resource_id)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::debug!(
            target: "hostflow::audit",
            resource_id = %event.resource_id,
            "{}",
            event.message
        );
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
