//! In-memory state shared by the store implementations

use super::Result;
use crate::error::StoreError;
use crate::resource::{ManagedResource, ResourceUpdate};
use crate::task::{OutboxEntry, ProvisioningTask};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub resources: BTreeMap<String, ManagedResource>,
    #[serde(default)]
    pub outbox: BTreeMap<String, OutboxEntry>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
            outbox: BTreeMap::new(),
        }
    }
}

impl StoreState {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn create(
        &mut self,
        resource: ManagedResource,
        task: ProvisioningTask,
    ) -> Result<ManagedResource> {
        if self.resources.contains_key(&resource.id) {
            return Err(StoreError::AlreadyExists(resource.id));
        }
        self.outbox
            .insert(task.task_id.clone(), OutboxEntry::new(task));
        self.resources.insert(resource.id.clone(), resource.clone());
        self.touch();
        Ok(resource)
    }

    pub fn get(&self, id: &str) -> Result<ManagedResource> {
        self.resources
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn list(&self, tenant_id: Option<&str>) -> Vec<ManagedResource> {
        let mut resources: Vec<ManagedResource> = self
            .resources
            .values()
            .filter(|r| tenant_id.is_none_or(|t| r.tenant_id == t))
            .cloned()
            .collect();
        resources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        resources
    }

    pub fn update(
        &mut self,
        id: &str,
        expected_version: u64,
        update: &ResourceUpdate,
        task: Option<ProvisioningTask>,
    ) -> Result<ManagedResource> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if resource.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
                actual: resource.version,
            });
        }

        let mut next = resource.clone();
        next.apply(update)?;
        *resource = next.clone();

        if let Some(task) = task {
            self.outbox
                .insert(task.task_id.clone(), OutboxEntry::new(task));
        }
        self.touch();
        Ok(next)
    }

    pub fn add_task(&mut self, task: ProvisioningTask) -> Result<()> {
        if !self.resources.contains_key(&task.resource_id) {
            return Err(StoreError::NotFound(task.resource_id));
        }
        self.outbox
            .entry(task.task_id.clone())
            .or_insert_with(|| OutboxEntry::new(task));
        self.touch();
        Ok(())
    }

    pub fn outbox_pending(&self) -> Vec<OutboxEntry> {
        let mut pending: Vec<OutboxEntry> = self
            .outbox
            .values()
            .filter(|e| !e.is_dispatched())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.task.task_id.cmp(&b.task.task_id))
        });
        pending
    }

    pub fn mark_dispatched(&mut self, task_id: &str) -> Result<()> {
        let entry = self
            .outbox
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        entry.dispatched_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Completing an unknown entry is not an error
    pub fn complete(&mut self, task_id: &str) -> bool {
        let removed = self.outbox.remove(task_id).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    pub fn reset(&mut self) -> usize {
        let mut count = 0;
        for entry in self.outbox.values_mut() {
            if entry.dispatched_at.take().is_some() {
                count += 1;
            }
        }
        if count > 0 {
            self.touch();
        }
        count
    }
}
