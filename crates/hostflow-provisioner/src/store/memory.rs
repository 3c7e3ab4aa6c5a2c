use super::state::StoreState;
use super::{ResourceStore, Result};
use crate::resource::{ManagedResource, ResourceUpdate};
use crate::task::{OutboxEntry, ProvisioningTask};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Volatile store for tests and single-process setups
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create(
        &self,
        resource: ManagedResource,
        task: ProvisioningTask,
    ) -> Result<ManagedResource> {
        self.state.write().await.create(resource, task)
    }

    async fn get(&self, id: &str) -> Result<ManagedResource> {
        self.state.read().await.get(id)
    }

    async fn list(&self, tenant_id: Option<&str>) -> Result<Vec<ManagedResource>> {
        Ok(self.state.read().await.list(tenant_id))
    }

    async fn update(
        &self,
        id: &str,
        expected_version: u64,
        update: ResourceUpdate,
    ) -> Result<ManagedResource> {
        self.state
            .write()
            .await
            .update(id, expected_version, &update, None)
    }

    async fn update_with_task(
        &self,
        id: &str,
        expected_version: u64,
        update: ResourceUpdate,
        task: ProvisioningTask,
    ) -> Result<ManagedResource> {
        self.state
            .write()
            .await
            .update(id, expected_version, &update, Some(task))
    }

    async fn add_task(&self, task: ProvisioningTask) -> Result<()> {
        self.state.write().await.add_task(task)
    }

    async fn outbox_pending(&self) -> Result<Vec<OutboxEntry>> {
        Ok(self.state.read().await.outbox_pending())
    }

    async fn outbox_mark_dispatched(&self, task_id: &str) -> Result<()> {
        self.state.write().await.mark_dispatched(task_id)
    }

    async fn outbox_complete(&self, task_id: &str) -> Result<()> {
        self.state.write().await.complete(task_id);
        Ok(())
    }

    async fn outbox_reset(&self) -> Result<usize> {
        Ok(self.state.write().await.reset())
    }
}
