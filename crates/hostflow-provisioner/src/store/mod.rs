//! Resource State Store
//!
//! Persists resource records and the task outbox. Every write is checked
//! against the record's `version` and the status graph.

mod file;
mod memory;
mod state;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::resource::{ManagedResource, ResourceUpdate};
use crate::task::{OutboxEntry, ProvisioningTask};
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert a new record together with its first task
    async fn create(
        &self,
        resource: ManagedResource,
        task: ProvisioningTask,
    ) -> Result<ManagedResource>;

    async fn get(&self, id: &str) -> Result<ManagedResource>;

    /// All records, optionally limited to one tenant
    async fn list(&self, tenant_id: Option<&str>) -> Result<Vec<ManagedResource>>;

    /// Version-checked update
    async fn update(
        &self,
        id: &str,
        expected_version: u64,
        update: ResourceUpdate,
    ) -> Result<ManagedResource>;

    /// Version-checked update that also records a task in the outbox
    async fn update_with_task(
        &self,
        id: &str,
        expected_version: u64,
        update: ResourceUpdate,
        task: ProvisioningTask,
    ) -> Result<ManagedResource>;

    /// Record a task for an existing resource
    async fn add_task(&self, task: ProvisioningTask) -> Result<()>;

    /// Outbox entries not yet handed to the queue, oldest first
    async fn outbox_pending(&self) -> Result<Vec<OutboxEntry>>;

    async fn outbox_mark_dispatched(&self, task_id: &str) -> Result<()>;

    /// Remove an entry once its task is acknowledged or dead-lettered
    async fn outbox_complete(&self, task_id: &str) -> Result<()>;

    /// Mark every entry undispatched; returns how many were reset
    async fn outbox_reset(&self) -> Result<usize>;
}
