//! Provisioning service
//!
//! Entry points for callers: request resources, inspect them and read the
//! provider catalog. Requests only write to the store; work happens in the
//! worker pool.

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{ProvisionError, Result};
use crate::outbox::OutboxRelay;
use crate::resource::{ManagedResource, NewResource, ResourceStatus, ResourceUpdate};
use crate::store::ResourceStore;
use crate::task::ProvisioningTask;
use hostflow_cloud::{CachedProvider, CallContext, CatalogKind, CatalogOption, ServerObservation};
use std::sync::Arc;
use std::time::Duration;

pub struct ProvisioningService {
    store: Arc<dyn ResourceStore>,
    provider: Arc<CachedProvider>,
    audit: Arc<dyn AuditSink>,
    relay: Option<Arc<OutboxRelay>>,
    call_timeout: Duration,
}

impl ProvisioningService {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        provider: Arc<CachedProvider>,
        audit: Arc<dyn AuditSink>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            audit,
            relay: None,
            call_timeout,
        }
    }

    /// Hand new tasks to the queue right away instead of waiting for the relay loop
    pub fn with_relay(mut self, relay: Arc<OutboxRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Record a new `queued` resource together with its create task
    pub async fn enqueue_provisioning(&self, request: NewResource) -> Result<ManagedResource> {
        request.validate().map_err(ProvisionError::InvalidRequest)?;

        let resource = request.into_resource();
        let task = ProvisioningTask::create(&resource);
        let task_id = task.task_id.clone();
        let resource = self.store.create(resource, task).await?;

        tracing::info!(
            resource_id = %resource.id,
            tenant_id = %resource.tenant_id,
            task_id = %task_id,
            size = %resource.size,
            "Provisioning requested"
        );
        self.audit
            .record(AuditEvent::new(&resource, "provisioning requested"));
        self.dispatch().await;
        Ok(resource)
    }

    pub async fn enqueue_delete(&self, id: &str) -> Result<ProvisioningTask> {
        let resource = self.store.get(id).await?;
        if resource.status == ResourceStatus::Deleted {
            return Err(ProvisionError::InvalidRequest(format!(
                "resource {} is already deleted",
                id
            )));
        }

        let task = ProvisioningTask::delete(&resource);
        self.store.add_task(task.clone()).await?;

        tracing::info!(resource_id = %id, task_id = %task.task_id, "Deletion requested");
        self.audit
            .record(AuditEvent::new(&resource, "deletion requested").for_task(&task));
        self.dispatch().await;
        Ok(task)
    }

    pub async fn enqueue_resize(&self, id: &str, size: &str) -> Result<ProvisioningTask> {
        if size.trim().is_empty() {
            return Err(ProvisionError::InvalidRequest(
                "target size must not be empty".to_string(),
            ));
        }

        let resource = self.store.get(id).await?;
        if resource.status != ResourceStatus::Ready {
            return Err(ProvisionError::InvalidRequest(format!(
                "resource {} is {}, only ready resources can be resized",
                id, resource.status
            )));
        }

        let task = ProvisioningTask::resize(&resource, size);
        self.store.add_task(task.clone()).await?;

        tracing::info!(resource_id = %id, task_id = %task.task_id, size, "Resize requested");
        self.audit.record(
            AuditEvent::new(&resource, format!("resize to {} requested", size)).for_task(&task),
        );
        self.dispatch().await;
        Ok(task)
    }

    /// Put a failed resource back in the queue with a fresh create task
    pub async fn retry_failed(&self, id: &str) -> Result<ManagedResource> {
        let resource = self.store.get(id).await?;
        if resource.status != ResourceStatus::Failed {
            return Err(ProvisionError::InvalidRequest(format!(
                "resource {} is {}, only failed resources can be retried",
                id, resource.status
            )));
        }

        let task = ProvisioningTask::create(&resource);
        let update = ResourceUpdate::status(ResourceStatus::Queued)
            .clear_error()
            .with_attempts(0);
        let queued = self
            .store
            .update_with_task(id, resource.version, update, task.clone())
            .await?;

        tracing::info!(resource_id = %id, task_id = %task.task_id, "Retrying failed resource");
        self.audit.record(
            AuditEvent::new(&queued, "operator retry")
                .for_task(&task)
                .transition(ResourceStatus::Failed, ResourceStatus::Queued),
        );
        self.dispatch().await;
        Ok(queued)
    }

    /// The stored record
    pub async fn get_resource_status(&self, id: &str) -> Result<ManagedResource> {
        Ok(self.store.get(id).await?)
    }

    /// What the provider currently reports for a resource
    ///
    /// Uncached while the resource is in a transient status. `None` when no
    /// server is recorded or the provider no longer knows it.
    pub async fn live_status(&self, id: &str) -> Result<Option<ServerObservation>> {
        let resource = self.store.get(id).await?;
        let Some(provider_resource_id) = resource.provider_resource_id.as_deref() else {
            return Ok(None);
        };

        let ctx = CallContext::with_timeout(self.call_timeout);
        let observed = if resource.status.is_transient() {
            self.provider.inner().get(provider_resource_id, &ctx).await
        } else {
            self.provider.get(provider_resource_id, &ctx).await
        };

        match observed {
            Ok(observation) => Ok(Some(observation)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_resources(&self, tenant_id: Option<&str>) -> Result<Vec<ManagedResource>> {
        Ok(self.store.list(tenant_id).await?)
    }

    pub async fn list_catalog(&self, kind: CatalogKind) -> Result<Arc<Vec<CatalogOption>>> {
        let ctx = CallContext::with_timeout(self.call_timeout);
        Ok(self.provider.list_catalog(kind, &ctx).await?)
    }

    async fn dispatch(&self) {
        let Some(relay) = &self.relay else {
            return;
        };
        // The relay loop picks the entry up later
        if let Err(e) = relay.dispatch_pending().await {
            tracing::warn!(error = %e, "Immediate dispatch failed");
        }
    }
}
