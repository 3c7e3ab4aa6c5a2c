//! Provisioning Orchestrator
//!
//! Drives one task through the resource state machine. Provider errors never
//! leave this module: they end as `failed` plus `last_error` plus an audit
//! event. Store errors are returned so the worker can retry the task.

use crate::audit::{AuditEvent, AuditSink};
use crate::config::secs;
use crate::error::{ProvisionError, Result, StoreError};
use crate::poller::{PollOutcome, Poller, WaitFor};
use crate::resource::{ManagedResource, ResourceStatus, ResourceUpdate};
use crate::store::ResourceStore;
use crate::task::{Operation, ProvisioningTask};
use hostflow_cloud::{
    CachedProvider, CallContext, CatalogKind, CloudError, CreatedServer, RetryConfig,
    ServerObservation, retry,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Delay between readiness polls
    #[serde(with = "secs")]
    pub poll_interval: Duration,

    #[serde(with = "secs")]
    pub ready_timeout: Duration,

    #[serde(with = "secs")]
    pub delete_timeout: Duration,

    #[serde(with = "secs")]
    pub resize_timeout: Duration,

    /// Deadline of a single provider call
    #[serde(with = "secs")]
    pub call_timeout: Duration,

    /// Requeue delay for tasks waiting on another task of the same resource
    #[serde(with = "secs")]
    pub defer_delay: Duration,

    /// Check size, location and image against the provider catalog
    pub validate_catalog: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(10 * 60),
            delete_timeout: Duration::from_secs(4 * 60),
            resize_timeout: Duration::from_secs(8 * 60),
            call_timeout: Duration::from_secs(30),
            defer_delay: Duration::from_secs(15),
            validate_catalog: true,
        }
    }
}

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The resource reached this rest status
    Completed(ResourceStatus),
    /// Redelivery of a task that already took effect
    Duplicate,
    /// Another task owns the resource; try again later
    Deferred(Duration),
    /// The task cannot apply to the resource
    Rejected(String),
}

pub struct Orchestrator {
    store: Arc<dyn ResourceStore>,
    provider: Arc<CachedProvider>,
    audit: Arc<dyn AuditSink>,
    retry: RetryConfig,
    poller: Poller,
    config: OrchestratorConfig,
    /// Resources with a task running in this process
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a resource busy until dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    resource_id: String,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, resource_id: &str) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !ids.insert(resource_id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            resource_id: resource_id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut ids = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.remove(&self.resource_id);
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        provider: Arc<CachedProvider>,
        audit: Arc<dyn AuditSink>,
        retry: RetryConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            provider,
            audit,
            retry,
            poller: Poller::new(config.poll_interval, config.call_timeout),
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Process one task
    pub async fn handle(
        &self,
        task: &ProvisioningTask,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let Some(_busy) = InFlight::acquire(&self.in_flight, &task.resource_id) else {
            tracing::debug!(
                task_id = %task.task_id,
                resource_id = %task.resource_id,
                "Resource busy, deferring task"
            );
            return Ok(Outcome::Deferred(self.config.defer_delay));
        };

        let resource = match self.store.get(&task.resource_id).await {
            Ok(resource) => resource,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(
                    task_id = %task.task_id,
                    resource_id = %task.resource_id,
                    "Task refers to an unknown resource"
                );
                return Ok(Outcome::Rejected("resource does not exist".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            task_id = %task.task_id,
            resource_id = %resource.id,
            operation = %task.operation,
            status = %resource.status,
            delivery = task.deliveries,
            "Processing task"
        );

        match task.operation {
            Operation::Create => self.create(task, resource, cancel).await,
            Operation::Delete => self.delete(task, resource, cancel).await,
            Operation::Resize => self.resize(task, resource, cancel).await,
        }
    }

    async fn create(
        &self,
        task: &ProvisioningTask,
        resource: ManagedResource,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let mut resource = match resource.status {
            ResourceStatus::Queued => match self
                .claim(task, &resource, ResourceStatus::Provisioning)
                .await?
            {
                Some(claimed) => claimed,
                None => return Ok(Outcome::Duplicate),
            },
            ResourceStatus::Provisioning => self.resume(task, &resource).await?,
            _ => {
                tracing::info!(
                    task_id = %task.task_id,
                    resource_id = %resource.id,
                    status = %resource.status,
                    "Create already took effect"
                );
                return Ok(Outcome::Duplicate);
            }
        };

        let provider_resource_id = match resource.provider_resource_id.clone() {
            Some(id) => id,
            None => match self.obtain_server(task, &resource, cancel).await {
                Ok(created) => {
                    resource = self
                        .persist(
                            &resource,
                            ResourceUpdate::default().with_provider_id(
                                created.provider_resource_id.clone(),
                                created.public_address.clone(),
                            ),
                        )
                        .await?;
                    created.provider_resource_id
                }
                Err(failure) => return self.settle(task, resource, failure, cancel).await,
            },
        };

        let wait = self
            .poller
            .wait(
                self.provider.inner().as_ref(),
                &provider_resource_id,
                WaitFor::Running,
                self.config.ready_timeout,
                cancel,
            )
            .await;

        match wait {
            Ok(PollOutcome::Reached(observation)) => {
                let mut update = ResourceUpdate::status(ResourceStatus::Ready).clear_error();
                update.public_address = observation.and_then(|o| o.public_address);
                let ready = self.persist(&resource, update).await?;
                self.record(
                    AuditEvent::new(&ready, "server is ready")
                        .for_task(task)
                        .transition(ResourceStatus::Provisioning, ResourceStatus::Ready),
                );
                Ok(Outcome::Completed(ResourceStatus::Ready))
            }
            Ok(PollOutcome::TimedOut { last }) => {
                let failure = ProvisionError::Timeout(format!(
                    "server {} did not become ready within {}s (last status: {})",
                    provider_resource_id,
                    self.config.ready_timeout.as_secs(),
                    last.map(|o| o.status.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                ));
                self.settle(task, resource, failure, cancel).await
            }
            Err(e) => self.settle(task, resource, e.into(), cancel).await,
        }
    }

    /// Adopt a labelled server or create a new one
    async fn obtain_server(
        &self,
        task: &ProvisioningTask,
        resource: &ManagedResource,
        cancel: &CancellationToken,
    ) -> Result<CreatedServer> {
        if let Some(existing) = self.find_labelled(resource, cancel).await? {
            return Ok(self.adopt(task, resource, existing));
        }

        self.validate_spec(resource, cancel).await?;

        let provider = self.provider.inner();
        let spec = resource.provider_spec();
        let resource_id = resource.id.as_str();
        let created = self
            .call("create", cancel, |ctx| {
                let spec = &spec;
                async move { provider.create(resource_id, spec, &ctx).await }
            })
            .await;

        match created {
            Ok(created) => {
                tracing::info!(
                    task_id = %task.task_id,
                    resource_id = %resource.id,
                    provider_resource_id = %created.provider_resource_id,
                    "Server created"
                );
                Ok(created)
            }
            Err(CloudError::ResourceAlreadyExists(message)) => {
                // Our name is taken: the server exists but was not persisted
                match self.find_labelled(resource, cancel).await? {
                    Some(existing) => Ok(self.adopt(task, resource, existing)),
                    None => Err(CloudError::ResourceAlreadyExists(message).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_labelled(
        &self,
        resource: &ManagedResource,
        cancel: &CancellationToken,
    ) -> Result<Option<ServerObservation>> {
        let provider = self.provider.inner();
        let resource_id = resource.id.as_str();
        Ok(self
            .call("find_by_resource", cancel, |ctx| async move {
                provider.find_by_resource(resource_id, &ctx).await
            })
            .await?)
    }

    fn adopt(
        &self,
        task: &ProvisioningTask,
        resource: &ManagedResource,
        existing: ServerObservation,
    ) -> CreatedServer {
        tracing::warn!(
            task_id = %task.task_id,
            resource_id = %resource.id,
            provider_resource_id = %existing.provider_resource_id,
            "Adopting server created by an earlier attempt"
        );
        self.record(
            AuditEvent::new(
                resource,
                format!("adopted existing server {}", existing.provider_resource_id),
            )
            .for_task(task),
        );
        CreatedServer {
            provider_resource_id: existing.provider_resource_id,
            public_address: existing.public_address,
        }
    }

    /// Reject specs the provider catalog does not offer
    async fn validate_spec(
        &self,
        resource: &ManagedResource,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.config.validate_catalog {
            return Ok(());
        }

        let checks = [
            (CatalogKind::Size, resource.size.as_str()),
            (CatalogKind::Location, resource.spec.location.as_str()),
            (CatalogKind::Image, resource.spec.image.as_str()),
        ];
        for (kind, wanted) in checks {
            self.check_catalog(kind, wanted, cancel).await?;
        }
        Ok(())
    }

    async fn check_catalog(
        &self,
        kind: CatalogKind,
        wanted: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ctx = CallContext::with_timeout(self.config.call_timeout)
            .with_cancel(cancel.child_token());
        match self.provider.list_catalog(kind, &ctx).await {
            Ok(options) if options.is_empty() => Ok(()),
            Ok(options) => {
                if options.iter().any(|o| o.name == wanted || o.id == wanted) {
                    Ok(())
                } else {
                    Err(ProvisionError::InvalidRequest(format!(
                        "{} '{}' is not offered by the provider",
                        kind, wanted
                    )))
                }
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(kind = %kind, error = %e, "Catalog unavailable, skipping validation");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(
        &self,
        task: &ProvisioningTask,
        resource: ManagedResource,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let mut resource = match resource.status {
            ResourceStatus::Ready | ResourceStatus::Failed => {
                match self.claim(task, &resource, ResourceStatus::Deleting).await? {
                    Some(claimed) => claimed,
                    None => return Ok(Outcome::Duplicate),
                }
            }
            ResourceStatus::Deleting => self.resume(task, &resource).await?,
            ResourceStatus::Deleted => return Ok(Outcome::Duplicate),
            ResourceStatus::Queued | ResourceStatus::Provisioning | ResourceStatus::Resizing => {
                tracing::info!(
                    task_id = %task.task_id,
                    resource_id = %resource.id,
                    status = %resource.status,
                    "Delete waits for the running task"
                );
                return Ok(Outcome::Deferred(self.config.defer_delay));
            }
        };

        let provider_resource_id = match resource.provider_resource_id.clone() {
            Some(id) => Some(id),
            None => match self.find_labelled(&resource, cancel).await {
                Ok(found) => found.map(|o| o.provider_resource_id),
                Err(failure) => return self.settle(task, resource, failure, cancel).await,
            },
        };

        if let Some(provider_resource_id) = provider_resource_id {
            let provider = self.provider.inner();
            let id = provider_resource_id.as_str();
            let deleted = self
                .call("delete", cancel, |ctx| async move {
                    provider.delete(id, &ctx).await
                })
                .await;

            match deleted {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::info!(
                        resource_id = %resource.id,
                        provider_resource_id = id,
                        "Server already gone"
                    );
                }
                Err(e) => return self.settle(task, resource, e.into(), cancel).await,
            }
            self.provider.invalidate_status(id).await;

            let wait = self
                .poller
                .wait(
                    provider.as_ref(),
                    id,
                    WaitFor::Gone,
                    self.config.delete_timeout,
                    cancel,
                )
                .await;
            match wait {
                Ok(PollOutcome::Reached(_)) => {}
                Ok(PollOutcome::TimedOut { .. }) => {
                    let failure = ProvisionError::Timeout(format!(
                        "server {} still exists after {}s",
                        id,
                        self.config.delete_timeout.as_secs()
                    ));
                    return self.settle(task, resource, failure, cancel).await;
                }
                Err(e) => return self.settle(task, resource, e.into(), cancel).await,
            }
        }

        resource = self
            .persist(
                &resource,
                ResourceUpdate::status(ResourceStatus::Deleted).clear_error(),
            )
            .await?;
        self.record(
            AuditEvent::new(&resource, "server deleted")
                .for_task(task)
                .transition(ResourceStatus::Deleting, ResourceStatus::Deleted),
        );
        Ok(Outcome::Completed(ResourceStatus::Deleted))
    }

    async fn resize(
        &self,
        task: &ProvisioningTask,
        resource: ManagedResource,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let Some(target) = task.payload.target_size.clone() else {
            return Ok(Outcome::Rejected("resize task without target size".to_string()));
        };

        let resource = match resource.status {
            ResourceStatus::Ready => {
                match self.claim(task, &resource, ResourceStatus::Resizing).await? {
                    Some(claimed) => claimed,
                    None => return Ok(Outcome::Duplicate),
                }
            }
            ResourceStatus::Resizing => self.resume(task, &resource).await?,
            ResourceStatus::Queued | ResourceStatus::Provisioning | ResourceStatus::Deleting => {
                return Ok(Outcome::Deferred(self.config.defer_delay));
            }
            ResourceStatus::Deleted | ResourceStatus::Failed => {
                let message = format!("resize to {} rejected: resource is {}", target, resource.status);
                self.record(AuditEvent::new(&resource, message.clone()).for_task(task));
                return Ok(Outcome::Rejected(message));
            }
        };

        let Some(provider_resource_id) = resource.provider_resource_id.clone() else {
            let failure =
                ProvisionError::InvalidRequest("resource has no provider server".to_string());
            return self.settle(task, resource, failure, cancel).await;
        };

        let started = tokio::time::Instant::now();
        let provider = self.provider.inner();
        let id = provider_resource_id.as_str();
        let current = match self
            .call("get", cancel, |ctx| async move { provider.get(id, &ctx).await })
            .await
        {
            Ok(current) => current,
            Err(e) => return self.settle(task, resource, e.into(), cancel).await,
        };

        if current.size == target {
            tracing::info!(
                resource_id = %resource.id,
                size = %target,
                "Server already has the target size"
            );
        } else {
            if let Err(failure) = self.check_catalog(CatalogKind::Size, &target, cancel).await {
                return self.settle(task, resource, failure, cancel).await;
            }

            // power cycle plus type change can outlast call_timeout, the whole
            // resize shares resize_timeout instead
            let size = target.as_str();
            let resized = self
                .call_within(
                    "resize",
                    cancel,
                    self.config.resize_timeout,
                    self.config.resize_timeout.saturating_sub(started.elapsed()),
                    |ctx| async move { provider.resize(id, size, &ctx).await },
                )
                .await;
            if let Err(e) = resized {
                return self.settle(task, resource, e.into(), cancel).await;
            }
        }
        self.provider.invalidate_status(id).await;

        let wait = self
            .poller
            .wait(
                provider.as_ref(),
                id,
                WaitFor::RunningAtSize(&target),
                self.config.resize_timeout.saturating_sub(started.elapsed()),
                cancel,
            )
            .await;

        match wait {
            Ok(PollOutcome::Reached(_)) => {
                let ready = self
                    .persist(
                        &resource,
                        ResourceUpdate::status(ResourceStatus::Ready)
                            .with_size(target.clone())
                            .clear_error(),
                    )
                    .await?;
                self.record(
                    AuditEvent::new(&ready, format!("resized to {}", target))
                        .for_task(task)
                        .transition(ResourceStatus::Resizing, ResourceStatus::Ready),
                );
                Ok(Outcome::Completed(ResourceStatus::Ready))
            }
            Ok(PollOutcome::TimedOut { .. }) => {
                let failure = ProvisionError::Timeout(format!(
                    "server {} did not come back at size {} within {}s",
                    id,
                    target,
                    self.config.resize_timeout.as_secs()
                ));
                self.settle(task, resource, failure, cancel).await
            }
            Err(e) => self.settle(task, resource, e.into(), cancel).await,
        }
    }

    /// Move a resource to `failed` after its task was abandoned
    ///
    /// Used when a task exceeds its budget, panics or is dead-lettered.
    /// Rest states other than `queued` are left alone.
    pub async fn fail_resource(
        &self,
        task: &ProvisioningTask,
        reason: &str,
    ) -> Result<Option<ManagedResource>> {
        let mut resource = match self.store.get(&task.resource_id).await {
            Ok(resource) => resource,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        for _ in 0..3 {
            let from = resource.status;
            let applicable = from.is_transient()
                || (from == ResourceStatus::Queued && task.operation == Operation::Create);
            if !applicable {
                self.record(
                    AuditEvent::new(&resource, format!("{} task abandoned: {}", task.operation, reason))
                        .for_task(task),
                );
                return Ok(None);
            }

            let update = ResourceUpdate::status(ResourceStatus::Failed).with_error(reason);
            match self.store.update(&resource.id, resource.version, update).await {
                Ok(failed) => {
                    tracing::error!(
                        task_id = %task.task_id,
                        resource_id = %failed.id,
                        reason,
                        "Resource failed"
                    );
                    self.record(
                        AuditEvent::new(&failed, reason)
                            .for_task(task)
                            .transition(from, ResourceStatus::Failed),
                    );
                    return Ok(Some(failed));
                }
                Err(e) if e.is_version_conflict() => {
                    resource = self.store.get(&task.resource_id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ProvisionError::Store(StoreError::VersionConflict {
            id: resource.id.clone(),
            expected: resource.version,
            actual: resource.version,
        }))
    }

    /// Take ownership of a resource in a rest status
    ///
    /// `None` means another delivery won the race.
    async fn claim(
        &self,
        task: &ProvisioningTask,
        resource: &ManagedResource,
        to: ResourceStatus,
    ) -> Result<Option<ManagedResource>> {
        let update = ResourceUpdate::status(to).clear_error().with_attempts(1);
        match self.store.update(&resource.id, resource.version, update).await {
            Ok(claimed) => {
                self.record(
                    AuditEvent::new(&claimed, format!("{} started", task.operation))
                        .for_task(task)
                        .transition(resource.status, to),
                );
                Ok(Some(claimed))
            }
            Err(e) if e.is_version_conflict() => {
                tracing::info!(
                    task_id = %task.task_id,
                    resource_id = %resource.id,
                    "Lost claim race, treating delivery as duplicate"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Continue after a crashed or expired earlier attempt
    async fn resume(
        &self,
        task: &ProvisioningTask,
        resource: &ManagedResource,
    ) -> Result<ManagedResource> {
        tracing::info!(
            task_id = %task.task_id,
            resource_id = %resource.id,
            status = %resource.status,
            attempts = resource.attempts,
            "Resuming interrupted task"
        );
        self.persist(
            resource,
            ResourceUpdate::default().with_attempts(resource.attempts + 1),
        )
        .await
    }

    /// Version-checked write that tolerates concurrent non-status writes
    async fn persist(
        &self,
        resource: &ManagedResource,
        update: ResourceUpdate,
    ) -> Result<ManagedResource> {
        match self
            .store
            .update(&resource.id, resource.version, update.clone())
            .await
        {
            Err(e) if e.is_version_conflict() => {
                let fresh = self.store.get(&resource.id).await?;
                if fresh.status != resource.status {
                    return Err(e.into());
                }
                Ok(self.store.update(&fresh.id, fresh.version, update).await?)
            }
            other => Ok(other?),
        }
    }

    /// Turn a step failure into an outcome
    ///
    /// Cancellation leaves the resource untouched so the task can resume.
    /// Store failures propagate. Everything else fails the resource.
    async fn settle(
        &self,
        task: &ProvisioningTask,
        resource: ManagedResource,
        failure: ProvisionError,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        if let ProvisionError::Store(_) = failure {
            return Err(failure);
        }

        let message = failure.to_string();
        let failed = self
            .persist(
                &resource,
                ResourceUpdate::status(ResourceStatus::Failed).with_error(message.clone()),
            )
            .await?;

        tracing::error!(
            task_id = %task.task_id,
            resource_id = %failed.id,
            operation = %task.operation,
            error = %message,
            "Task failed"
        );
        self.record(
            AuditEvent::new(&failed, message)
                .for_task(task)
                .transition(resource.status, ResourceStatus::Failed),
        );
        Ok(Outcome::Completed(ResourceStatus::Failed))
    }

    /// Provider call through the retry controller
    async fn call<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> std::result::Result<T, CloudError>
    where
        F: Fn(CallContext) -> Fut,
        Fut: Future<Output = hostflow_cloud::Result<T>>,
    {
        let budget = self.config.call_timeout * self.retry.max_attempts.max(1)
            + self.retry.max_total_delay();
        self.call_within(operation, cancel, self.config.call_timeout, budget, call)
            .await
    }

    /// Provider call with its own per-attempt timeout and overall budget
    async fn call_within<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        attempt_timeout: Duration,
        budget: Duration,
        call: F,
    ) -> std::result::Result<T, CloudError>
    where
        F: Fn(CallContext) -> Fut,
        Fut: Future<Output = hostflow_cloud::Result<T>>,
    {
        let ctx = CallContext::with_timeout(budget).with_cancel(cancel.child_token());
        retry(&self.retry, operation, &ctx, || call(ctx.child(attempt_timeout))).await
    }

    fn record(&self, event: AuditEvent) {
        self.audit.record(event);
    }
}
