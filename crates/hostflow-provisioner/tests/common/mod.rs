#![allow(dead_code)]

use hostflow_cloud::{CacheConfig, CachedProvider, RetryConfig, ServerSpec};
use hostflow_provisioner::testing::MockProvider;
use hostflow_provisioner::{
    ManagedResource, MemoryAuditSink, MemoryStore, MemoryTaskQueue, NewResource, Operation,
    Orchestrator, OrchestratorConfig, OutboxRelay, ProvisioningService, ProvisioningTask,
    QueueConfig, ResourceStatus, ResourceStore, ResourceUpdate,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const TENANT: &str = "tenant-1";

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

pub fn fast_orchestrator() -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval: Duration::from_millis(10),
        ready_timeout: Duration::from_secs(2),
        delete_timeout: Duration::from_secs(2),
        resize_timeout: Duration::from_secs(2),
        call_timeout: Duration::from_secs(1),
        defer_delay: Duration::from_millis(20),
        validate_catalog: true,
    }
}

pub fn fast_queue() -> QueueConfig {
    QueueConfig {
        visibility_timeout: Duration::from_secs(30),
        retry_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_millis(50),
        ..QueueConfig::default()
    }
}

pub fn spec(name: &str) -> ServerSpec {
    ServerSpec::new(name, "cx22", "fsn1", "ubuntu-24.04")
}

pub struct Harness {
    pub provider: Arc<MockProvider>,
    pub cached: Arc<CachedProvider>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryTaskQueue>,
    pub audit: Arc<MemoryAuditSink>,
    pub relay: Arc<OutboxRelay>,
    pub orchestrator: Arc<Orchestrator>,
    pub service: ProvisioningService,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_orchestrator(), fast_queue())
    }

    pub fn with_config(orchestrator: OrchestratorConfig, queue: QueueConfig) -> Self {
        let provider = Arc::new(MockProvider::new());
        let cached = Arc::new(CachedProvider::new(provider.clone(), &CacheConfig::default()));
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryTaskQueue::new(queue));
        let audit = Arc::new(MemoryAuditSink::new());
        let relay = Arc::new(OutboxRelay::new(
            store.clone(),
            queue.clone(),
            Duration::from_millis(20),
        ));
        let call_timeout = orchestrator.call_timeout;
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            cached.clone(),
            audit.clone(),
            fast_retry(),
            orchestrator,
        ));
        let service =
            ProvisioningService::new(store.clone(), cached.clone(), audit.clone(), call_timeout);

        Self {
            provider,
            cached,
            store,
            queue,
            audit,
            relay,
            orchestrator,
            service,
            cancel: CancellationToken::new(),
        }
    }

    /// Service that hands tasks to the queue immediately
    pub fn dispatching_service(&self) -> ProvisioningService {
        ProvisioningService::new(
            self.store.clone(),
            self.cached.clone(),
            self.audit.clone(),
            self.orchestrator.config().call_timeout,
        )
        .with_relay(self.relay.clone())
    }

    pub async fn request(&self, name: &str) -> ManagedResource {
        self.service
            .enqueue_provisioning(NewResource::new(TENANT, "user-1", spec(name)))
            .await
            .unwrap()
    }

    /// Oldest undispatched task of `operation` for a resource
    pub async fn pending_task(&self, resource_id: &str, operation: Operation) -> ProvisioningTask {
        self.store
            .outbox_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.task)
            .find(|task| task.resource_id == resource_id && task.operation == operation)
            .unwrap()
    }

    /// Request a server and run its create task to completion
    pub async fn provision(&self, name: &str) -> ManagedResource {
        let resource = self.request(name).await;
        let task = self.pending_task(&resource.id, Operation::Create).await;
        self.orchestrator.handle(&task, &self.cancel).await.unwrap();
        self.store.outbox_complete(&task.task_id).await.unwrap();
        let resource = self.get(&resource.id).await;
        assert_eq!(resource.status, ResourceStatus::Ready);
        resource
    }

    pub async fn get(&self, id: &str) -> ManagedResource {
        self.store.get(id).await.unwrap()
    }

    /// Force a status change the way an earlier attempt would have left it
    pub async fn set_status(&self, id: &str, status: ResourceStatus) -> ManagedResource {
        let current = self.get(id).await;
        self.store
            .update(id, current.version, ResourceUpdate::status(status))
            .await
            .unwrap()
    }

    /// Every recorded transition of a resource, in order
    pub fn transitions(&self, id: &str) -> Vec<(ResourceStatus, ResourceStatus)> {
        self.audit
            .for_resource(id)
            .into_iter()
            .filter_map(|e| Some((e.from?, e.to?)))
            .collect()
    }
}

/// Poll the store until a resource reaches `status`
pub async fn wait_for_status(
    store: &dyn ResourceStore,
    id: &str,
    status: ResourceStatus,
    timeout: Duration,
) -> ManagedResource {
    let waited = tokio::time::timeout(timeout, async {
        loop {
            let resource = store.get(id).await.unwrap();
            if resource.status == status {
                return resource;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    match waited {
        Ok(resource) => resource,
        Err(_) => {
            let resource = store.get(id).await.unwrap();
            panic!(
                "resource {} is {} (last error: {:?}), expected {}",
                id, resource.status, resource.last_error, status
            );
        }
    }
}
