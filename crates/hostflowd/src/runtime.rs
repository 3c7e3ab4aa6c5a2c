//! Component wiring shared by every command

use crate::config::DaemonConfig;
use anyhow::{Context, bail};
use hostflow_cloud::{CachedProvider, ProviderClient, ProviderKind};
use hostflow_cloud_hetzner::HetznerProvider;
use hostflow_provisioner::{
    AuditSink, FileStore, MemoryStore, MemoryTaskQueue, Orchestrator, OutboxRelay,
    ProvisionError, ProvisioningService, Reconciler, ResourceStore, TaskQueue, TracingAuditSink,
    WorkerPool,
};
use std::sync::Arc;
use std::time::Duration;

const DRAIN_POLL: Duration = Duration::from_millis(500);

pub struct Runtime {
    pub config: DaemonConfig,
    pub store: Arc<dyn ResourceStore>,
    pub provider: Arc<dyn ProviderClient>,
    pub queue: Arc<MemoryTaskQueue>,
    pub relay: Arc<OutboxRelay>,
    pub orchestrator: Arc<Orchestrator>,
    pub service: ProvisioningService,
    audit: Arc<dyn AuditSink>,
}

impl Runtime {
    pub async fn build(config: DaemonConfig) -> anyhow::Result<Self> {
        let settings = &config.provisioner;

        let store: Arc<dyn ResourceStore> = match &settings.state_dir {
            Some(dir) => Arc::new(
                FileStore::open(dir)
                    .await
                    .with_context(|| format!("Failed to open state in {}", dir.display()))?,
            ),
            None => {
                tracing::warn!("No state_dir configured, state is kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        let provider: Arc<dyn ProviderClient> = match config.provider.kind {
            ProviderKind::Hetzner => {
                Arc::new(HetznerProvider::new(config.provider.hetzner_config()?)?)
            }
        };
        let cached = Arc::new(CachedProvider::new(
            Arc::clone(&provider),
            &settings.cache.to_cache_config(),
        ));

        let queue = Arc::new(MemoryTaskQueue::new(settings.queue.clone()));
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        let relay = Arc::new(OutboxRelay::new(
            Arc::clone(&store),
            queue.clone(),
            settings.outbox.interval,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&cached),
            Arc::clone(&audit),
            settings.retry.to_retry_config(),
            settings.orchestrator.clone(),
        ));
        let service = ProvisioningService::new(
            Arc::clone(&store),
            cached,
            Arc::clone(&audit),
            settings.orchestrator.call_timeout,
        )
        .with_relay(Arc::clone(&relay));

        Ok(Self {
            config,
            store,
            provider,
            queue,
            relay,
            orchestrator,
            service,
            audit,
        })
    }

    pub fn start_workers(&self) -> WorkerPool {
        WorkerPool::start(
            self.config.provisioner.worker.clone(),
            self.queue.clone(),
            Arc::clone(&self.orchestrator),
        )
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            Arc::clone(&self.audit),
            self.config.provisioner.retry.to_retry_config(),
            self.config.provisioner.orchestrator.call_timeout,
        )
    }

    /// Run workers in this process until every recorded task has finished
    ///
    /// Tasks left unfinished by earlier invocations are picked up as well.
    pub async fn drain(&self) -> anyhow::Result<()> {
        let timeout = self.config.provisioner.worker.longest_budget();
        self.relay.recover().await?;
        let pool = self.start_workers();

        let drained = tokio::time::timeout(timeout, async {
            loop {
                self.relay.dispatch_pending().await?;
                let stats = self.queue.stats().await?;
                if stats.queued() == 0 && stats.in_flight == 0 {
                    return Ok::<(), ProvisionError>(());
                }
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await;

        pool.shutdown().await;

        match drained {
            Ok(result) => Ok(result?),
            Err(_) => bail!("Tasks did not finish within {:?}", timeout),
        }
    }
}
