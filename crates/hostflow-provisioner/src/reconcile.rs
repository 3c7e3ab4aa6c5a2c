//! Reconciliation sweep
//!
//! Compares the servers the provider holds under our labels with the local
//! records. Servers lost between create and persist are adopted; everything
//! else that disagrees is reported. Nothing is ever deleted here.

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{Result, StoreError};
use crate::resource::{ManagedResource, ResourceStatus, ResourceUpdate};
use crate::store::ResourceStore;
use hostflow_cloud::{CallContext, ProviderClient, RetryConfig, ServerObservation, retry};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one sweep found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Labelled servers seen at the provider
    pub checked: usize,
    /// Resource ids whose server was adopted
    pub adopted: Vec<String>,
    /// Provider ids of labelled servers without a live local record
    pub orphans: Vec<String>,
    /// Resource ids that are `ready` locally but gone at the provider
    pub drifted: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.adopted.is_empty() && self.orphans.is_empty() && self.drifted.is_empty()
    }
}

pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    provider: Arc<dyn ProviderClient>,
    audit: Arc<dyn AuditSink>,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        provider: Arc<dyn ProviderClient>,
        audit: Arc<dyn AuditSink>,
        retry: RetryConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            audit,
            retry,
            call_timeout,
        }
    }

    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<ReconcileReport> {
        let ctx = CallContext::with_timeout(self.call_timeout).with_cancel(cancel.child_token());
        let servers = retry(&self.retry, "list_managed", &ctx, || {
            self.provider.list_managed(&ctx)
        })
        .await?;

        let resources: HashMap<String, ManagedResource> = self
            .store
            .list(None)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut report = ReconcileReport {
            checked: servers.len(),
            ..Default::default()
        };
        let seen: HashSet<&str> = servers
            .iter()
            .map(|s| s.provider_resource_id.as_str())
            .collect();

        for server in &servers {
            self.check_server(server, &resources, &mut report).await?;
        }

        for resource in resources.values() {
            if resource.status != ResourceStatus::Ready {
                continue;
            }
            let Some(provider_resource_id) = resource.provider_resource_id.as_deref() else {
                continue;
            };
            if seen.contains(provider_resource_id) {
                continue;
            }
            if self.confirm_missing(provider_resource_id, cancel).await {
                tracing::warn!(
                    resource_id = %resource.id,
                    provider_resource_id,
                    "Ready resource has no server at the provider"
                );
                self.audit.record(AuditEvent::new(
                    resource,
                    format!("drift: server {} no longer exists", provider_resource_id),
                ));
                report.drifted.push(resource.id.clone());
            }
        }

        report.adopted.sort();
        report.orphans.sort();
        report.drifted.sort();
        tracing::info!(
            checked = report.checked,
            adopted = report.adopted.len(),
            orphans = report.orphans.len(),
            drifted = report.drifted.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn check_server(
        &self,
        server: &ServerObservation,
        resources: &HashMap<String, ManagedResource>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let resource = server
            .resource_id
            .as_deref()
            .and_then(|id| resources.get(id));

        let Some(resource) = resource else {
            self.report_orphan(server, "no local resource", report);
            return Ok(());
        };

        match (&resource.provider_resource_id, resource.status) {
            (_, ResourceStatus::Deleted) => {
                let reason = format!("resource {} is deleted", resource.id);
                self.report_orphan(server, &reason, report);
                Ok(())
            }
            (Some(known), _) if *known == server.provider_resource_id => Ok(()),
            (Some(known), _) => {
                let reason = format!("resource {} already uses server {}", resource.id, known);
                self.report_orphan(server, &reason, report);
                Ok(())
            }
            (None, ResourceStatus::Provisioning) => self.adopt(resource, server, report).await,
            (None, ResourceStatus::Failed) => {
                let reason = format!("resource {} failed before recording a server", resource.id);
                self.report_orphan(server, &reason, report);
                Ok(())
            }
            // queued or deleting: the running task finds the server itself
            (None, _) => Ok(()),
        }
    }

    async fn adopt(
        &self,
        resource: &ManagedResource,
        server: &ServerObservation,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let update = ResourceUpdate::default().with_provider_id(
            server.provider_resource_id.clone(),
            server.public_address.clone(),
        );
        match self.store.update(&resource.id, resource.version, update).await {
            Ok(adopted) => {
                tracing::info!(
                    resource_id = %adopted.id,
                    provider_resource_id = %server.provider_resource_id,
                    "Adopted unrecorded server"
                );
                self.audit.record(AuditEvent::new(
                    &adopted,
                    format!("reconcile adopted server {}", server.provider_resource_id),
                ));
                report.adopted.push(adopted.id);
                Ok(())
            }
            // The running task got there first
            Err(StoreError::VersionConflict { .. }) | Err(StoreError::ImmutableField { .. }) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn report_orphan(&self, server: &ServerObservation, reason: &str, report: &mut ReconcileReport) {
        tracing::warn!(
            provider_resource_id = %server.provider_resource_id,
            name = %server.name,
            reason,
            "Orphaned server"
        );
        let resource_id = server.resource_id.clone().unwrap_or_default();
        self.audit.record(AuditEvent::unowned(
            resource_id,
            format!(
                "orphan: server {} ({}): {}",
                server.provider_resource_id, server.name, reason
            ),
        ));
        report.orphans.push(server.provider_resource_id.clone());
    }

    /// A direct lookup must say "not found" before drift is reported
    async fn confirm_missing(&self, provider_resource_id: &str, cancel: &CancellationToken) -> bool {
        let ctx = CallContext::with_timeout(self.call_timeout).with_cancel(cancel.child_token());
        match self.provider.get(provider_resource_id, &ctx).await {
            Err(e) => e.is_not_found(),
            Ok(_) => false,
        }
    }

    /// Sweep on an interval until cancelled
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(&cancel).await {
                        tracing::warn!(error = %e, "Reconciliation failed");
                    }
                }
            }
        }
    }
}
