//! Managed resource record and its status graph

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use hostflow_cloud::{ProviderKind, ServerSpec};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of infrastructure unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Server,
}

/// Status of a managed resource
///
/// ```text
/// queued ──▶ provisioning ──▶ ready ──▶ deleting ──▶ deleted
///   │             │           │  ▲          │
///   │             │           ▼  │          │
///   │             │         resizing        │
///   ▼             ▼           │             ▼
///  failed ◀───────┴───────────┴──────────failed
/// ```
///
/// `failed` may go back to `queued` (operator retry) or on to `deleting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Queued,
    Provisioning,
    Ready,
    Resizing,
    Deleting,
    Deleted,
    Failed,
}

impl ResourceStatus {
    pub const ALL: [ResourceStatus; 7] = [
        ResourceStatus::Queued,
        ResourceStatus::Provisioning,
        ResourceStatus::Ready,
        ResourceStatus::Resizing,
        ResourceStatus::Deleting,
        ResourceStatus::Deleted,
        ResourceStatus::Failed,
    ];

    /// Whether `next` is an edge of the status graph
    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (Queued, Provisioning)
                | (Queued, Failed)
                | (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Ready, Deleting)
                | (Ready, Resizing)
                | (Resizing, Ready)
                | (Resizing, Failed)
                | (Deleting, Deleted)
                | (Deleting, Failed)
                | (Failed, Queued)
                | (Failed, Deleting)
        )
    }

    /// Statuses that must make progress or time out
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ResourceStatus::Provisioning | ResourceStatus::Resizing | ResourceStatus::Deleting
        )
    }

    pub fn is_rest(self) -> bool {
        !self.is_transient()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Queued => "queued",
            ResourceStatus::Provisioning => "provisioning",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Resizing => "resizing",
            ResourceStatus::Deleting => "deleting",
            ResourceStatus::Deleted => "deleted",
            ResourceStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status: {}", s))
    }
}

/// One provisioned infrastructure unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub id: String,
    pub tenant_id: String,
    pub owner_id: String,
    pub provider: ProviderKind,
    pub kind: ResourceKind,
    pub status: ResourceStatus,

    /// External ID, set once the provider accepted the create call
    pub provider_resource_id: Option<String>,

    pub public_address: Option<String>,

    /// Requested configuration, never changed after creation
    pub spec: ServerSpec,

    /// Effective size; differs from `spec.size` after a resize
    pub size: String,

    pub last_error: Option<String>,

    /// Orchestration attempts for the current task
    pub attempts: u32,

    /// Incremented on every write
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedResource {
    /// Server name used at the provider, unique per resource
    ///
    /// A second create for the same resource collides on this name instead
    /// of producing a duplicate server.
    pub fn server_name(&self) -> String {
        let suffix: String = self.id.chars().filter(|c| *c != '-').take(8).collect();
        format!("{}-{}", self.spec.name, suffix)
    }

    /// Spec sent to the provider for this resource
    pub fn provider_spec(&self) -> ServerSpec {
        let mut spec = self.spec.clone();
        spec.name = self.server_name();
        spec
    }

    /// Apply `update`, validating the status graph and write-once fields
    pub fn apply(&mut self, update: &ResourceUpdate) -> Result<(), StoreError> {
        if let Some(next) = update.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    id: self.id.clone(),
                    from: self.status,
                    to: next,
                });
            }
        }

        if let (Some(existing), Some(new)) =
            (&self.provider_resource_id, &update.provider_resource_id)
        {
            if existing != new {
                return Err(StoreError::ImmutableField {
                    id: self.id.clone(),
                    field: "provider_resource_id",
                });
            }
        }

        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(id) = &update.provider_resource_id {
            self.provider_resource_id = Some(id.clone());
        }
        if let Some(address) = &update.public_address {
            self.public_address = Some(address.clone());
        }
        if let Some(size) = &update.size {
            self.size = size.clone();
        }
        if let Some(last_error) = &update.last_error {
            self.last_error = last_error.clone();
        }
        if let Some(attempts) = update.attempts {
            self.attempts = attempts;
        }

        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Input for a new resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResource {
    pub tenant_id: String,
    pub owner_id: String,
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    pub spec: ServerSpec,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Hetzner
}

impl NewResource {
    pub fn new(tenant_id: impl Into<String>, owner_id: impl Into<String>, spec: ServerSpec) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            owner_id: owner_id.into(),
            provider: ProviderKind::Hetzner,
            spec,
        }
    }

    /// Check that every required field is present
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("tenant_id", self.tenant_id.as_str()),
            ("owner_id", self.owner_id.as_str()),
            ("spec.name", self.spec.name.as_str()),
            ("spec.size", self.spec.size.as_str()),
            ("spec.location", self.spec.location.as_str()),
            ("spec.image", self.spec.image.as_str()),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(format!("{} must not be empty", field)),
            None => Ok(()),
        }
    }

    /// Build the `queued` record with a fresh id
    pub fn into_resource(self) -> ManagedResource {
        let now = Utc::now();
        ManagedResource {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: self.tenant_id,
            owner_id: self.owner_id,
            provider: self.provider,
            kind: ResourceKind::Server,
            status: ResourceStatus::Queued,
            provider_resource_id: None,
            public_address: None,
            size: self.spec.size.clone(),
            spec: self.spec,
            last_error: None,
            attempts: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a resource record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceUpdate {
    pub status: Option<ResourceStatus>,
    pub provider_resource_id: Option<String>,
    pub public_address: Option<String>,
    pub size: Option<String>,
    /// `Some(None)` clears the error
    pub last_error: Option<Option<String>>,
    pub attempts: Option<u32>,
}

impl ResourceUpdate {
    pub fn status(status: ResourceStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_provider_id(mut self, id: impl Into<String>, address: Option<String>) -> Self {
        self.provider_resource_id = Some(id.into());
        self.public_address = address;
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> ManagedResource {
        NewResource::new(
            "tenant-1",
            "user-1",
            ServerSpec::new("web-1", "cx22", "fsn1", "ubuntu-24.04"),
        )
        .into_resource()
    }

    #[test]
    fn test_graph_edges() {
        use ResourceStatus::*;
        assert!(Queued.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Resizing));
        assert!(Failed.can_transition_to(Queued));
        assert!(Failed.can_transition_to(Deleting));

        assert!(!Ready.can_transition_to(Queued));
        assert!(!Deleted.can_transition_to(Queued));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Ready));
    }

    #[test]
    fn test_deleted_is_terminal() {
        for next in ResourceStatus::ALL {
            assert!(!ResourceStatus::Deleted.can_transition_to(next));
        }
    }

    #[test]
    fn test_apply_rejects_invalid_transition() {
        let mut r = resource();
        let err = r
            .apply(&ResourceUpdate::status(ResourceStatus::Ready))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(r.status, ResourceStatus::Queued);
        assert_eq!(r.version, 0);
    }

    #[test]
    fn test_provider_id_is_write_once() {
        let mut r = resource();
        r.apply(&ResourceUpdate::default().with_provider_id("ext-1", None))
            .unwrap();

        // Same value again is not a change
        r.apply(&ResourceUpdate::default().with_provider_id("ext-1", None))
            .unwrap();

        let err = r
            .apply(&ResourceUpdate::default().with_provider_id("ext-2", None))
            .unwrap_err();
        assert!(matches!(err, StoreError::ImmutableField { .. }));
        assert_eq!(r.provider_resource_id.as_deref(), Some("ext-1"));
    }

    #[test]
    fn test_apply_bumps_version_and_clears_error() {
        let mut r = resource();
        r.apply(&ResourceUpdate::status(ResourceStatus::Failed).with_error("boom"))
            .unwrap();
        assert_eq!(r.last_error.as_deref(), Some("boom"));

        r.apply(&ResourceUpdate::status(ResourceStatus::Queued).clear_error())
            .unwrap();
        assert_eq!(r.last_error, None);
        assert_eq!(r.version, 2);
    }

    #[test]
    fn test_new_resource_validation() {
        let mut new = NewResource::new(
            "tenant-1",
            "user-1",
            ServerSpec::new("web-1", "cx22", "fsn1", "ubuntu-24.04"),
        );
        assert!(new.validate().is_ok());

        new.spec.size = " ".to_string();
        assert_eq!(new.validate().unwrap_err(), "spec.size must not be empty");
    }

    #[test]
    fn test_server_name_is_deterministic() {
        let mut r = resource();
        r.id = "3f2b9c1a-0000-4000-8000-000000000000".to_string();
        assert_eq!(r.server_name(), "web-1-3f2b9c1a");
        assert_eq!(r.provider_spec().name, "web-1-3f2b9c1a");
        assert_eq!(r.spec.name, "web-1");
    }

    #[test]
    fn test_status_round_trip_names() {
        assert_eq!("resizing".parse::<ResourceStatus>(), Ok(ResourceStatus::Resizing));
        assert!("running".parse::<ResourceStatus>().is_err());
    }
}
