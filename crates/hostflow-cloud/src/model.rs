//! Server and catalog types shared by all providers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Label marking a server as created by hostflow
pub const LABEL_MANAGED_BY: &str = "hostflow.io/managed-by";

/// Label carrying the local resource id of a server
pub const LABEL_RESOURCE_ID: &str = "hostflow.io/resource-id";

/// Value of [`LABEL_MANAGED_BY`]
pub const MANAGED_BY: &str = "hostflow";

/// Provider implementations known to hostflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Hetzner,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Hetzner => "hetzner",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hetzner" => Ok(ProviderKind::Hetzner),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Requested configuration of a server
///
/// Written once when the resource is created and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Server name at the provider
    pub name: String,

    /// Size / plan (e.g. "cx22")
    pub size: String,

    /// Location / zone (e.g. "fsn1")
    pub location: String,

    /// OS image (e.g. "ubuntu-24.04")
    pub image: String,

    /// SSH key names registered at the provider
    #[serde(default)]
    pub ssh_keys: Vec<String>,

    /// Extra labels attached to the server
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ServerSpec {
    pub fn new(
        name: impl Into<String>,
        size: impl Into<String>,
        location: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            size: size.into(),
            location: location.into(),
            image: image.into(),
            ssh_keys: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_ssh_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_keys.push(key.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Result of a successful create call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedServer {
    /// External ID assigned by the provider
    pub provider_resource_id: String,

    /// Public IPv4 address, if already assigned
    pub public_address: Option<String>,
}

/// Server status as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Off,
    Deleting,
    Migrating,
    Rebuilding,
    Unknown,
}

impl ServerStatus {
    /// Whether the server accepts workloads
    pub fn is_ready(&self) -> bool {
        matches!(self, ServerStatus::Running)
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerStatus::Initializing => "initializing",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Off => "off",
            ServerStatus::Deleting => "deleting",
            ServerStatus::Migrating => "migrating",
            ServerStatus::Rebuilding => "rebuilding",
            ServerStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A server as currently seen by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerObservation {
    pub provider_resource_id: String,
    pub name: String,
    pub status: ServerStatus,
    pub size: String,
    pub public_address: Option<String>,

    /// Value of the resource-id label, when the server was created by hostflow
    pub resource_id: Option<String>,
}

/// Catalog data classes offered by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Size,
    Location,
    Image,
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogKind::Size => write!(f, "size"),
            CatalogKind::Location => write!(f, "location"),
            CatalogKind::Image => write!(f, "image"),
        }
    }
}

impl FromStr for CatalogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "size" | "sizes" => Ok(CatalogKind::Size),
            "location" | "locations" => Ok(CatalogKind::Location),
            "image" | "images" => Ok(CatalogKind::Image),
            other => Err(format!("unknown catalog kind: {}", other)),
        }
    }
}

/// One entry of a provider catalog (a size, a location or an image)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogOption {
    /// Provider-side identifier
    pub id: String,

    /// Name used when requesting a server
    pub name: String,

    /// Human readable description
    pub description: String,

    /// Provider-specific details (cores, memory, country, ...)
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl CatalogOption {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_kind_parse() {
        assert_eq!("sizes".parse::<CatalogKind>(), Ok(CatalogKind::Size));
        assert_eq!("location".parse::<CatalogKind>(), Ok(CatalogKind::Location));
        assert!("volumes".parse::<CatalogKind>().is_err());
    }

    #[test]
    fn test_server_spec_roundtrip_defaults() {
        let spec: ServerSpec = serde_json::from_str(
            r#"{"name":"web-1","size":"cx22","location":"fsn1","image":"ubuntu-24.04"}"#,
        )
        .unwrap();
        assert!(spec.ssh_keys.is_empty());
        assert!(spec.labels.is_empty());
    }

    #[test]
    fn test_only_running_is_ready() {
        assert!(ServerStatus::Running.is_ready());
        assert!(!ServerStatus::Starting.is_ready());
        assert!(!ServerStatus::Off.is_ready());
    }
}
