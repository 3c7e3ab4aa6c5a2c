//! Hetzner Cloud API wire types

use hostflow_cloud::{
    CatalogOption, LABEL_RESOURCE_ID, ServerObservation, ServerStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiServer {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub server_type: ApiServerType,
    #[serde(default)]
    pub public_net: ApiPublicNet,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl ApiServer {
    pub fn ipv4(&self) -> Option<String> {
        self.public_net.ipv4.as_ref().map(|ip| ip.ip.clone())
    }

    pub fn status(&self) -> ServerStatus {
        parse_status(&self.status)
    }

    pub fn into_observation(self) -> ServerObservation {
        ServerObservation {
            provider_resource_id: self.id.to_string(),
            status: self.status(),
            public_address: self.ipv4(),
            resource_id: self.labels.get(LABEL_RESOURCE_ID).cloned(),
            size: self.server_type.name,
            name: self.name,
        }
    }
}

pub fn parse_status(status: &str) -> ServerStatus {
    match status {
        "initializing" => ServerStatus::Initializing,
        "starting" => ServerStatus::Starting,
        "running" => ServerStatus::Running,
        "stopping" => ServerStatus::Stopping,
        "off" => ServerStatus::Off,
        "deleting" => ServerStatus::Deleting,
        "migrating" => ServerStatus::Migrating,
        "rebuilding" => ServerStatus::Rebuilding,
        _ => ServerStatus::Unknown,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiPublicNet {
    pub ipv4: Option<ApiIp>,
    pub ipv6: Option<ApiIp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiIp {
    pub ip: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiServerType {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cores: Option<u32>,
    pub memory: Option<f64>,
    pub disk: Option<u64>,
    pub architecture: Option<String>,
    #[serde(default)]
    pub deprecation: Option<serde_json::Value>,
}

impl From<ApiServerType> for CatalogOption {
    fn from(t: ApiServerType) -> Self {
        let mut option = CatalogOption::new(t.id.to_string(), t.name).with_description(t.description);
        if let Some(cores) = t.cores {
            option = option.with_detail("cores", serde_json::json!(cores));
        }
        if let Some(memory) = t.memory {
            option = option.with_detail("memory_gb", serde_json::json!(memory));
        }
        if let Some(disk) = t.disk {
            option = option.with_detail("disk_gb", serde_json::json!(disk));
        }
        if let Some(arch) = t.architecture {
            option = option.with_detail("architecture", serde_json::json!(arch));
        }
        option
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiLocation {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub network_zone: Option<String>,
}

impl From<ApiLocation> for CatalogOption {
    fn from(l: ApiLocation) -> Self {
        let mut option = CatalogOption::new(l.id.to_string(), l.name).with_description(l.description);
        if let Some(country) = l.country {
            option = option.with_detail("country", serde_json::json!(country));
        }
        if let Some(city) = l.city {
            option = option.with_detail("city", serde_json::json!(city));
        }
        if let Some(zone) = l.network_zone {
            option = option.with_detail("network_zone", serde_json::json!(zone));
        }
        option
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiImage {
    pub id: u64,
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    pub os_flavor: Option<String>,
    pub os_version: Option<String>,
    pub architecture: Option<String>,
}

impl ApiImage {
    /// System images have a name, snapshots and backups do not
    pub fn into_catalog_option(self) -> Option<CatalogOption> {
        let name = self.name?;
        let mut option = CatalogOption::new(self.id.to_string(), name).with_description(self.description);
        if let Some(flavor) = self.os_flavor {
            option = option.with_detail("os_flavor", serde_json::json!(flavor));
        }
        if let Some(version) = self.os_version {
            option = option.with_detail("os_version", serde_json::json!(version));
        }
        if let Some(arch) = self.architecture {
            option = option.with_detail("architecture", serde_json::json!(arch));
        }
        Some(option)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiAction {
    pub id: u64,
    pub command: String,
    pub status: String,
    #[serde(default)]
    pub progress: u32,
    pub error: Option<ApiActionError>,
}

impl ApiAction {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiActionError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub server_type: String,
    pub location: String,
    pub image: String,
    pub ssh_keys: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub start_after_create: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateServerResponse {
    pub server: ApiServer,
    pub action: ApiAction,
    #[serde(default)]
    pub next_actions: Vec<ApiAction>,
}

#[derive(Debug, Deserialize)]
pub struct ServerResponse {
    pub server: ApiServer,
}

#[derive(Debug, Deserialize)]
pub struct ActionResponse {
    pub action: ApiAction,
}

#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_JSON: &str = r#"{
        "id": 42,
        "name": "web-1",
        "status": "initializing",
        "server_type": {"id": 1, "name": "cx22", "description": "CX22", "cores": 2, "memory": 4.0, "disk": 40},
        "public_net": {"ipv4": {"ip": "1.2.3.4"}, "ipv6": null},
        "labels": {"hostflow.io/managed-by": "hostflow", "hostflow.io/resource-id": "r-1"}
    }"#;

    #[test]
    fn test_server_into_observation() {
        let server: ApiServer = serde_json::from_str(SERVER_JSON).unwrap();
        let obs = server.into_observation();

        assert_eq!(obs.provider_resource_id, "42");
        assert_eq!(obs.status, ServerStatus::Initializing);
        assert_eq!(obs.size, "cx22");
        assert_eq!(obs.public_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(obs.resource_id.as_deref(), Some("r-1"));
    }

    #[test]
    fn test_unknown_status() {
        assert_eq!(parse_status("exploding"), ServerStatus::Unknown);
        assert_eq!(parse_status("off"), ServerStatus::Off);
    }

    #[test]
    fn test_snapshot_images_are_skipped() {
        let image: ApiImage = serde_json::from_str(
            r#"{"id": 7, "name": null, "description": "my snapshot"}"#,
        )
        .unwrap();
        assert!(image.into_catalog_option().is_none());

        let image: ApiImage = serde_json::from_str(
            r#"{"id": 8, "name": "ubuntu-24.04", "description": "Ubuntu 24.04", "os_flavor": "ubuntu"}"#,
        )
        .unwrap();
        let option = image.into_catalog_option().unwrap();
        assert_eq!(option.name, "ubuntu-24.04");
        assert_eq!(option.details["os_flavor"], serde_json::json!("ubuntu"));
    }

    #[test]
    fn test_action_error() {
        let action: ApiAction = serde_json::from_str(
            r#"{"id": 1, "command": "change_type", "status": "error", "progress": 100,
                "error": {"code": "action_failed", "message": "disk too small"}}"#,
        )
        .unwrap();
        assert!(action.is_error());
        assert!(!action.is_running());
    }
}
