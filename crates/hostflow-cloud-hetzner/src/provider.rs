//! Hetzner Cloud provider implementation

use crate::api::CreateServerRequest;
use crate::client::{HetznerClient, HetznerConfig};
use crate::error::HetznerError;
use async_trait::async_trait;
use hostflow_cloud::{
    AuthStatus, CallContext, CatalogKind, CatalogOption, CloudError, CreatedServer,
    LABEL_MANAGED_BY, LABEL_RESOURCE_ID, MANAGED_BY, ProviderClient, ProviderKind,
    ServerObservation, ServerSpec, ServerStatus,
};
use std::collections::BTreeMap;

/// Hetzner Cloud provider
pub struct HetznerProvider {
    client: HetznerClient,
}

impl HetznerProvider {
    pub fn new(config: HetznerConfig) -> crate::Result<Self> {
        Ok(Self {
            client: HetznerClient::new(config)?,
        })
    }

    /// Build a provider from `HCLOUD_TOKEN` / `HCLOUD_ENDPOINT`
    pub fn from_env() -> crate::Result<Self> {
        Self::new(HetznerConfig::from_env()?)
    }

    pub fn client(&self) -> &HetznerClient {
        &self.client
    }

    /// Bring the server to `new_size` and leave it powered on
    ///
    /// Steps are derived from the server's current state, so running this again after an
    /// interrupted attempt continues where that attempt stopped instead of repeating it.
    async fn do_resize(&self, id: u64, new_size: &str) -> crate::Result<()> {
        let server = self.client.get_server(id).await?;
        let steps = resize_steps(server.status(), &server.server_type.name, new_size);
        if steps.is_empty() {
            tracing::debug!(server_id = id, size = new_size, "Server already at target size");
        }

        for step in steps {
            let body = match step {
                "change_type" => {
                    serde_json::json!({ "server_type": new_size, "upgrade_disk": false })
                }
                _ => serde_json::json!({}),
            };
            self.run_action(id, step, body).await?;
        }
        Ok(())
    }

    async fn run_action(
        &self,
        id: u64,
        command: &str,
        body: serde_json::Value,
    ) -> crate::Result<()> {
        let action = self.client.server_action(id, command, body).await?;
        self.client.wait_for_action(&action).await?;
        Ok(())
    }
}

/// Server actions still needed to move a server from its current state to `new_size`
fn resize_steps(status: ServerStatus, current_size: &str, new_size: &str) -> Vec<&'static str> {
    let running = status != ServerStatus::Off;
    let mut steps = Vec::new();
    if current_size != new_size {
        if running {
            steps.push("poweroff");
        }
        steps.push("change_type");
        steps.push("poweron");
    } else if !running {
        steps.push("poweron");
    }
    steps
}

/// Labels attached to every server hostflow creates
fn management_labels(resource_id: &str, spec: &ServerSpec) -> BTreeMap<String, String> {
    let mut labels = spec.labels.clone();
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels.insert(LABEL_RESOURCE_ID.to_string(), resource_id.to_string());
    labels
}

fn parse_server_id(id: &str) -> crate::Result<u64> {
    id.parse()
        .map_err(|_| HetznerError::InvalidServerId(id.to_string()))
}

fn managed_selector() -> String {
    format!("{}={}", LABEL_MANAGED_BY, MANAGED_BY)
}

fn resource_selector(resource_id: &str) -> String {
    format!(
        "{}={},{}={}",
        LABEL_MANAGED_BY, MANAGED_BY, LABEL_RESOURCE_ID, resource_id
    )
}

#[async_trait]
impl ProviderClient for HetznerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hetzner
    }

    async fn check_auth(&self) -> hostflow_cloud::Result<AuthStatus> {
        match self.client.list_locations().await {
            Ok(locations) => Ok(AuthStatus::ok(format!(
                "Hetzner Cloud project ({} locations visible)",
                locations.len()
            ))),
            Err(e) => match CloudError::from(e) {
                CloudError::AuthenticationFailed(message) => Ok(AuthStatus::failed(message)),
                other => Err(other),
            },
        }
    }

    async fn create(
        &self,
        resource_id: &str,
        spec: &ServerSpec,
        ctx: &CallContext,
    ) -> hostflow_cloud::Result<CreatedServer> {
        let request = CreateServerRequest {
            name: spec.name.clone(),
            server_type: spec.size.clone(),
            location: spec.location.clone(),
            image: spec.image.clone(),
            ssh_keys: spec.ssh_keys.clone(),
            labels: management_labels(resource_id, spec),
            start_after_create: true,
        };

        ctx.run("create", async {
            let response = self.client.create_server(&request).await?;
            tracing::info!(
                resource_id,
                server_id = response.server.id,
                action_id = response.action.id,
                "Hetzner server creation accepted"
            );
            Ok::<_, CloudError>(CreatedServer {
                provider_resource_id: response.server.id.to_string(),
                public_address: response.server.ipv4(),
            })
        })
        .await
    }

    async fn delete(
        &self,
        provider_resource_id: &str,
        ctx: &CallContext,
    ) -> hostflow_cloud::Result<()> {
        let id = parse_server_id(provider_resource_id)?;
        ctx.run("delete", async {
            let action = self.client.delete_server(id).await?;
            tracing::debug!(server_id = id, action_id = action.id, "Delete action started");
            Ok::<_, CloudError>(())
        })
        .await
    }

    async fn resize(
        &self,
        provider_resource_id: &str,
        new_size: &str,
        ctx: &CallContext,
    ) -> hostflow_cloud::Result<()> {
        let id = parse_server_id(provider_resource_id)?;
        ctx.run("resize", async {
            self.do_resize(id, new_size).await?;
            Ok::<_, CloudError>(())
        })
        .await
    }

    async fn get(
        &self,
        provider_resource_id: &str,
        ctx: &CallContext,
    ) -> hostflow_cloud::Result<ServerObservation> {
        let id = parse_server_id(provider_resource_id)?;
        ctx.run("get", async {
            Ok::<_, CloudError>(self.client.get_server(id).await?.into_observation())
        })
        .await
    }

    async fn list_catalog(
        &self,
        kind: CatalogKind,
        ctx: &CallContext,
    ) -> hostflow_cloud::Result<Vec<CatalogOption>> {
        ctx.run("list_catalog", async {
            let options: Vec<CatalogOption> = match kind {
                CatalogKind::Size => self
                    .client
                    .list_server_types()
                    .await?
                    .into_iter()
                    .filter(|t| t.deprecation.is_none())
                    .map(CatalogOption::from)
                    .collect(),
                CatalogKind::Location => self
                    .client
                    .list_locations()
                    .await?
                    .into_iter()
                    .map(CatalogOption::from)
                    .collect(),
                CatalogKind::Image => self
                    .client
                    .list_images()
                    .await?
                    .into_iter()
                    .filter_map(|image| image.into_catalog_option())
                    .collect(),
            };
            Ok::<_, CloudError>(options)
        })
        .await
    }

    async fn find_by_resource(
        &self,
        resource_id: &str,
        ctx: &CallContext,
    ) -> hostflow_cloud::Result<Option<ServerObservation>> {
        ctx.run("find_by_resource", async {
            let mut servers = self
                .client
                .list_servers(&resource_selector(resource_id))
                .await?;
            if servers.len() > 1 {
                tracing::warn!(
                    resource_id,
                    count = servers.len(),
                    "Multiple servers carry the same resource label, using the oldest"
                );
            }
            servers.sort_by_key(|s| s.id);
            Ok::<_, CloudError>(servers.into_iter().next().map(|s| s.into_observation()))
        })
        .await
    }

    async fn list_managed(
        &self,
        ctx: &CallContext,
    ) -> hostflow_cloud::Result<Vec<ServerObservation>> {
        ctx.run("list_managed", async {
            let servers = self.client.list_servers(&managed_selector()).await?;
            Ok::<_, CloudError>(servers.into_iter().map(|s| s.into_observation()).collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_management_labels_override_user_labels() {
        let spec = ServerSpec::new("web-1", "cx22", "fsn1", "ubuntu-24.04")
            .with_label("team", "infra")
            .with_label(LABEL_RESOURCE_ID, "spoofed");

        let labels = management_labels("r-1", &spec);
        assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(labels.get(LABEL_RESOURCE_ID).map(String::as_str), Some("r-1"));
        assert_eq!(labels.get(LABEL_MANAGED_BY).map(String::as_str), Some(MANAGED_BY));
    }

    #[test]
    fn test_selectors() {
        assert_eq!(managed_selector(), "hostflow.io/managed-by=hostflow");
        assert_eq!(
            resource_selector("r-9"),
            "hostflow.io/managed-by=hostflow,hostflow.io/resource-id=r-9"
        );
    }

    #[test]
    fn test_parse_server_id() {
        assert_eq!(parse_server_id("42").unwrap(), 42);
        assert!(matches!(
            parse_server_id("srv-42"),
            Err(HetznerError::InvalidServerId(_))
        ));
    }

    #[test]
    fn test_resize_steps_follow_server_state() {
        assert_eq!(
            resize_steps(ServerStatus::Running, "cx22", "cx32"),
            ["poweroff", "change_type", "poweron"]
        );
        // interrupted after poweroff
        assert_eq!(
            resize_steps(ServerStatus::Off, "cx22", "cx32"),
            ["change_type", "poweron"]
        );
        // interrupted after change_type
        assert_eq!(resize_steps(ServerStatus::Off, "cx32", "cx32"), ["poweron"]);
        assert!(resize_steps(ServerStatus::Running, "cx32", "cx32").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_id_is_rejected_before_any_request() {
        let provider = HetznerProvider::new(HetznerConfig::new("token")).unwrap();
        let ctx = CallContext::with_timeout(std::time::Duration::from_secs(1));
        let err = provider.get("not-a-number", &ctx).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidRequest(_)));
    }
}
