//! Hetzner Cloud API client
//!
//! Direct REST implementation with Bearer token authentication. Every
//! request passes through a token bucket sized to the project's hourly
//! request budget.

use crate::api::{
    ActionResponse, ApiAction, ApiImage, ApiLocation, ApiServer, ApiServerType,
    CreateServerRequest, CreateServerResponse, ErrorEnvelope, ServerResponse,
};
use crate::error::{HetznerError, Result};
use hostflow_cloud::RateLimiter;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const HETZNER_API_BASE: &str = "https://api.hetzner.cloud/v1";

const PER_PAGE: &str = "50";

/// Configuration for the Hetzner client
#[derive(Debug, Clone)]
pub struct HetznerConfig {
    pub api_token: String,
    pub endpoint: String,
    pub request_timeout: Duration,
    pub requests_per_hour: u32,
    pub burst: u32,
    pub action_poll_interval: Duration,
}

impl HetznerConfig {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            endpoint: HETZNER_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
            requests_per_hour: 3600,
            burst: 10,
            action_poll_interval: Duration::from_secs(2),
        }
    }

    /// Create HetznerConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let api_token = std::env::var("HCLOUD_TOKEN")
            .map_err(|_| HetznerError::MissingEnvVar("HCLOUD_TOKEN".to_string()))?;
        let mut config = Self::new(api_token);
        if let Ok(endpoint) = std::env::var("HCLOUD_ENDPOINT") {
            config.endpoint = endpoint;
        }
        Ok(config)
    }
}

/// Hetzner Cloud API client
pub struct HetznerClient {
    http: reqwest::Client,
    config: HetznerConfig,
    limiter: RateLimiter,
}

impl HetznerClient {
    pub fn new(config: HetznerConfig) -> Result<Self> {
        if config.api_token.trim().is_empty() {
            return Err(HetznerError::InvalidConfig(
                "API token must not be empty".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("hostflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            limiter: RateLimiter::per_hour(config.requests_per_hour, config.burst),
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn url_with_params(&self, path: &str, params: &[(&str, String)]) -> Result<reqwest::Url> {
        reqwest::Url::parse_with_params(&self.url(path), params)
            .map_err(|e| HetznerError::InvalidConfig(format!("invalid endpoint: {}", e)))
    }

    /// Send a request and decode the JSON body, mapping error envelopes
    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        self.limiter.acquire().await;

        let response = request.bearer_auth(&self.config.api_token).send().await?;
        let status = response.status();
        log_rate_limit(response.headers());

        if status.is_success() {
            let body = response.text().await?;
            return Ok(serde_json::from_str(&body)?);
        }

        let retry_after = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(api_error(status.as_u16(), &body, retry_after))
    }

    /// Fetch every page of a list endpoint
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page: u64 = 1;

        loop {
            let mut query = params.to_vec();
            query.push(("page", page.to_string()));
            query.push(("per_page", PER_PAGE.to_string()));

            let url = self.url_with_params(path, &query)?;
            let body: serde_json::Value = self.execute(self.http.get(url)).await?;

            let page_items = body
                .get(key)
                .cloned()
                .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
            let mut parsed: Vec<T> = serde_json::from_value(page_items)?;
            items.append(&mut parsed);

            match body
                .pointer("/meta/pagination/next_page")
                .and_then(serde_json::Value::as_u64)
            {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(items)
    }

    pub async fn create_server(&self, request: &CreateServerRequest) -> Result<CreateServerResponse> {
        tracing::info!(
            name = %request.name,
            server_type = %request.server_type,
            location = %request.location,
            "Creating Hetzner server"
        );
        self.execute(self.http.post(self.url("/servers")).json(request))
            .await
    }

    pub async fn get_server(&self, id: u64) -> Result<ApiServer> {
        let response: ServerResponse = self
            .execute(self.http.get(self.url(&format!("/servers/{}", id))))
            .await?;
        Ok(response.server)
    }

    pub async fn delete_server(&self, id: u64) -> Result<ApiAction> {
        tracing::info!(server_id = id, "Deleting Hetzner server");
        let response: ActionResponse = self
            .execute(self.http.delete(self.url(&format!("/servers/{}", id))))
            .await?;
        Ok(response.action)
    }

    /// List servers matching a label selector
    pub async fn list_servers(&self, label_selector: &str) -> Result<Vec<ApiServer>> {
        self.list_all(
            "/servers",
            "servers",
            &[("label_selector", label_selector.to_string())],
        )
        .await
    }

    /// Trigger a server action (poweroff, poweron, change_type, ...)
    pub async fn server_action(
        &self,
        id: u64,
        action: &str,
        body: serde_json::Value,
    ) -> Result<ApiAction> {
        tracing::debug!(server_id = id, action, "Triggering server action");
        let response: ActionResponse = self
            .execute(
                self.http
                    .post(self.url(&format!("/servers/{}/actions/{}", id, action)))
                    .json(&body),
            )
            .await?;
        Ok(response.action)
    }

    pub async fn get_action(&self, id: u64) -> Result<ApiAction> {
        let response: ActionResponse = self
            .execute(self.http.get(self.url(&format!("/actions/{}", id))))
            .await?;
        Ok(response.action)
    }

    /// Poll an action until it finishes
    ///
    /// Callers bound the total wait with their own deadline.
    pub async fn wait_for_action(&self, action: &ApiAction) -> Result<()> {
        let mut current = action.clone();
        loop {
            if current.is_error() {
                let message = current
                    .error
                    .as_ref()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(HetznerError::ActionFailed {
                    id: current.id,
                    command: current.command,
                    message,
                });
            }
            if !current.is_running() {
                tracing::debug!(action_id = current.id, command = %current.command, "Action finished");
                return Ok(());
            }

            tokio::time::sleep(self.config.action_poll_interval).await;
            current = self.get_action(current.id).await?;
        }
    }

    pub async fn list_server_types(&self) -> Result<Vec<ApiServerType>> {
        self.list_all("/server_types", "server_types", &[]).await
    }

    pub async fn list_locations(&self) -> Result<Vec<ApiLocation>> {
        self.list_all("/locations", "locations", &[]).await
    }

    pub async fn list_images(&self) -> Result<Vec<ApiImage>> {
        self.list_all("/images", "images", &[("type", "system".to_string())])
            .await
    }
}

fn log_rate_limit(headers: &HeaderMap) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    if let (Some(limit), Some(remaining)) = (header("RateLimit-Limit"), header("RateLimit-Remaining"))
    {
        tracing::debug!(%limit, %remaining, "Hetzner rate limit budget");
    }
}

/// Wait hint from `Retry-After` (seconds) or `RateLimit-Reset` (unix time)
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    if let Some(secs) = value("Retry-After") {
        return Some(Duration::from_secs(secs));
    }

    let reset = value("RateLimit-Reset")?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

/// Build an error from a non-success response body
pub(crate) fn api_error(status: u16, body: &str, retry_after: Option<Duration>) -> HetznerError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => HetznerError::Api {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
            retry_after,
        },
        Err(_) => HetznerError::Api {
            status,
            code: "unknown".to_string(),
            message: if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                body.chars().take(200).collect()
            },
            retry_after,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostflow_cloud::CloudError;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_api_error_envelope() {
        let err = api_error(
            409,
            r#"{"error": {"code": "uniqueness_error", "message": "server name is already used"}}"#,
            None,
        );
        match &err {
            HetznerError::Api { code, .. } => assert_eq!(code, "uniqueness_error"),
            other => panic!("unexpected error: {:?}", other),
        }
        let cloud: CloudError = err.into();
        assert!(matches!(cloud, CloudError::ResourceAlreadyExists(_)));
    }

    #[test]
    fn test_api_error_without_envelope() {
        let err: CloudError = api_error(503, "<html>Service Unavailable</html>", None).into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(12)));

        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let result = HetznerClient::new(HetznerConfig::new("  "));
        assert!(matches!(result, Err(HetznerError::InvalidConfig(_))));
    }

    #[test]
    fn test_url_building() {
        let mut config = HetznerConfig::new("token");
        config.endpoint = "http://localhost:8080/v1/".to_string();
        let client = HetznerClient::new(config).unwrap();

        assert_eq!(client.url("/servers"), "http://localhost:8080/v1/servers");

        let url = client
            .url_with_params(
                "/servers",
                &[("label_selector", "hostflow.io/resource-id=r-1".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.query(),
            Some("label_selector=hostflow.io%2Fresource-id%3Dr-1")
        );
    }

    #[test]
    #[serial_test::serial]
    fn test_config_from_env() {
        unsafe {
            std::env::set_var("HCLOUD_TOKEN", "secret");
            std::env::remove_var("HCLOUD_ENDPOINT");
        }
        let config = HetznerConfig::from_env().unwrap();
        assert_eq!(config.api_token, "secret");
        assert_eq!(config.endpoint, HETZNER_API_BASE);

        unsafe {
            std::env::remove_var("HCLOUD_TOKEN");
        }
        assert!(matches!(
            HetznerConfig::from_env(),
            Err(HetznerError::MissingEnvVar(_))
        ));
    }
}
