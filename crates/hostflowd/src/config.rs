//! Daemon configuration
//!
//! One YAML file holds the provider section and the provisioner sections
//! side by side:
//!
//! ```yaml
//! provider:
//!   kind: hetzner
//!   token: ${HCLOUD_TOKEN}
//! state_dir: /var/lib/hostflow
//! worker:
//!   workers: 8
//! ```

use anyhow::{Context, bail};
use hostflow_cloud::ProviderKind;
use hostflow_cloud_hetzner::{HETZNER_API_BASE, HetznerConfig};
use hostflow_provisioner::ProvisionerConfig;
use hostflow_provisioner::config::secs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `provider.token`
pub const TOKEN_ENV: &str = "HCLOUD_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub provider: ProviderSection,

    #[serde(flatten)]
    pub provisioner: ProvisionerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub kind: ProviderKind,
    pub token: Option<String>,
    pub endpoint: String,
    pub requests_per_hour: u32,
    pub burst: u32,
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    #[serde(with = "secs")]
    pub action_poll_interval: Duration,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Hetzner,
            token: None,
            endpoint: HETZNER_API_BASE.to_string(),
            requests_per_hour: 3600,
            burst: 10,
            request_timeout: Duration::from_secs(30),
            action_poll_interval: Duration::from_secs(2),
        }
    }
}

impl ProviderSection {
    pub fn hetzner_config(&self) -> anyhow::Result<HetznerConfig> {
        let Some(token) = self.token.as_deref().filter(|t| !t.trim().is_empty()) else {
            bail!(
                "No provider token configured (set provider.token or {})",
                TOKEN_ENV
            );
        };

        let mut config = HetznerConfig::new(token);
        config.endpoint = self.endpoint.clone();
        config.requests_per_hour = self.requests_per_hour;
        config.burst = self.burst;
        config.request_timeout = self.request_timeout;
        config.action_poll_interval = self.action_poll_interval;
        Ok(config)
    }
}

impl DaemonConfig {
    /// Load from `path`, or discover the file when no path is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config: DaemonConfig = match path {
            Some(path) => hostflow_config::load_from(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => hostflow_config::load()?,
        };

        config.apply_env();
        config.provisioner.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV)
            && !token.is_empty()
        {
            self.provider.token = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_provider_and_provisioner_sections_share_a_file() {
        let config: DaemonConfig = serde_yaml::from_str(
            "provider:\n  kind: hetzner\n  token: abc\n  burst: 3\nstate_dir: /tmp/hostflow\nworker:\n  workers: 2\n",
        )
        .unwrap();

        assert_eq!(config.provider.token.as_deref(), Some("abc"));
        assert_eq!(config.provider.burst, 3);
        assert_eq!(config.provider.requests_per_hour, 3600);
        assert_eq!(config.provisioner.worker.workers, 2);
        assert_eq!(
            config.provisioner.state_dir.as_deref(),
            Some(Path::new("/tmp/hostflow"))
        );
    }

    #[test]
    fn test_missing_token_is_reported() {
        let err = ProviderSection::default().hetzner_config().unwrap_err();
        assert!(err.to_string().contains(TOKEN_ENV));
    }

    #[test]
    #[serial]
    fn test_env_token_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hostflow.yaml");
        fs::write(&path, "provider:\n  token: from-file\n").unwrap();

        unsafe {
            std::env::set_var(TOKEN_ENV, "from-env");
        }
        let config = DaemonConfig::load(Some(&path));
        unsafe {
            std::env::remove_var(TOKEN_ENV);
        }

        let config = config.unwrap();
        assert_eq!(config.provider.token.as_deref(), Some("from-env"));
        assert_eq!(
            config.provider.hetzner_config().unwrap().api_token,
            "from-env"
        );
    }

    #[test]
    #[serial]
    fn test_invalid_provisioner_section_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hostflow.yaml");
        fs::write(&path, "worker:\n  workers: 0\n").unwrap();

        let err = DaemonConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }
}
