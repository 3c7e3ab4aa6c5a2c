//! Hetzner Cloud provider for hostflow
//!
//! This crate implements the `ProviderClient` trait against the Hetzner
//! Cloud REST API.
//!
//! # Features
//!
//! - Server create / delete / resize / get
//! - Catalog listing (server types, locations, system images)
//! - Label-based lookup of servers created by hostflow
//! - Client-side rate limiting against the hourly request budget
//!
//! # Requirements
//!
//! - `HCLOUD_TOKEN` env var (read/write API token)
//! - `HCLOUD_ENDPOINT` env var (optional, overrides the API base URL)
//!
//! # Example
//!
//! ```ignore
//! use hostflow_cloud::{CallContext, ProviderClient, ServerSpec};
//! use hostflow_cloud_hetzner::HetznerProvider;
//! use std::time::Duration;
//!
//! let provider = HetznerProvider::from_env()?;
//!
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//!
//! let ctx = CallContext::with_timeout(Duration::from_secs(30));
//! let spec = ServerSpec::new("web-1", "cx22", "fsn1", "ubuntu-24.04");
//! let created = provider.create("r-1", &spec, &ctx).await?;
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod provider;

pub use client::{HETZNER_API_BASE, HetznerClient, HetznerConfig};
pub use error::{HetznerError, Result};
pub use provider::HetznerProvider;
