//! Cloud provider trait definition

use crate::context::CallContext;
use crate::error::Result;
use crate::model::{
    CatalogKind, CatalogOption, CreatedServer, ProviderKind, ServerObservation, ServerSpec,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Cloud provider abstraction trait
///
/// One implementation exists per remote cloud API. The orchestrator only
/// ever sees `Arc<dyn ProviderClient>`, the concrete client is chosen from
/// configuration at start-up.
///
/// Implementations classify every failure into a [`crate::CloudError`]
/// whose [`crate::ErrorClass`] tells the retry controller whether a call may
/// be repeated.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this client talks to
    fn kind(&self) -> ProviderKind;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Create a server for the local resource `resource_id`
    ///
    /// Not idempotent at the provider. Implementations must tag the server
    /// so that [`ProviderClient::find_by_resource`] can find it again.
    async fn create(
        &self,
        resource_id: &str,
        spec: &ServerSpec,
        ctx: &CallContext,
    ) -> Result<CreatedServer>;

    /// Delete a server
    async fn delete(&self, provider_resource_id: &str, ctx: &CallContext) -> Result<()>;

    /// Change the size of a server
    async fn resize(
        &self,
        provider_resource_id: &str,
        new_size: &str,
        ctx: &CallContext,
    ) -> Result<()>;

    /// Read the current state of a server
    async fn get(&self, provider_resource_id: &str, ctx: &CallContext)
    -> Result<ServerObservation>;

    /// List sizes, locations or images
    async fn list_catalog(&self, kind: CatalogKind, ctx: &CallContext)
    -> Result<Vec<CatalogOption>>;

    /// Find the server created for a local resource, if any
    async fn find_by_resource(
        &self,
        resource_id: &str,
        ctx: &CallContext,
    ) -> Result<Option<ServerObservation>>;

    /// List every server carrying the hostflow management label
    async fn list_managed(&self, ctx: &CallContext) -> Result<Vec<ServerObservation>>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/project information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}
