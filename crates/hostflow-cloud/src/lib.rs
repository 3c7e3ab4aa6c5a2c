//! hostflow Cloud Infrastructure
//!
//! This crate provides the provider abstraction used by the hostflow
//! provisioning orchestrator.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              hostflow-provisioner                │
//! │       (orchestrator, workers, reconciler)        │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 hostflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │        trait ProviderClient { ... }       │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐ ┌─────────────┐ ┌──────────┐  │
//! │  │ retry/backoff│ │ result cache│ │rate limit│  │
//! │  └──────────────┘ └─────────────┘ └──────────┘  │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │    hetzner    │
//! │   provider    │
//! └───────────────┘
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod model;
pub mod provider;
pub mod rate_limit;
pub mod retry;

// Re-exports
pub use cache::{CacheConfig, CacheKey, CachedProvider, CallKind};
pub use context::CallContext;
pub use error::{CloudError, ErrorClass, Result};
pub use model::{
    CatalogKind, CatalogOption, CreatedServer, LABEL_MANAGED_BY, LABEL_RESOURCE_ID, MANAGED_BY,
    ProviderKind, ServerObservation, ServerSpec, ServerStatus,
};
pub use provider::{AuthStatus, ProviderClient};
pub use rate_limit::RateLimiter;
pub use retry::{RetryConfig, retry};
