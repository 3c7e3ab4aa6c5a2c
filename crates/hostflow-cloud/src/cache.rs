//! Read-through result cache in front of a provider client
//!
//! Catalog data changes rarely and is cached for hours; live server status
//! is cached for seconds. Concurrent misses for the same key share a single
//! provider call. Failed calls are never cached.
//!
//! Polling loops that need fresh data must call the provider returned by
//! [`CachedProvider::inner`] directly.

use crate::context::CallContext;
use crate::error::{CloudError, Result};
use crate::model::{CatalogKind, CatalogOption, ProviderKind, ServerObservation};
use crate::provider::ProviderClient;
use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Cache lifetimes and size
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long sizes, locations and images stay cached
    pub catalog_ttl: Duration,

    /// How long a server status observation stays cached
    pub status_ttl: Duration,

    /// Upper bound on entries per cache
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            catalog_ttl: Duration::from_secs(6 * 60 * 60),
            status_ttl: Duration::from_secs(10),
            max_entries: 1024,
        }
    }
}

/// Which provider call a cache entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    ListCatalog,
    Get,
}

/// (provider, call kind, argument hash)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: ProviderKind,
    pub call: CallKind,
    pub args_hash: u64,
}

impl CacheKey {
    pub fn new(provider: ProviderKind, call: CallKind, args: &impl Hash) -> Self {
        let mut hasher = DefaultHasher::new();
        args.hash(&mut hasher);
        Self {
            provider,
            call,
            args_hash: hasher.finish(),
        }
    }
}

/// Provider client wrapped with the result cache
pub struct CachedProvider {
    inner: Arc<dyn ProviderClient>,
    catalog: Cache<CacheKey, Arc<Vec<CatalogOption>>>,
    status: Cache<CacheKey, ServerObservation>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn ProviderClient>, config: &CacheConfig) -> Self {
        Self {
            inner,
            catalog: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.catalog_ttl)
                .build(),
            status: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.status_ttl)
                .build(),
        }
    }

    /// The uncached provider
    pub fn inner(&self) -> &Arc<dyn ProviderClient> {
        &self.inner
    }

    /// Cached `list_catalog`
    pub async fn list_catalog(
        &self,
        kind: CatalogKind,
        ctx: &CallContext,
    ) -> Result<Arc<Vec<CatalogOption>>> {
        let key = CacheKey::new(self.inner.kind(), CallKind::ListCatalog, &kind);
        let inner = Arc::clone(&self.inner);
        let ctx = ctx.clone();

        self.catalog
            .try_get_with(key, async move {
                tracing::debug!(kind = %kind, "Catalog cache miss");
                inner.list_catalog(kind, &ctx).await.map(Arc::new)
            })
            .await
            .map_err(unshare)
    }

    /// Cached `get`
    pub async fn get(
        &self,
        provider_resource_id: &str,
        ctx: &CallContext,
    ) -> Result<ServerObservation> {
        let key = CacheKey::new(self.inner.kind(), CallKind::Get, &provider_resource_id);
        let inner = Arc::clone(&self.inner);
        let id = provider_resource_id.to_string();
        let ctx = ctx.clone();

        self.status
            .try_get_with(key, async move {
                tracing::debug!(provider_resource_id = %id, "Status cache miss");
                inner.get(&id, &ctx).await
            })
            .await
            .map_err(unshare)
    }

    /// Drop a cached status, e.g. after a state-changing call
    pub async fn invalidate_status(&self, provider_resource_id: &str) {
        let key = CacheKey::new(self.inner.kind(), CallKind::Get, &provider_resource_id);
        self.status.invalidate(&key).await;
    }

    /// Drop every cached catalog
    pub fn invalidate_catalog(&self) {
        self.catalog.invalidate_all();
    }
}

fn unshare(err: Arc<CloudError>) -> CloudError {
    Arc::unwrap_or_clone(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CreatedServer, ServerSpec, ServerStatus};
    use crate::provider::AuthStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        catalog_calls: AtomicU32,
        get_calls: AtomicU32,
        fail_catalog_once: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ProviderClient for CountingProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Hetzner
        }

        async fn check_auth(&self) -> Result<AuthStatus> {
            Ok(AuthStatus::ok("test"))
        }

        async fn create(
            &self,
            _resource_id: &str,
            _spec: &ServerSpec,
            _ctx: &CallContext,
        ) -> Result<CreatedServer> {
            unimplemented!()
        }

        async fn delete(&self, _id: &str, _ctx: &CallContext) -> Result<()> {
            unimplemented!()
        }

        async fn resize(&self, _id: &str, _size: &str, _ctx: &CallContext) -> Result<()> {
            unimplemented!()
        }

        async fn get(&self, id: &str, _ctx: &CallContext) -> Result<ServerObservation> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ServerObservation {
                provider_resource_id: id.to_string(),
                name: "web-1".to_string(),
                status: ServerStatus::Running,
                size: "cx22".to_string(),
                public_address: None,
                resource_id: None,
            })
        }

        async fn list_catalog(
            &self,
            _kind: CatalogKind,
            _ctx: &CallContext,
        ) -> Result<Vec<CatalogOption>> {
            self.catalog_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_catalog_once.swap(false, Ordering::SeqCst) {
                return Err(CloudError::from_status(503, "unavailable"));
            }
            Ok(vec![CatalogOption::new("1", "cx22")])
        }

        async fn find_by_resource(
            &self,
            _resource_id: &str,
            _ctx: &CallContext,
        ) -> Result<Option<ServerObservation>> {
            Ok(None)
        }

        async fn list_managed(&self, _ctx: &CallContext) -> Result<Vec<ServerObservation>> {
            Ok(Vec::new())
        }
    }

    fn ctx() -> CallContext {
        CallContext::with_timeout(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_concurrent_catalog_reads_hit_provider_once() {
        let provider = Arc::new(CountingProvider::default());
        let cache = Arc::new(CachedProvider::new(provider.clone(), &CacheConfig::default()));

        let reads = (0..100).map(|_| {
            let cache = Arc::clone(&cache);
            async move { cache.list_catalog(CatalogKind::Size, &ctx()).await }
        });
        let results = futures_util::future::join_all(reads).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(provider.catalog_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_catalog_kinds_are_cached_separately() {
        let provider = Arc::new(CountingProvider::default());
        let cache = CachedProvider::new(provider.clone(), &CacheConfig::default());

        cache.list_catalog(CatalogKind::Size, &ctx()).await.unwrap();
        cache.list_catalog(CatalogKind::Image, &ctx()).await.unwrap();
        cache.list_catalog(CatalogKind::Size, &ctx()).await.unwrap();

        assert_eq!(provider.catalog_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let provider = Arc::new(CountingProvider::default());
        provider.fail_catalog_once.store(true, Ordering::SeqCst);
        let cache = CachedProvider::new(provider.clone(), &CacheConfig::default());

        let first = cache.list_catalog(CatalogKind::Size, &ctx()).await;
        assert!(matches!(first, Err(CloudError::Unavailable { .. })));

        let second = cache.list_catalog(CatalogKind::Size, &ctx()).await;
        assert!(second.is_ok());
        assert_eq!(provider.catalog_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_status_expires_quickly() {
        let provider = Arc::new(CountingProvider::default());
        let config = CacheConfig {
            status_ttl: Duration::from_millis(50),
            ..CacheConfig::default()
        };
        let cache = CachedProvider::new(provider.clone(), &config);

        cache.get("ext-1", &ctx()).await.unwrap();
        cache.get("ext-1", &ctx()).await.unwrap();
        assert_eq!(provider.get_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        cache.get("ext-1", &ctx()).await.unwrap();
        assert_eq!(provider.get_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_status() {
        let provider = Arc::new(CountingProvider::default());
        let cache = CachedProvider::new(provider.clone(), &CacheConfig::default());

        cache.get("ext-1", &ctx()).await.unwrap();
        cache.invalidate_status("ext-1").await;
        cache.get("ext-1", &ctx()).await.unwrap();

        assert_eq!(provider.get_calls.load(Ordering::SeqCst), 2);
    }
}
