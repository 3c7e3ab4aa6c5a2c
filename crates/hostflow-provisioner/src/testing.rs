//! Scriptable in-memory provider for tests

use async_trait::async_trait;
use hostflow_cloud::{
    AuthStatus, CallContext, CatalogKind, CatalogOption, CloudError, CreatedServer, ProviderClient,
    ProviderKind, Result, ServerObservation, ServerSpec, ServerStatus,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

struct MockServer {
    observation: ServerObservation,
    /// Polls left before the server reports `running`
    pending_polls: u32,
    /// Polls left before a deleted server disappears
    deleting: Option<u32>,
}

struct MockState {
    servers: BTreeMap<String, MockServer>,
    next_id: u64,
    next_address: Option<String>,
    polls_until_running: u32,
    never_ready: bool,
    delete_polls: u32,
    create_delay: Duration,
    resize_delay: Duration,
    panic_on_create: bool,
    catalog: HashMap<CatalogKind, Vec<CatalogOption>>,
    create_errors: VecDeque<CloudError>,
    delete_errors: VecDeque<CloudError>,
    resize_errors: VecDeque<CloudError>,
    get_errors: VecDeque<CloudError>,
    catalog_errors: VecDeque<CloudError>,
    find_errors: VecDeque<CloudError>,
}

#[derive(Default)]
struct Counters {
    create: AtomicU32,
    delete: AtomicU32,
    resize: AtomicU32,
    get: AtomicU32,
    catalog: AtomicU32,
    find: AtomicU32,
    list: AtomicU32,
}

/// Provider double with scripted failures and call counters
pub struct MockProvider {
    state: Mutex<MockState>,
    calls: Counters,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        let mut catalog = HashMap::new();
        catalog.insert(
            CatalogKind::Size,
            ["cx22", "cx32", "cx42"]
                .iter()
                .enumerate()
                .map(|(i, name)| CatalogOption::new((i + 1).to_string(), *name))
                .collect(),
        );
        catalog.insert(
            CatalogKind::Location,
            vec![
                CatalogOption::new("1", "fsn1"),
                CatalogOption::new("2", "nbg1"),
            ],
        );
        catalog.insert(
            CatalogKind::Image,
            vec![
                CatalogOption::new("1", "ubuntu-24.04"),
                CatalogOption::new("2", "debian-12"),
            ],
        );

        Self {
            state: Mutex::new(MockState {
                servers: BTreeMap::new(),
                next_id: 1,
                next_address: None,
                polls_until_running: 1,
                never_ready: false,
                delete_polls: 0,
                create_delay: Duration::ZERO,
                resize_delay: Duration::ZERO,
                panic_on_create: false,
                catalog,
                create_errors: VecDeque::new(),
                delete_errors: VecDeque::new(),
                resize_errors: VecDeque::new(),
                get_errors: VecDeque::new(),
                catalog_errors: VecDeque::new(),
                find_errors: VecDeque::new(),
            }),
            calls: Counters::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Scripting

    /// Next created server gets `ext-<id>`
    pub fn set_next_id(&self, id: u64) {
        self.state().next_id = id;
    }

    pub fn set_next_address(&self, address: impl Into<String>) {
        self.state().next_address = Some(address.into());
    }

    /// Polls a new or resized server reports before `running`
    pub fn set_polls_until_running(&self, polls: u32) {
        self.state().polls_until_running = polls;
    }

    pub fn set_never_ready(&self, never_ready: bool) {
        self.state().never_ready = never_ready;
    }

    /// Polls a deleted server stays visible as `deleting`
    pub fn set_delete_polls(&self, polls: u32) {
        self.state().delete_polls = polls;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state().create_delay = delay;
    }

    /// Time a resize spends at the provider before the new size is applied
    pub fn set_resize_delay(&self, delay: Duration) {
        self.state().resize_delay = delay;
    }

    pub fn set_panic_on_create(&self, panic: bool) {
        self.state().panic_on_create = panic;
    }

    pub fn set_catalog(&self, kind: CatalogKind, options: Vec<CatalogOption>) {
        self.state().catalog.insert(kind, options);
    }

    pub fn push_create_error(&self, err: CloudError) {
        self.state().create_errors.push_back(err);
    }

    pub fn push_delete_error(&self, err: CloudError) {
        self.state().delete_errors.push_back(err);
    }

    pub fn push_resize_error(&self, err: CloudError) {
        self.state().resize_errors.push_back(err);
    }

    pub fn push_get_error(&self, err: CloudError) {
        self.state().get_errors.push_back(err);
    }

    pub fn push_catalog_error(&self, err: CloudError) {
        self.state().catalog_errors.push_back(err);
    }

    pub fn push_find_error(&self, err: CloudError) {
        self.state().find_errors.push_back(err);
    }

    /// Add a running server directly, as if created out of band
    pub fn insert_server(&self, resource_id: Option<&str>, size: &str) -> String {
        let mut state = self.state();
        let id = format!("ext-{}", state.next_id);
        state.next_id += 1;
        let observation = ServerObservation {
            provider_resource_id: id.clone(),
            name: format!("server-{}", id),
            status: ServerStatus::Running,
            size: size.to_string(),
            public_address: Some("198.51.100.7".to_string()),
            resource_id: resource_id.map(str::to_string),
        };
        state.servers.insert(
            id.clone(),
            MockServer {
                observation,
                pending_polls: 0,
                deleting: None,
            },
        );
        id
    }

    pub fn remove_server(&self, provider_resource_id: &str) {
        self.state().servers.remove(provider_resource_id);
    }

    pub fn server(&self, provider_resource_id: &str) -> Option<ServerObservation> {
        self.state()
            .servers
            .get(provider_resource_id)
            .map(|s| s.observation.clone())
    }

    pub fn server_count(&self) -> usize {
        self.state().servers.len()
    }

    // Counters

    pub fn create_calls(&self) -> u32 {
        self.calls.create.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u32 {
        self.calls.delete.load(Ordering::SeqCst)
    }

    pub fn resize_calls(&self) -> u32 {
        self.calls.resize.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.calls.get.load(Ordering::SeqCst)
    }

    pub fn catalog_calls(&self) -> u32 {
        self.calls.catalog.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> u32 {
        self.calls.find.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.calls.list.load(Ordering::SeqCst)
    }

    fn do_create(&self, resource_id: &str, spec: &ServerSpec) -> Result<CreatedServer> {
        let mut state = self.state();
        if let Some(err) = state.create_errors.pop_front() {
            return Err(err);
        }
        if state
            .servers
            .values()
            .any(|s| s.observation.name == spec.name && s.deleting.is_none())
        {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "server name {} is already used",
                spec.name
            )));
        }

        let id = format!("ext-{}", state.next_id);
        state.next_id += 1;
        let address = state
            .next_address
            .take()
            .unwrap_or_else(|| format!("192.0.2.{}", state.servers.len() + 1));
        let pending_polls = state.polls_until_running;

        state.servers.insert(
            id.clone(),
            MockServer {
                observation: ServerObservation {
                    provider_resource_id: id.clone(),
                    name: spec.name.clone(),
                    status: ServerStatus::Initializing,
                    size: spec.size.clone(),
                    public_address: Some(address.clone()),
                    resource_id: Some(resource_id.to_string()),
                },
                pending_polls,
                deleting: None,
            },
        );

        Ok(CreatedServer {
            provider_resource_id: id,
            public_address: Some(address),
        })
    }

    fn do_get(&self, provider_resource_id: &str) -> Result<ServerObservation> {
        let mut state = self.state();
        if let Some(err) = state.get_errors.pop_front() {
            return Err(err);
        }
        let never_ready = state.never_ready;

        let not_found =
            || CloudError::ResourceNotFound(format!("server {} not found", provider_resource_id));
        let server = state
            .servers
            .get_mut(provider_resource_id)
            .ok_or_else(not_found)?;

        if let Some(left) = server.deleting {
            if left == 0 {
                state.servers.remove(provider_resource_id);
                return Err(not_found());
            }
            server.deleting = Some(left - 1);
            server.observation.status = ServerStatus::Deleting;
            return Ok(server.observation.clone());
        }

        if server.observation.status != ServerStatus::Running && !never_ready {
            if server.pending_polls == 0 {
                server.observation.status = ServerStatus::Running;
            } else {
                server.pending_polls -= 1;
                server.observation.status = ServerStatus::Starting;
            }
        }

        Ok(server.observation.clone())
    }

    fn do_delete(&self, provider_resource_id: &str) -> Result<()> {
        let mut state = self.state();
        if let Some(err) = state.delete_errors.pop_front() {
            return Err(err);
        }
        let delete_polls = state.delete_polls;

        let Some(server) = state.servers.get_mut(provider_resource_id) else {
            return Err(CloudError::ResourceNotFound(format!(
                "server {} not found",
                provider_resource_id
            )));
        };
        if delete_polls == 0 {
            state.servers.remove(provider_resource_id);
        } else if server.deleting.is_none() {
            server.deleting = Some(delete_polls);
        }
        Ok(())
    }

    fn do_resize(&self, provider_resource_id: &str, new_size: &str) -> Result<()> {
        let mut state = self.state();
        if let Some(err) = state.resize_errors.pop_front() {
            return Err(err);
        }
        let pending_polls = state.polls_until_running;

        let server = state
            .servers
            .get_mut(provider_resource_id)
            .ok_or_else(|| {
                CloudError::ResourceNotFound(format!("server {} not found", provider_resource_id))
            })?;
        server.observation.size = new_size.to_string();
        server.observation.status = ServerStatus::Off;
        server.pending_polls = pending_polls;
        Ok(())
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hetzner
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok("mock project"))
    }

    async fn create(
        &self,
        resource_id: &str,
        spec: &ServerSpec,
        ctx: &CallContext,
    ) -> Result<CreatedServer> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let (delay, panic) = {
            let state = self.state();
            (state.create_delay, state.panic_on_create)
        };
        if panic {
            panic!("mock provider create panicked");
        }

        ctx.run("create", async {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.do_create(resource_id, spec)
        })
        .await
    }

    async fn delete(&self, provider_resource_id: &str, ctx: &CallContext) -> Result<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        ctx.run("delete", async { self.do_delete(provider_resource_id) })
            .await
    }

    async fn resize(
        &self,
        provider_resource_id: &str,
        new_size: &str,
        ctx: &CallContext,
    ) -> Result<()> {
        self.calls.resize.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().resize_delay;
        ctx.run("resize", async {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.do_resize(provider_resource_id, new_size)
        })
        .await
    }

    async fn get(&self, provider_resource_id: &str, ctx: &CallContext) -> Result<ServerObservation> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        ctx.run("get", async { self.do_get(provider_resource_id) })
            .await
    }

    async fn list_catalog(
        &self,
        kind: CatalogKind,
        ctx: &CallContext,
    ) -> Result<Vec<CatalogOption>> {
        self.calls.catalog.fetch_add(1, Ordering::SeqCst);
        ctx.run("list_catalog", async {
            let mut state = self.state();
            if let Some(err) = state.catalog_errors.pop_front() {
                return Err(err);
            }
            Ok(state.catalog.get(&kind).cloned().unwrap_or_default())
        })
        .await
    }

    async fn find_by_resource(
        &self,
        resource_id: &str,
        ctx: &CallContext,
    ) -> Result<Option<ServerObservation>> {
        self.calls.find.fetch_add(1, Ordering::SeqCst);
        ctx.run("find_by_resource", async {
            let mut state = self.state();
            if let Some(err) = state.find_errors.pop_front() {
                return Err(err);
            }
            Ok(state
                .servers
                .values()
                .filter(|s| s.deleting.is_none())
                .find(|s| s.observation.resource_id.as_deref() == Some(resource_id))
                .map(|s| s.observation.clone()))
        })
        .await
    }

    async fn list_managed(&self, ctx: &CallContext) -> Result<Vec<ServerObservation>> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        ctx.run("list_managed", async {
            Ok(self
                .state()
                .servers
                .values()
                .map(|s| s.observation.clone())
                .collect())
        })
        .await
    }
}
