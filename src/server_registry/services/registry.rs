//! In-memory source of truth for server configuration and runtime state.

use super::RegistryEvent;
use crate::server_registry::domain::{
    PromptDefinition, ResourceDefinition, ServerConfig, ServerConfigError, ServerConfigPatch,
    ServerId, ServerInput, ServerState, ServerStatus, ToolDefinition,
};
use mockable::Clock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Result type for server registry operations.
pub type ServerRegistryResult<T> = Result<T, ServerRegistryError>;

/// Errors returned by the server registry.
#[derive(Debug, Clone, Error)]
pub enum ServerRegistryError {
    /// A server with the same identifier already exists.
    #[error("server already registered: {0}")]
    DuplicateServer(ServerId),

    /// The server was not found.
    #[error("server not found: {0}")]
    NotFound(ServerId),

    /// The configuration failed validation.
    #[error("invalid configuration for server '{server_id}': {source}")]
    InvalidConfig {
        /// Identifier as written in the config source.
        server_id: String,
        /// Validation failure.
        source: ServerConfigError,
    },

    /// Registry state could not be accessed.
    #[error("registry state error: {0}")]
    State(Arc<dyn std::error::Error + Send + Sync>),
}

impl ServerRegistryError {
    /// Wraps a state access failure.
    pub fn state(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::State(Arc::new(err))
    }
}

type EventHandler = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

type HandlerList = RwLock<Vec<(u64, EventHandler)>>;

/// Handle returned by [`ServerRegistry::subscribe`].
///
/// Dropping the handle keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    handlers: Weak<HandlerList>,
}

impl Subscription {
    /// Removes the handler. Returns whether it was still registered.
    pub fn unsubscribe(self) -> bool {
        let Some(handlers) = self.handlers.upgrade() else {
            return false;
        };
        let Ok(mut list) = handlers.write() else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        list.len() != before
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Outcome of reconciling the registry with a declarative server map.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Servers registered for the first time.
    pub added: Vec<ServerId>,
    /// Existing servers whose configuration changed.
    pub updated: Vec<ServerId>,
    /// Servers no longer present in the source.
    pub removed: Vec<ServerId>,
    /// Entries skipped because they failed validation.
    pub rejected: Vec<ServerRegistryError>,
}

#[derive(Debug, Default)]
struct RegistryState {
    order: Vec<ServerId>,
    servers: HashMap<ServerId, ServerState>,
}

struct RegistryInner<C> {
    state: RwLock<RegistryState>,
    handlers: Arc<HandlerList>,
    next_handler_id: AtomicU64,
    clock: Arc<C>,
}

/// Server registry with change notifications.
///
/// Cloning yields another handle to the same registry. Every mutation goes
/// through the methods below; handlers run after the state lock is released.
pub struct ServerRegistry<C>
where
    C: Clock + Send + Sync + 'static,
{
    inner: Arc<RegistryInner<C>>,
}

impl<C> Clone for ServerRegistry<C>
where
    C: Clock + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for ServerRegistry<C>
where
    C: Clock + Send + Sync + 'static,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServerRegistry")
            .field("servers", &self.ids().unwrap_or_default())
            .finish_non_exhaustive()
    }
}

impl<C> ServerRegistry<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new(clock: Arc<C>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: RwLock::new(RegistryState::default()),
                handlers: Arc::new(RwLock::new(Vec::new())),
                next_handler_id: AtomicU64::new(0),
                clock,
            }),
        }
    }

    fn read_state(&self) -> ServerRegistryResult<RwLockReadGuard<'_, RegistryState>> {
        self.inner
            .state
            .read()
            .map_err(|err| ServerRegistryError::state(std::io::Error::other(err.to_string())))
    }

    fn write_state(&self) -> ServerRegistryResult<RwLockWriteGuard<'_, RegistryState>> {
        self.inner
            .state
            .write()
            .map_err(|err| ServerRegistryError::state(std::io::Error::other(err.to_string())))
    }

    fn with_server_mut<T>(
        &self,
        server_id: &ServerId,
        mutate: impl FnOnce(&mut ServerState, &C) -> T,
    ) -> ServerRegistryResult<T> {
        let mut state = self.write_state()?;
        let server = state
            .servers
            .get_mut(server_id)
            .ok_or_else(|| ServerRegistryError::NotFound(server_id.clone()))?;
        Ok(mutate(server, &self.inner.clock))
    }

    /// Registers a new server in the `disconnected` state.
    ///
    /// # Errors
    ///
    /// Returns [`ServerRegistryError::DuplicateServer`] when the id exists.
    pub fn add(&self, config: ServerConfig) -> ServerRegistryResult<ServerState> {
        let server_id = config.id().clone();
        let created = {
            let mut state = self.write_state()?;
            if state.servers.contains_key(&server_id) {
                return Err(ServerRegistryError::DuplicateServer(server_id));
            }
            let created = ServerState::new(config.clone(), &*self.inner.clock);
            state.order.push(server_id.clone());
            state.servers.insert(server_id.clone(), created.clone());
            created
        };

        debug!(server_id = %server_id, "server added");
        self.emit(&[RegistryEvent::ServerAdded { server_id, config }]);
        Ok(created)
    }

    /// Removes a server. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns state access errors.
    pub fn remove(&self, server_id: &ServerId) -> ServerRegistryResult<bool> {
        let removed = {
            let mut state = self.write_state()?;
            state.order.retain(|id| id != server_id);
            state.servers.remove(server_id).is_some()
        };

        if removed {
            debug!(server_id = %server_id, "server removed");
            self.emit(&[RegistryEvent::ServerRemoved {
                server_id: server_id.clone(),
            }]);
        }
        Ok(removed)
    }

    /// Merges `patch` into an existing configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerRegistryError::NotFound`] when the server is unknown.
    pub fn update(
        &self,
        server_id: &ServerId,
        patch: &ServerConfigPatch,
    ) -> ServerRegistryResult<ServerConfig> {
        let (previous, config) = self.with_server_mut(server_id, |server, clock| {
            let previous = server.config().clone();
            let merged = previous.merged(patch);
            server.replace_config(merged.clone(), clock);
            (previous, merged)
        })?;

        debug!(server_id = %server_id, "server updated");
        self.emit(&[RegistryEvent::ServerUpdated {
            server_id: server_id.clone(),
            previous,
            config: config.clone(),
        }]);
        Ok(config)
    }

    /// Replaces the cached tools and recomputes metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ServerRegistryError::NotFound`] when the server is unknown.
    pub fn set_tools(
        &self,
        server_id: &ServerId,
        tools: Vec<ToolDefinition>,
    ) -> ServerRegistryResult<()> {
        let tool_count = tools.len();
        self.with_server_mut(server_id, |server, clock| server.replace_tools(tools, clock))?;
        self.emit(&[RegistryEvent::ToolsChanged {
            server_id: server_id.clone(),
            tool_count,
        }]);
        Ok(())
    }

    /// Replaces the cached prompts.
    ///
    /// # Errors
    ///
    /// Returns [`ServerRegistryError::NotFound`] when the server is unknown.
    pub fn set_prompts(
        &self,
        server_id: &ServerId,
        prompts: Vec<PromptDefinition>,
    ) -> ServerRegistryResult<()> {
        self.with_server_mut(server_id, |server, _| server.replace_prompts(prompts))
    }

    /// Replaces the cached resources.
    ///
    /// # Errors
    ///
    /// Returns [`ServerRegistryError::NotFound`] when the server is unknown.
    pub fn set_resources(
        &self,
        server_id: &ServerId,
        resources: Vec<ResourceDefinition>,
    ) -> ServerRegistryResult<()> {
        self.with_server_mut(server_id, |server, _| server.replace_resources(resources))
    }

    /// Sets the connection status.
    ///
    /// `server:connected` fires only on a transition into `connected`,
    /// `server:disconnected` only on a transition out of it, and
    /// `server:error` every time the status is set to `error`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerRegistryError::NotFound`] when the server is unknown.
    pub fn set_status(&self, server_id: &ServerId, status: ServerStatus) -> ServerRegistryResult<()> {
        let next = status.clone();
        let previous = self.with_server_mut(server_id, |server, _| server.replace_status(status))?;

        let mut events = Vec::new();
        if next.is_connected() && !previous.is_connected() {
            events.push(RegistryEvent::ServerConnected {
                server_id: server_id.clone(),
            });
        }
        if previous.is_connected() && !next.is_connected() {
            events.push(RegistryEvent::ServerDisconnected {
                server_id: server_id.clone(),
            });
        }
        if let ServerStatus::Error(message) = next {
            events.push(RegistryEvent::ServerError {
                server_id: server_id.clone(),
                message,
            });
        }
        self.emit(&events);
        Ok(())
    }

    /// Returns a snapshot of one server.
    ///
    /// # Errors
    ///
    /// Returns state access errors.
    pub fn get(&self, server_id: &ServerId) -> ServerRegistryResult<Option<ServerState>> {
        Ok(self.read_state()?.servers.get(server_id).cloned())
    }

    /// Returns the configuration of one server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerRegistryError::NotFound`] when the server is unknown.
    pub fn config(&self, server_id: &ServerId) -> ServerRegistryResult<ServerConfig> {
        self.read_state()?
            .servers
            .get(server_id)
            .map(|server| server.config().clone())
            .ok_or_else(|| ServerRegistryError::NotFound(server_id.clone()))
    }

    /// Returns whether a server is registered.
    ///
    /// # Errors
    ///
    /// Returns state access errors.
    pub fn contains(&self, server_id: &ServerId) -> ServerRegistryResult<bool> {
        Ok(self.read_state()?.servers.contains_key(server_id))
    }

    /// Returns registered ids in registration order.
    ///
    /// # Errors
    ///
    /// Returns state access errors.
    pub fn ids(&self) -> ServerRegistryResult<Vec<ServerId>> {
        Ok(self.read_state()?.order.clone())
    }

    /// Returns snapshots of every server in registration order.
    ///
    /// # Errors
    ///
    /// Returns state access errors.
    pub fn list(&self) -> ServerRegistryResult<Vec<ServerState>> {
        let state = self.read_state()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.servers.get(id).cloned())
            .collect())
    }

    /// Returns snapshots of enabled servers in registration order.
    ///
    /// # Errors
    ///
    /// Returns state access errors.
    pub fn enabled_servers(&self) -> ServerRegistryResult<Vec<ServerState>> {
        let mut servers = self.list()?;
        servers.retain(|server| server.config().enabled());
        Ok(servers)
    }

    /// Returns every cached tool paired with its server.
    ///
    /// # Errors
    ///
    /// Returns state access errors.
    pub fn all_tools(&self) -> ServerRegistryResult<Vec<(ServerId, ToolDefinition)>> {
        Ok(self
            .list()?
            .into_iter()
            .flat_map(|server| {
                let server_id = server.config().id().clone();
                server
                    .tools()
                    .unwrap_or_default()
                    .iter()
                    .map(|tool| (server_id.clone(), tool.clone()))
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    /// Registers `handler` for every subsequent event.
    ///
    /// A panicking handler is logged and does not prevent later handlers
    /// from running.
    ///
    /// # Errors
    ///
    /// Returns state access errors.
    pub fn subscribe<F>(&self, handler: F) -> ServerRegistryResult<Subscription>
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .map_err(|err| ServerRegistryError::state(std::io::Error::other(err.to_string())))?
            .push((id, Arc::new(handler)));
        Ok(Subscription {
            id,
            handlers: Arc::downgrade(&self.inner.handlers),
        })
    }

    fn emit(&self, events: &[RegistryEvent]) {
        if events.is_empty() {
            return;
        }
        let handlers: Vec<EventHandler> = match self.inner.handlers.read() {
            Ok(list) => list.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            Err(err) => {
                warn!(error = %err, "registry handler list is poisoned; events dropped");
                return;
            }
        };

        for event in events {
            for handler in &handlers {
                if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                    warn!(
                        event = event.name(),
                        server_id = %event.server_id(),
                        "registry event handler panicked"
                    );
                }
            }
        }
    }

    /// Reconciles the registry with a declarative map of server inputs.
    ///
    /// Existing servers are updated first, then new servers are added and
    /// finally missing servers removed, all through the regular mutation
    /// methods so events stay consistent. Invalid entries are logged and
    /// skipped; an invalid entry for an already registered id leaves that
    /// server untouched. Keys that trim to the same id are applied once, in
    /// key order, and later ones are rejected as duplicates. Unchanged
    /// configurations emit nothing.
    ///
    /// # Errors
    ///
    /// Returns state access errors. Validation failures never abort the run.
    pub fn apply_config(
        &self,
        servers: &BTreeMap<String, ServerInput>,
    ) -> ServerRegistryResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut incoming: HashSet<String> = HashSet::with_capacity(servers.len());
        let mut seen: HashSet<ServerId> = HashSet::with_capacity(servers.len());
        let mut fresh = Vec::new();

        for (raw_id, input) in servers {
            incoming.insert(raw_id.trim().to_owned());
            let config = match ServerConfig::from_input(raw_id, input) {
                Ok(config) => config,
                Err(source) => {
                    warn!(server_id = %raw_id, error = %source, "skipping invalid server entry");
                    report.rejected.push(ServerRegistryError::InvalidConfig {
                        server_id: raw_id.clone(),
                        source,
                    });
                    continue;
                }
            };

            let server_id = config.id().clone();
            if !seen.insert(server_id.clone()) {
                warn!(server_id = %raw_id, "skipping duplicate server entry");
                report
                    .rejected
                    .push(ServerRegistryError::DuplicateServer(server_id));
                continue;
            }
            match self.get(&server_id)? {
                Some(existing) if existing.config() == &config => {}
                Some(_) => {
                    self.update(&server_id, &ServerConfigPatch::replace_with(&config))?;
                    report.updated.push(server_id);
                }
                None => fresh.push(config),
            }
        }

        for config in fresh {
            let server_id = config.id().clone();
            match self.add(config) {
                Ok(_) => report.added.push(server_id),
                Err(error @ ServerRegistryError::DuplicateServer(_)) => {
                    warn!(server_id = %server_id, "server registered concurrently, skipping");
                    report.rejected.push(error);
                }
                Err(error) => return Err(error),
            }
        }

        for server_id in self.ids()? {
            if !incoming.contains(server_id.as_str()) && self.remove(&server_id)? {
                report.removed.push(server_id);
            }
        }

        info!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            rejected = report.rejected.len(),
            "server configuration applied"
        );
        Ok(report)
    }
}
