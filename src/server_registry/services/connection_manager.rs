//! Connection lifecycle orchestration for registered servers.
//!
//! The manager owns one live connection per server id and writes status and
//! catalogue changes back through the [`ServerRegistry`] setters. Concurrent
//! callers asking for the same unconnected server share a single in-flight
//! connect attempt.

use super::{RegistryEvent, ServerRegistry, ServerRegistryError, Subscription};
use crate::server_registry::{
    domain::{ServerConfig, ServerId, ServerStatus, ToolCallOutcome, ToolDefinition},
    ports::{ConnectionFactory, ServerConnection, ServerConnectionError, ServerConnectionResult},
};
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, warn};

/// Timeouts and health-check cadence applied by the [`ConnectionManager`].
///
/// A per-server `timeout` in [`ServerConfig`] overrides every operation
/// class for that server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Bound on establishing a connection.
    #[serde(rename = "connectTimeoutMs", with = "crate::config::duration_ms")]
    pub connect_timeout: Duration,
    /// Bound on each catalogue listing.
    #[serde(rename = "refreshTimeoutMs", with = "crate::config::duration_ms")]
    pub refresh_timeout: Duration,
    /// Bound on a liveness probe.
    #[serde(rename = "healthCheckTimeoutMs", with = "crate::config::duration_ms")]
    pub health_check_timeout: Duration,
    /// Bound on a tool, prompt or resource request.
    #[serde(rename = "toolCallTimeoutMs", with = "crate::config::duration_ms")]
    pub tool_call_timeout: Duration,
    /// Period of the health-check loop.
    #[serde(rename = "healthCheckIntervalMs", with = "crate::config::duration_ms")]
    pub health_check_interval: Duration,
    /// Whether [`ConnectionManager::start_health_checks`] starts the loop.
    pub health_checks_enabled: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(15),
            health_check_timeout: Duration::from_secs(10),
            tool_call_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(60),
            health_checks_enabled: true,
        }
    }
}

impl ConnectionSettings {
    /// Returns the default bound for `operation`.
    #[must_use]
    pub const fn timeout(&self, operation: OperationClass) -> Duration {
        match operation {
            OperationClass::Connect => self.connect_timeout,
            OperationClass::Refresh => self.refresh_timeout,
            OperationClass::HealthCheck => self.health_check_timeout,
            OperationClass::ToolCall => self.tool_call_timeout,
        }
    }

    /// Returns the bound for `operation` against `config`.
    #[must_use]
    pub fn timeout_for(&self, operation: OperationClass, config: &ServerConfig) -> Duration {
        config
            .timeout()
            .unwrap_or_else(|| self.timeout(operation))
    }
}

/// Operation classes with independent timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Establishing a connection.
    Connect,
    /// Listing tools, prompts or resources.
    Refresh,
    /// Liveness probe.
    HealthCheck,
    /// Tool, prompt or resource request.
    ToolCall,
}

impl OperationClass {
    /// Returns a human-readable operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Refresh => "refresh",
            Self::HealthCheck => "health check",
            Self::ToolCall => "tool call",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Errors returned by the connection manager.
#[derive(Debug, Clone, Error)]
pub enum ConnectionManagerError {
    /// The registry rejected the lookup or update.
    #[error(transparent)]
    Registry(#[from] ServerRegistryError),

    /// The server is registered but disabled.
    #[error("server {0} is disabled")]
    Disabled(ServerId),

    /// The transport reported a failure.
    #[error("server {server_id}: {source}")]
    Connection {
        /// Server identifier.
        server_id: ServerId,
        /// Transport failure.
        source: ServerConnectionError,
    },

    /// An operation exceeded its bound.
    #[error("{operation} timed out after {}ms for server {server_id}", .timeout.as_millis())]
    Timeout {
        /// Server identifier.
        server_id: ServerId,
        /// Operation that timed out.
        operation: OperationClass,
        /// Bound that was exceeded.
        timeout: Duration,
    },

    /// The attempt was superseded by a disconnect.
    #[error("connection attempt for server {0} was cancelled")]
    Cancelled(ServerId),
}

impl ConnectionManagerError {
    const fn marks_server_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Result type for connection manager operations.
pub type ConnectionManagerResult<T> = Result<T, ConnectionManagerError>;

/// Outcome of one health-check tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCheckReport {
    /// Connected servers that answered the liveness probe.
    pub healthy: Vec<ServerId>,
    /// Servers that were down and reconnected.
    pub reconnected: Vec<ServerId>,
    /// Servers that were down and failed to reconnect.
    pub failed: Vec<ServerId>,
    /// Connected servers that failed the probe and are now disconnected.
    pub lost: Vec<ServerId>,
}

enum HealthOutcome {
    Healthy,
    Reconnected,
    Failed,
    Lost,
}

type ConnectOutcome = ConnectionManagerResult<Arc<dyn ServerConnection>>;

type SharedConnect = Shared<BoxFuture<'static, ConnectOutcome>>;

struct PendingConnect {
    attempt: u64,
    future: SharedConnect,
    abort: AbortHandle,
}

struct LiveConnection {
    connection: Arc<dyn ServerConnection>,
    healthy: bool,
}

struct ManagerInner<C>
where
    C: Clock + Send + Sync + 'static,
{
    registry: ServerRegistry<C>,
    factory: Arc<dyn ConnectionFactory>,
    settings: ConnectionSettings,
    connections: Mutex<HashMap<ServerId, LiveConnection>>,
    pending: Mutex<HashMap<ServerId, PendingConnect>>,
    next_attempt: AtomicU64,
    tick_in_flight: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
    health_tick: Mutex<Option<AbortHandle>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<C> ManagerInner<C>
where
    C: Clock + Send + Sync + 'static,
{
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<ServerId, LiveConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<ServerId, PendingConnect>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_health_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_health_tick(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.health_tick
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Remembers the spawned tick unless an earlier one is still running.
    fn track_tick(&self, tick: AbortHandle) {
        let mut slot = self.lock_health_tick();
        if !slot.as_ref().is_some_and(|running| !running.is_finished()) {
            *slot = Some(tick);
        }
    }

    fn live_connection(&self, server_id: &ServerId) -> Option<Arc<dyn ServerConnection>> {
        self.lock_connections()
            .get(server_id)
            .filter(|live| live.healthy && live.connection.is_connected())
            .map(|live| Arc::clone(&live.connection))
    }

    fn is_current(&self, server_id: &ServerId, attempt: u64) -> bool {
        self.lock_pending()
            .get(server_id)
            .is_some_and(|pending| pending.attempt == attempt)
    }

    fn clear_pending(&self, server_id: &ServerId, attempt: u64) {
        let mut pending = self.lock_pending();
        if pending
            .get(server_id)
            .is_some_and(|entry| entry.attempt == attempt)
        {
            pending.remove(server_id);
        }
    }

    /// Stores the connection if `attempt` is still the current one.
    fn store_connection(
        &self,
        server_id: &ServerId,
        attempt: u64,
        connection: &Arc<dyn ServerConnection>,
    ) -> bool {
        let pending = self.lock_pending();
        if !pending
            .get(server_id)
            .is_some_and(|entry| entry.attempt == attempt)
        {
            return false;
        }
        self.lock_connections().insert(
            server_id.clone(),
            LiveConnection {
                connection: Arc::clone(connection),
                healthy: true,
            },
        );
        drop(pending);
        true
    }

    fn mark_unhealthy(&self, server_id: &ServerId, connection: &Arc<dyn ServerConnection>) {
        if let Some(live) = self.lock_connections().get_mut(server_id)
            && Arc::ptr_eq(&live.connection, connection)
        {
            live.healthy = false;
        }
    }

    fn timeout_for(&self, operation: OperationClass, server_id: &ServerId) -> Duration {
        self.registry
            .config(server_id)
            .ok()
            .and_then(|config| config.timeout())
            .unwrap_or_else(|| self.settings.timeout(operation))
    }

    fn set_status(&self, server_id: &ServerId, status: ServerStatus) {
        match self.registry.set_status(server_id, status) {
            Ok(()) | Err(ServerRegistryError::NotFound(_)) => {}
            Err(err) => warn!(server_id = %server_id, error = %err, "failed to record server status"),
        }
    }
}

impl<C> Drop for ManagerInner<C>
where
    C: Clock + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(task) = self
            .health_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if let Some(tick) = self
            .health_tick
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            tick.abort();
        }
        if let Some(subscription) = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.unsubscribe();
        }
    }
}

/// Resets the tick flag when a health check finishes or is cancelled.
struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owns live connections to registered servers.
///
/// Cloning yields another handle to the same manager.
pub struct ConnectionManager<C>
where
    C: Clock + Send + Sync + 'static,
{
    inner: Arc<ManagerInner<C>>,
}

impl<C> Clone for ConnectionManager<C>
where
    C: Clock + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for ConnectionManager<C>
where
    C: Clock + Send + Sync + 'static,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connected: Vec<ServerId> = self.inner.lock_connections().keys().cloned().collect();
        formatter
            .debug_struct("ConnectionManager")
            .field("settings", &self.inner.settings)
            .field("connections", &connected)
            .finish_non_exhaustive()
    }
}

impl<C> ConnectionManager<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Creates a manager and subscribes it to `registry`.
    ///
    /// Removing a server, disabling it or changing its transport schedules
    /// a disconnect on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionManagerError::Registry`] when the subscription
    /// cannot be registered.
    pub fn new(
        registry: ServerRegistry<C>,
        factory: Arc<dyn ConnectionFactory>,
        settings: ConnectionSettings,
    ) -> ConnectionManagerResult<Self> {
        let inner = Arc::new(ManagerInner {
            registry,
            factory,
            settings,
            connections: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(0),
            tick_in_flight: AtomicBool::new(false),
            health_task: Mutex::new(None),
            health_tick: Mutex::new(None),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.registry.subscribe(move |event| {
            let Some(server_id) = auto_disconnect_target(event) else {
                return;
            };
            let Some(manager_inner) = weak.upgrade() else {
                return;
            };
            let manager = Self {
                inner: manager_inner,
            };
            match Handle::try_current() {
                Ok(runtime) => {
                    debug!(server_id = %server_id, event = event.name(), "scheduling disconnect");
                    runtime.spawn(async move { manager.disconnect(&server_id).await });
                }
                Err(err) => warn!(
                    server_id = %server_id,
                    error = %err,
                    "no async runtime available; connection left open"
                ),
            }
        })?;
        *inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);

        Ok(Self { inner })
    }

    /// Returns the registry the manager reports to.
    #[must_use]
    pub fn registry(&self) -> &ServerRegistry<C> {
        &self.inner.registry
    }

    /// Returns the configured timeouts and cadence.
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    /// Returns a connected client for `server_id`, connecting if needed.
    ///
    /// A connection already reporting connected is returned without a
    /// round-trip. Concurrent callers for the same server share one attempt.
    ///
    /// # Errors
    ///
    /// Returns registry errors when the server is unknown,
    /// [`ConnectionManagerError::Disabled`] when it is disabled, and
    /// connection, timeout or cancellation errors from the attempt.
    pub async fn get_client(&self, server_id: &ServerId) -> ConnectOutcome {
        if let Some(connection) = self.inner.live_connection(server_id) {
            return Ok(connection);
        }
        let attempt = self.join_or_start(server_id);
        attempt.await
    }

    fn join_or_start(&self, server_id: &ServerId) -> SharedConnect {
        let mut pending = self.inner.lock_pending();
        if let Some(existing) = pending.get(server_id) {
            return existing.future.clone();
        }
        if let Some(connection) = self.inner.live_connection(server_id) {
            return futures::future::ready(Ok(connection)).boxed().shared();
        }

        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
        let manager = self.clone();
        let task_id = server_id.clone();
        let task = tokio::spawn(async move { manager.establish(task_id, attempt).await });
        let abort = task.abort_handle();

        let weak = Arc::downgrade(&self.inner);
        let waiter_id = server_id.clone();
        let future = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    debug!(server_id = %waiter_id, error = %err, "connect task ended early");
                    if let Some(inner) = weak.upgrade() {
                        inner.clear_pending(&waiter_id, attempt);
                    }
                    Err(ConnectionManagerError::Cancelled(waiter_id))
                }
            }
        }
        .boxed()
        .shared();

        pending.insert(
            server_id.clone(),
            PendingConnect {
                attempt,
                future: future.clone(),
                abort,
            },
        );
        future
    }

    async fn establish(self, server_id: ServerId, attempt: u64) -> ConnectOutcome {
        let outcome = self.open(&server_id, attempt).await;
        if let Err(err) = &outcome {
            if err.marks_server_error() && self.inner.is_current(&server_id, attempt) {
                warn!(server_id = %server_id, error = %err, "connection attempt failed");
                self.inner
                    .set_status(&server_id, ServerStatus::Error(err.to_string()));
            } else {
                debug!(server_id = %server_id, error = %err, "connection attempt abandoned");
            }
        }
        self.inner.clear_pending(&server_id, attempt);
        outcome
    }

    async fn open(&self, server_id: &ServerId, attempt: u64) -> ConnectOutcome {
        let config = self.inner.registry.config(server_id)?;
        if !config.enabled() {
            return Err(ConnectionManagerError::Disabled(server_id.clone()));
        }
        let connection = self
            .inner
            .factory
            .create(&config)
            .map_err(|source| ConnectionManagerError::Connection {
                server_id: server_id.clone(),
                source,
            })?;

        self.inner.set_status(server_id, ServerStatus::Connecting);
        let connect_timeout = self.inner.settings.timeout_for(OperationClass::Connect, &config);
        let connected = bounded(
            server_id,
            OperationClass::Connect,
            connect_timeout,
            connection.connect(),
        )
        .await;
        if let Err(err) = connected {
            if matches!(err, ConnectionManagerError::Timeout { .. }) {
                spawn_teardown(server_id, connection, connect_timeout);
            }
            return Err(err);
        }

        if !self.inner.store_connection(server_id, attempt, &connection) {
            spawn_teardown(server_id, connection, connect_timeout);
            return Err(ConnectionManagerError::Cancelled(server_id.clone()));
        }

        info!(server_id = %server_id, transport = %config.transport().kind(), "server connected");
        self.inner.set_status(server_id, ServerStatus::Connected);
        let refresh_timeout = self.inner.settings.timeout_for(OperationClass::Refresh, &config);
        self.refresh_catalog(server_id, &connection, refresh_timeout)
            .await;
        Ok(connection)
    }

    async fn refresh_catalog(
        &self,
        server_id: &ServerId,
        connection: &Arc<dyn ServerConnection>,
        limit: Duration,
    ) {
        let (tools, prompts, resources) = futures::join!(
            bounded(server_id, OperationClass::Refresh, limit, connection.list_tools()),
            bounded(server_id, OperationClass::Refresh, limit, connection.list_prompts()),
            bounded(server_id, OperationClass::Refresh, limit, connection.list_resources()),
        );

        let registry = &self.inner.registry;
        match tools {
            Ok(listed) => note_registry_write(server_id, registry.set_tools(server_id, listed)),
            Err(err) => warn!(
                server_id = %server_id,
                error = %err,
                "tool refresh failed; keeping cached tools"
            ),
        }
        match prompts {
            Ok(listed) => note_registry_write(server_id, registry.set_prompts(server_id, listed)),
            Err(err) => debug!(server_id = %server_id, error = %err, "prompts unavailable"),
        }
        match resources {
            Ok(listed) => {
                note_registry_write(server_id, registry.set_resources(server_id, listed));
            }
            Err(err) => debug!(server_id = %server_id, error = %err, "resources unavailable"),
        }
    }

    /// Returns whether `server_id` has a healthy, connected client.
    #[must_use]
    pub fn is_connected(&self, server_id: &ServerId) -> bool {
        self.inner.live_connection(server_id).is_some()
    }

    /// Cancels any pending attempt and tears down the connection.
    ///
    /// Transport errors are logged. The server ends up `disconnected` if it
    /// is still registered.
    pub async fn disconnect(&self, server_id: &ServerId) {
        let cancelled = self.inner.lock_pending().remove(server_id);
        if let Some(pending) = cancelled {
            debug!(server_id = %server_id, "cancelling pending connect");
            pending.abort.abort();
        }

        let live = self.inner.lock_connections().remove(server_id);
        if let Some(entry) = live {
            let limit = self.inner.timeout_for(OperationClass::Connect, server_id);
            match bounded(
                server_id,
                OperationClass::Connect,
                limit,
                entry.connection.disconnect(),
            )
            .await
            {
                Ok(()) => info!(server_id = %server_id, "server disconnected"),
                Err(err) => warn!(server_id = %server_id, error = %err, "disconnect failed"),
            }
        }

        self.inner.set_status(server_id, ServerStatus::Disconnected);
    }

    /// Disconnects every known server concurrently.
    ///
    /// A failing server does not prevent the others from disconnecting.
    pub async fn disconnect_all(&self) {
        let mut known: BTreeSet<ServerId> = self.inner.lock_pending().keys().cloned().collect();
        known.extend(self.inner.lock_connections().keys().cloned());

        join_all(known.iter().map(|server_id| self.disconnect(server_id))).await;
    }

    /// Re-lists tools for `server_id` and stores them in the registry.
    ///
    /// # Errors
    ///
    /// Returns connection, timeout or registry errors.
    pub async fn refresh_tools(
        &self,
        server_id: &ServerId,
    ) -> ConnectionManagerResult<Vec<ToolDefinition>> {
        let connection = self.get_client(server_id).await?;
        let limit = self.inner.timeout_for(OperationClass::Refresh, server_id);
        let tools = bounded(
            server_id,
            OperationClass::Refresh,
            limit,
            connection.list_tools(),
        )
        .await?;
        self.inner.registry.set_tools(server_id, tools.clone())?;
        Ok(tools)
    }

    /// Invokes a tool and reports failures as data.
    ///
    /// Connection errors, timeouts and remote failures all produce an
    /// outcome with `is_error` set. A payload shaped as
    /// `{"content": ..., "isError": ...}` is unwrapped.
    pub async fn call_tool(
        &self,
        server_id: &ServerId,
        name: &str,
        arguments: Map<String, Value>,
    ) -> ToolCallOutcome {
        let connection = match self.get_client(server_id).await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(server_id = %server_id, tool = name, error = %err, "tool call skipped");
                return ToolCallOutcome::failure(err.to_string());
            }
        };

        let limit = self.inner.timeout_for(OperationClass::ToolCall, server_id);
        match bounded(
            server_id,
            OperationClass::ToolCall,
            limit,
            connection.call_tool(name, arguments, Some(limit)),
        )
        .await
        {
            Ok(payload) => outcome_from_payload(payload),
            Err(err) => {
                warn!(server_id = %server_id, tool = name, error = %err, "tool call failed");
                ToolCallOutcome::failure(err.to_string())
            }
        }
    }

    /// Renders a prompt template on `server_id`.
    ///
    /// # Errors
    ///
    /// Returns connection or timeout errors.
    pub async fn get_prompt(
        &self,
        server_id: &ServerId,
        name: &str,
        arguments: Map<String, Value>,
    ) -> ConnectionManagerResult<Value> {
        let connection = self.get_client(server_id).await?;
        let limit = self.inner.timeout_for(OperationClass::ToolCall, server_id);
        bounded(
            server_id,
            OperationClass::ToolCall,
            limit,
            connection.get_prompt(name, arguments),
        )
        .await
    }

    /// Reads a resource from `server_id`.
    ///
    /// # Errors
    ///
    /// Returns connection or timeout errors.
    pub async fn read_resource(
        &self,
        server_id: &ServerId,
        uri: &str,
    ) -> ConnectionManagerResult<Value> {
        let connection = self.get_client(server_id).await?;
        let limit = self.inner.timeout_for(OperationClass::ToolCall, server_id);
        bounded(
            server_id,
            OperationClass::ToolCall,
            limit,
            connection.read_resource(uri),
        )
        .await
    }

    /// Starts the periodic health-check loop.
    ///
    /// Returns `false` when checks are disabled, the interval is zero, the
    /// loop is already running or no Tokio runtime is available.
    pub fn start_health_checks(&self) -> bool {
        let settings = self.inner.settings;
        if !settings.health_checks_enabled || settings.health_check_interval.is_zero() {
            debug!("health checks disabled");
            return false;
        }

        let mut slot = self.inner.lock_health_task();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(error = %err, "no async runtime available; health checks not started");
                return false;
            }
        };

        let period = settings.health_check_interval;
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let tracker = Arc::clone(&inner);
                let manager = Self { inner };
                let tick = tokio::spawn(async move {
                    if manager.run_health_check().await.is_none() {
                        debug!("previous health check still running; tick skipped");
                    }
                });
                tracker.track_tick(tick.abort_handle());
            }
        }));
        info!(interval_ms = period.as_millis(), "health checks started");
        true
    }

    /// Stops the health-check loop and aborts a tick still in flight.
    /// Returns whether the loop was running.
    ///
    /// A reconnect the aborted tick started keeps running; it is shared
    /// with other callers of [`Self::get_client`].
    pub fn stop_health_checks(&self) -> bool {
        let Some(task) = self.inner.lock_health_task().take() else {
            return false;
        };
        task.abort();
        if let Some(tick) = self.inner.lock_health_tick().take() {
            tick.abort();
        }
        info!("health checks stopped");
        true
    }

    /// Runs one health-check tick over every known connection.
    ///
    /// Returns `None` when another tick is still in flight. Down
    /// connections are reconnected; connected ones are probed by listing
    /// tools, and a failed probe marks the server `disconnected` without
    /// reconnecting in the same tick.
    pub async fn run_health_check(&self) -> Option<HealthCheckReport> {
        let _tick = TickGuard::acquire(&self.inner.tick_in_flight)?;

        let entries: Vec<(ServerId, Arc<dyn ServerConnection>, bool)> = self
            .inner
            .lock_connections()
            .iter()
            .map(|(server_id, live)| {
                (
                    server_id.clone(),
                    Arc::clone(&live.connection),
                    live.healthy && live.connection.is_connected(),
                )
            })
            .collect();

        let outcomes = join_all(
            entries
                .into_iter()
                .map(|(server_id, connection, up)| self.check_one(server_id, connection, up)),
        )
        .await;

        let mut report = HealthCheckReport::default();
        for (server_id, outcome) in outcomes {
            match outcome {
                HealthOutcome::Healthy => report.healthy.push(server_id),
                HealthOutcome::Reconnected => report.reconnected.push(server_id),
                HealthOutcome::Failed => report.failed.push(server_id),
                HealthOutcome::Lost => report.lost.push(server_id),
            }
        }
        debug!(
            healthy = report.healthy.len(),
            reconnected = report.reconnected.len(),
            failed = report.failed.len(),
            lost = report.lost.len(),
            "health check complete"
        );
        Some(report)
    }

    async fn check_one(
        &self,
        server_id: ServerId,
        connection: Arc<dyn ServerConnection>,
        up: bool,
    ) -> (ServerId, HealthOutcome) {
        if !up {
            let outcome = match self.get_client(&server_id).await {
                Ok(_) => HealthOutcome::Reconnected,
                Err(err) => {
                    debug!(server_id = %server_id, error = %err, "reconnect failed");
                    HealthOutcome::Failed
                }
            };
            return (server_id, outcome);
        }

        let limit = self.inner.timeout_for(OperationClass::HealthCheck, &server_id);
        match bounded(
            &server_id,
            OperationClass::HealthCheck,
            limit,
            connection.list_tools(),
        )
        .await
        {
            Ok(tools) => {
                self.store_if_changed(&server_id, tools);
                (server_id, HealthOutcome::Healthy)
            }
            Err(err) => {
                warn!(server_id = %server_id, error = %err, "liveness probe failed");
                self.inner.mark_unhealthy(&server_id, &connection);
                if let Err(teardown) = bounded(
                    &server_id,
                    OperationClass::HealthCheck,
                    limit,
                    connection.disconnect(),
                )
                .await
                {
                    debug!(server_id = %server_id, error = %teardown, "teardown after probe failed");
                }
                self.inner
                    .set_status(&server_id, ServerStatus::Disconnected);
                (server_id, HealthOutcome::Lost)
            }
        }
    }

    fn store_if_changed(&self, server_id: &ServerId, tools: Vec<ToolDefinition>) {
        let registry = &self.inner.registry;
        let unchanged = registry
            .get(server_id)
            .ok()
            .flatten()
            .is_some_and(|state| state.tools() == Some(tools.as_slice()));
        if !unchanged {
            note_registry_write(server_id, registry.set_tools(server_id, tools));
        }
    }

    /// Stops health checks, disconnects everything and detaches from the
    /// registry.
    pub async fn shutdown(&self) {
        self.stop_health_checks();
        self.disconnect_all().await;
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = subscription {
            handle.unsubscribe();
        }
    }
}

fn auto_disconnect_target(event: &RegistryEvent) -> Option<ServerId> {
    match event {
        RegistryEvent::ServerRemoved { server_id } => Some(server_id.clone()),
        RegistryEvent::ServerUpdated {
            server_id,
            previous,
            config,
        } if !config.enabled() || previous.transport() != config.transport() => {
            Some(server_id.clone())
        }
        _ => None,
    }
}

async fn bounded<T, F>(
    server_id: &ServerId,
    operation: OperationClass,
    limit: Duration,
    future: F,
) -> ConnectionManagerResult<T>
where
    F: Future<Output = ServerConnectionResult<T>>,
{
    match timeout(limit, future).await {
        Ok(result) => result.map_err(|source| ConnectionManagerError::Connection {
            server_id: server_id.clone(),
            source,
        }),
        Err(_) => Err(ConnectionManagerError::Timeout {
            server_id: server_id.clone(),
            operation,
            timeout: limit,
        }),
    }
}

fn spawn_teardown(server_id: &ServerId, connection: Arc<dyn ServerConnection>, limit: Duration) {
    let task_id = server_id.clone();
    tokio::spawn(async move {
        if let Err(err) = bounded(
            &task_id,
            OperationClass::Connect,
            limit,
            connection.disconnect(),
        )
        .await
        {
            debug!(server_id = %task_id, error = %err, "teardown of abandoned connection failed");
        }
    });
}

fn note_registry_write(server_id: &ServerId, result: Result<(), ServerRegistryError>) {
    if let Err(err) = result {
        debug!(server_id = %server_id, error = %err, "registry update skipped");
    }
}

fn outcome_from_payload(payload: Value) -> ToolCallOutcome {
    let is_error = payload
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    match payload {
        Value::Object(mut fields) if fields.contains_key("content") => ToolCallOutcome {
            content: fields.remove("content").unwrap_or(Value::Null),
            is_error,
        },
        other => ToolCallOutcome::success(other),
    }
}
