//! Connection factory dispatching on the configured transport.

use super::LocalModuleRegistry;
use crate::server_registry::{
    domain::{ServerConfig, ServerConfigPatch, ServerTransport, SpawnPolicy},
    ports::{ConnectionFactory, ServerConnection, ServerConnectionError, ServerConnectionResult},
};
use std::sync::Arc;

/// Routes connection creation to a per-transport factory.
///
/// `local` servers resolve through the module registry. `stdio` servers are
/// checked against the spawn policy, and their environment is sanitised,
/// before the STDIO factory sees them. A transport without a factory is
/// reported as unsupported.
#[derive(Clone, Default)]
pub struct TransportRouter {
    local_modules: LocalModuleRegistry,
    spawn_policy: SpawnPolicy,
    stdio: Option<Arc<dyn ConnectionFactory>>,
    http: Option<Arc<dyn ConnectionFactory>>,
}

impl TransportRouter {
    /// Creates a router serving only local modules.
    #[must_use]
    pub fn new(local_modules: LocalModuleRegistry) -> Self {
        Self {
            local_modules,
            ..Self::default()
        }
    }

    /// Replaces the spawn policy applied to STDIO servers.
    #[must_use]
    pub fn with_spawn_policy(mut self, spawn_policy: SpawnPolicy) -> Self {
        self.spawn_policy = spawn_policy;
        self
    }

    /// Sets the factory for STDIO servers.
    #[must_use]
    pub fn with_stdio_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.stdio = Some(factory);
        self
    }

    /// Sets the factory for HTTP servers.
    #[must_use]
    pub fn with_http_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.http = Some(factory);
        self
    }

    /// Returns the spawn policy.
    #[must_use]
    pub const fn spawn_policy(&self) -> &SpawnPolicy {
        &self.spawn_policy
    }

    /// Returns the spawn policy for modification.
    pub const fn spawn_policy_mut(&mut self) -> &mut SpawnPolicy {
        &mut self.spawn_policy
    }

    fn unsupported(config: &ServerConfig) -> ServerConnectionError {
        ServerConnectionError::UnsupportedTransport {
            server_id: config.id().clone(),
            kind: config.transport().kind(),
        }
    }
}

impl ConnectionFactory for TransportRouter {
    fn create(&self, config: &ServerConfig) -> ServerConnectionResult<Arc<dyn ServerConnection>> {
        match config.transport() {
            ServerTransport::Local(local) => {
                let connection: Arc<dyn ServerConnection> =
                    Arc::new(self.local_modules.connection(local.clone()));
                Ok(connection)
            }
            ServerTransport::Stdio(stdio) => {
                let factory = self.stdio.as_ref().ok_or_else(|| Self::unsupported(config))?;
                let checked = self.spawn_policy.check(stdio)?;
                let sanitised = config.merged(
                    &ServerConfigPatch::new().transport(ServerTransport::Stdio(checked)),
                );
                factory.create(&sanitised)
            }
            ServerTransport::Http(_) => self
                .http
                .as_ref()
                .ok_or_else(|| Self::unsupported(config))?
                .create(config),
        }
    }
}
