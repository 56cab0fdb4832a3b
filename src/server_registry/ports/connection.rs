//! Connection port for talking to a single tool-providing server.

use crate::server_registry::domain::{
    PromptDefinition, ResourceDefinition, ServerConfig, ServerConfigError, ServerId,
    ToolDefinition, TransportKind,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for server connection operations.
pub type ServerConnectionResult<T> = Result<T, ServerConnectionError>;

/// Live connection to one server.
///
/// Implementations own the wire protocol. The `is_connected` flag reflects
/// actual transport state rather than desired state.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    /// Establishes the connection.
    async fn connect(&self) -> ServerConnectionResult<()>;

    /// Tears the connection down.
    async fn disconnect(&self) -> ServerConnectionResult<()>;

    /// Returns whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Lists tools exposed by the server.
    async fn list_tools(&self) -> ServerConnectionResult<Vec<ToolDefinition>>;

    /// Lists prompt templates exposed by the server.
    async fn list_prompts(&self) -> ServerConnectionResult<Vec<PromptDefinition>>;

    /// Lists resources exposed by the server.
    async fn list_resources(&self) -> ServerConnectionResult<Vec<ResourceDefinition>>;

    /// Invokes a tool and returns its raw result payload.
    ///
    /// `timeout` is a hint for transports that enforce deadlines remotely.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> ServerConnectionResult<Value>;

    /// Renders a prompt template.
    async fn get_prompt(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> ServerConnectionResult<Value>;

    /// Reads a resource by URI.
    async fn read_resource(&self, uri: &str) -> ServerConnectionResult<Value>;
}

/// Creates connection objects from server configuration.
pub trait ConnectionFactory: Send + Sync {
    /// Builds an unconnected connection for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerConnectionError`] when the transport is unsupported or
    /// the configuration is rejected.
    fn create(&self, config: &ServerConfig) -> ServerConnectionResult<Arc<dyn ServerConnection>>;
}

/// Errors returned by server connection adapters.
#[derive(Debug, Clone, Error)]
pub enum ServerConnectionError {
    /// The connection could not be established.
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    /// An operation was attempted on a closed connection.
    #[error("connection is not open")]
    NotConnected,

    /// A request to the server failed.
    #[error("{operation} failed: {reason}")]
    RequestFailed {
        /// Operation name.
        operation: &'static str,
        /// Failure description.
        reason: String,
    },

    /// The server does not offer the requested capability.
    #[error("server does not support {0}")]
    Unsupported(&'static str),

    /// No adapter is available for the transport.
    #[error("unsupported transport {kind} for server {server_id}")]
    UnsupportedTransport {
        /// Server identifier.
        server_id: ServerId,
        /// Transport discriminant.
        kind: TransportKind,
    },

    /// The configuration was rejected before connecting.
    #[error(transparent)]
    Config(#[from] ServerConfigError),

    /// Generic runtime failure.
    #[error("connection runtime error: {0}")]
    Runtime(Arc<dyn std::error::Error + Send + Sync>),
}

impl ServerConnectionError {
    /// Wraps a runtime error from a connection adapter.
    pub fn runtime(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Runtime(Arc::new(err))
    }

    /// Creates a request failure for `operation`.
    pub fn request_failed(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::RequestFailed {
            operation,
            reason: reason.into(),
        }
    }
}
