//! Change events published by the server registry.

use crate::server_registry::domain::{ServerConfig, ServerId};

/// Registry change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A server was registered.
    ServerAdded {
        /// Server identifier.
        server_id: ServerId,
        /// Registered configuration.
        config: ServerConfig,
    },
    /// A server was removed.
    ServerRemoved {
        /// Server identifier.
        server_id: ServerId,
    },
    /// A server configuration changed.
    ServerUpdated {
        /// Server identifier.
        server_id: ServerId,
        /// Configuration before the update.
        previous: ServerConfig,
        /// Configuration after the update.
        config: ServerConfig,
    },
    /// A server transitioned into `connected`.
    ServerConnected {
        /// Server identifier.
        server_id: ServerId,
    },
    /// A server transitioned out of `connected`.
    ServerDisconnected {
        /// Server identifier.
        server_id: ServerId,
    },
    /// A server status was set to `error`.
    ServerError {
        /// Server identifier.
        server_id: ServerId,
        /// Failure description.
        message: String,
    },
    /// A server's cached tool list was replaced.
    ToolsChanged {
        /// Server identifier.
        server_id: ServerId,
        /// Number of tools now cached.
        tool_count: usize,
    },
}

impl RegistryEvent {
    /// Returns the event name, for example `server:added`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ServerAdded { .. } => "server:added",
            Self::ServerRemoved { .. } => "server:removed",
            Self::ServerUpdated { .. } => "server:updated",
            Self::ServerConnected { .. } => "server:connected",
            Self::ServerDisconnected { .. } => "server:disconnected",
            Self::ServerError { .. } => "server:error",
            Self::ToolsChanged { .. } => "tools:changed",
        }
    }

    /// Returns the server the event concerns.
    #[must_use]
    pub const fn server_id(&self) -> &ServerId {
        match self {
            Self::ServerAdded { server_id, .. }
            | Self::ServerRemoved { server_id }
            | Self::ServerUpdated { server_id, .. }
            | Self::ServerConnected { server_id }
            | Self::ServerDisconnected { server_id }
            | Self::ServerError { server_id, .. }
            | Self::ToolsChanged { server_id, .. } => server_id,
        }
    }
}
