//! Domain model for tool-providing servers.
//!
//! The domain covers server identity, transport recipes, validated
//! configuration, runtime status with derived metadata, the capability
//! catalogue fetched from a server, and the spawn policy applied to local
//! processes. Connection mechanics remain outside this boundary.

mod catalog;
mod config;
mod error;
mod ids;
mod policy;
mod state;
mod transport;

pub use catalog::{
    PromptArgument, PromptDefinition, ResourceDefinition, ToolCallOutcome, ToolDefinition,
};
pub use config::{ServerConfig, ServerConfigPatch, ServerInput};
pub use error::ServerConfigError;
pub use ids::ServerId;
pub use policy::{SpawnPolicy, sanitize_env};
pub use state::{ServerMetadata, ServerState, ServerStatus};
pub use transport::{
    HttpTransportConfig, LocalTransportConfig, ServerTransport, StdioTransportConfig,
    TransportKind,
};
