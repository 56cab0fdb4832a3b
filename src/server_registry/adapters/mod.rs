//! Adapter implementations for server connections.

mod local;
pub mod memory;
mod routing;

pub use local::{LocalModuleRegistry, LocalServerConnection, LocalTool};
pub use memory::{InMemoryConnectionFactory, InMemoryServerConnection};
pub use routing::TransportRouter;
