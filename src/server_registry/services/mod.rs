//! Application services for server bookkeeping and connection lifecycle.

mod connection_manager;
mod events;
mod registry;

pub use connection_manager::{
    ConnectionManager, ConnectionManagerError, ConnectionManagerResult, ConnectionSettings,
    HealthCheckReport, OperationClass,
};
pub use events::RegistryEvent;
pub use registry::{
    ReconcileReport, ServerRegistry, ServerRegistryError, ServerRegistryResult, Subscription,
};
