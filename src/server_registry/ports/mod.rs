//! Port contracts for server connections.

mod connection;

pub use connection::{
    ConnectionFactory, ServerConnection, ServerConnectionError, ServerConnectionResult,
};
