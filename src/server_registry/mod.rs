//! Tool-providing server bookkeeping and connection lifecycle.
//!
//! This module keeps the configuration and runtime state of every server the
//! host knows about, and owns the live connections used to list and call
//! their tools. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
