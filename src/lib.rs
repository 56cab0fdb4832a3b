//! Toolscope: relevance-based tool selection across many tool servers.
//!
//! A host application that talks to dozens of tool-providing servers cannot
//! hand every tool to a language model on every turn. This crate keeps track
//! of those servers, their connections and their cached tool catalogues, and
//! picks the handful of tools most relevant to a given prompt.
//!
//! # Architecture
//!
//! Toolscope follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports
//!
//! # Modules
//!
//! - [`selection`]: Keyword extraction, domain inference, scoring and ranking
//! - [`server_registry`]: Server registry, events and connection lifecycle
//! - [`config`]: Declarative configuration document

pub mod config;
pub mod selection;
pub mod server_registry;
