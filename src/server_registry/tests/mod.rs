//! Unit tests for the registry and connection manager services.
