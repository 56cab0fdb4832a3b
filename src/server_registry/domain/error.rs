//! Error types for server configuration validation.

use thiserror::Error;

/// Errors returned while constructing server registry domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServerConfigError {
    /// The server id is empty after trimming.
    #[error("server id must not be empty")]
    EmptyServerId,

    /// The server id exceeds the length limit.
    #[error("server id exceeds 100 character limit: {0}")]
    ServerIdTooLong(String),

    /// The server id contains whitespace or control characters.
    #[error("server id '{0}' contains whitespace or control characters")]
    InvalidServerId(String),

    /// A field required by the selected transport is absent or blank.
    #[error("{transport} transport requires field '{field}'")]
    MissingField {
        /// Transport kind in canonical string form.
        transport: &'static str,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A field belonging to a different transport is populated.
    #[error("{transport} transport does not accept field '{field}'")]
    ConflictingField {
        /// Transport kind in canonical string form.
        transport: &'static str,
        /// Name of the unexpected field.
        field: &'static str,
    },

    /// The transport name is not one of `stdio`, `http` or `local`.
    #[error("unknown transport '{0}' (expected stdio, http or local)")]
    UnknownTransport(String),

    /// The domain name is not part of the closed domain enumeration.
    #[error("unknown server domain '{0}'")]
    UnknownDomain(String),

    /// The HTTP URL does not have an `http://` or `https://` prefix.
    #[error("HTTP URL '{0}' must start with 'http://' or 'https://'")]
    InvalidHttpUrl(String),

    /// A tool name is empty after trimming.
    #[error("tool name must not be empty")]
    EmptyToolName,

    /// The command is not on the spawn policy's allow-list.
    #[error("command '{0}' is not allowed by the spawn policy")]
    CommandNotAllowed(String),

    /// An argument contains shell metacharacters.
    #[error("argument '{0}' contains shell metacharacters")]
    UnsafeArgument(String),
}
