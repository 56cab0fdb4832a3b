//! Transport recipes describing how to reach a server.

use super::ServerConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Transport discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawned local process speaking over STDIO.
    Stdio,
    /// Remote server reached over HTTP.
    Http,
    /// In-process module.
    Local,
}

impl TransportKind {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TransportKind {
    type Error = ServerConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "local" => Ok(Self::Local),
            _ => Err(ServerConfigError::UnknownTransport(value.to_owned())),
        }
    }
}

/// Settings for a server spawned as a local process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioTransportConfig {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<String>,
}

impl StdioTransportConfig {
    /// Creates a new STDIO transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerConfigError::MissingField`] when `command` is empty
    /// after trimming.
    pub fn new(command: impl Into<String>) -> Result<Self, ServerConfigError> {
        let normalized_command = command.into().trim().to_owned();
        if normalized_command.is_empty() {
            return Err(ServerConfigError::MissingField {
                transport: TransportKind::Stdio.as_str(),
                field: "command",
            });
        }

        Ok(Self {
            command: normalized_command,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        })
    }

    /// Replaces command-line arguments.
    #[must_use]
    pub fn with_args(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.args = values.into_iter().collect();
        self
    }

    /// Replaces process environment variables.
    #[must_use]
    pub fn with_env(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = values.into_iter().collect();
        self
    }

    /// Sets the working directory. Blank values clear it.
    #[must_use]
    pub fn with_cwd(mut self, value: impl Into<String>) -> Self {
        let normalized = value.into().trim().to_owned();
        self.cwd = (!normalized.is_empty()).then_some(normalized);
        self
    }

    /// Returns the executable command.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns environment variables.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns the optional working directory.
    #[must_use]
    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }
}

/// Settings for a server reached over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    url: String,
    headers: BTreeMap<String, String>,
}

impl HttpTransportConfig {
    /// Creates a new HTTP transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerConfigError`] when `url` is empty or does not start
    /// with `http://` or `https://`.
    pub fn new(url: impl Into<String>) -> Result<Self, ServerConfigError> {
        let normalized_url = url.into().trim().to_owned();
        if normalized_url.is_empty() {
            return Err(ServerConfigError::MissingField {
                transport: TransportKind::Http.as_str(),
                field: "url",
            });
        }

        let has_valid_prefix =
            normalized_url.starts_with("http://") || normalized_url.starts_with("https://");
        if !has_valid_prefix {
            return Err(ServerConfigError::InvalidHttpUrl(normalized_url));
        }

        Ok(Self {
            url: normalized_url,
            headers: BTreeMap::new(),
        })
    }

    /// Replaces request headers.
    #[must_use]
    pub fn with_headers(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers = values.into_iter().collect();
        self
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns request headers.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

/// Settings for an in-process module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTransportConfig {
    module: String,
    export: Option<String>,
}

impl LocalTransportConfig {
    /// Creates a new local module configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerConfigError::MissingField`] when `module` is empty
    /// after trimming.
    pub fn new(module: impl Into<String>) -> Result<Self, ServerConfigError> {
        let normalized_module = module.into().trim().to_owned();
        if normalized_module.is_empty() {
            return Err(ServerConfigError::MissingField {
                transport: TransportKind::Local.as_str(),
                field: "module",
            });
        }

        Ok(Self {
            module: normalized_module,
            export: None,
        })
    }

    /// Selects a named export inside the module. Blank values clear it.
    #[must_use]
    pub fn with_export(mut self, export: impl Into<String>) -> Self {
        let normalized = export.into().trim().to_owned();
        self.export = (!normalized.is_empty()).then_some(normalized);
        self
    }

    /// Returns the logical module name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Returns the optional export name.
    #[must_use]
    pub fn export(&self) -> Option<&str> {
        self.export.as_deref()
    }
}

/// Connection recipe; exactly one transport-specific group is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "config")]
pub enum ServerTransport {
    /// Local process over STDIO.
    Stdio(StdioTransportConfig),
    /// Remote server over HTTP.
    Http(HttpTransportConfig),
    /// In-process module.
    Local(LocalTransportConfig),
}

impl ServerTransport {
    /// Creates a `stdio` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`StdioTransportConfig::new`].
    pub fn stdio(command: impl Into<String>) -> Result<Self, ServerConfigError> {
        Ok(Self::Stdio(StdioTransportConfig::new(command)?))
    }

    /// Creates an `http` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`HttpTransportConfig::new`].
    pub fn http(url: impl Into<String>) -> Result<Self, ServerConfigError> {
        Ok(Self::Http(HttpTransportConfig::new(url)?))
    }

    /// Creates a `local` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`LocalTransportConfig::new`].
    pub fn local(module: impl Into<String>) -> Result<Self, ServerConfigError> {
        Ok(Self::Local(LocalTransportConfig::new(module)?))
    }

    /// Returns the transport discriminant.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Http(_) => TransportKind::Http,
            Self::Local(_) => TransportKind::Local,
        }
    }
}
