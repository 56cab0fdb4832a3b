//! Server configuration: identity, connection recipe and selection hints.

use super::{
    HttpTransportConfig, LocalTransportConfig, ServerConfigError, ServerId, ServerTransport,
    StdioTransportConfig, TransportKind,
};
use crate::selection::ServerDomain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Validated configuration of one tool-providing server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    id: ServerId,
    transport: ServerTransport,
    domain: Option<ServerDomain>,
    tags: Vec<String>,
    enabled: bool,
    timeout: Option<Duration>,
}

impl ServerConfig {
    /// Creates an enabled configuration without domain, tags or timeout.
    #[must_use]
    pub const fn new(id: ServerId, transport: ServerTransport) -> Self {
        Self {
            id,
            transport,
            domain: None,
            tags: Vec::new(),
            enabled: true,
            timeout: None,
        }
    }

    /// Validates a loose config-document record into a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerConfigError`] when the id is invalid, the transport is
    /// unknown, a transport-required field is missing, a field from another
    /// transport is populated, or the domain is unknown.
    pub fn from_input(id: &str, input: &ServerInput) -> Result<Self, ServerConfigError> {
        let server_id = ServerId::new(id)?;
        let transport = input.transport()?;
        let domain = input
            .domain
            .as_deref()
            .map(|raw| {
                ServerDomain::try_from(raw)
                    .map_err(|_| ServerConfigError::UnknownDomain(raw.to_owned()))
            })
            .transpose()?;

        let mut config = Self::new(server_id, transport)
            .with_tags(input.tags.iter().cloned())
            .with_enabled(input.enabled.unwrap_or(true));
        if let Some(server_domain) = domain {
            config = config.with_domain(server_domain);
        }
        if let Some(timeout_ms) = input.timeout_ms {
            config = config.with_timeout(Duration::from_millis(timeout_ms));
        }
        Ok(config)
    }

    /// Sets the semantic domain.
    #[must_use]
    pub const fn with_domain(mut self, domain: ServerDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Replaces the tags. Blank tags are dropped.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags
            .into_iter()
            .map(|tag| tag.trim().to_owned())
            .filter(|tag| !tag.is_empty())
            .collect();
        self
    }

    /// Enables or disables the server.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the per-server timeout override.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the server identifier.
    #[must_use]
    pub const fn id(&self) -> &ServerId {
        &self.id
    }

    /// Returns the connection recipe.
    #[must_use]
    pub const fn transport(&self) -> &ServerTransport {
        &self.transport
    }

    /// Returns the declared semantic domain.
    #[must_use]
    pub const fn domain(&self) -> Option<ServerDomain> {
        self.domain
    }

    /// Returns free-form tags used for keyword matching.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns whether the server takes part in connection and selection.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the per-server timeout override.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns a copy with `patch` merged in. The id is never overwritten.
    #[must_use]
    pub fn merged(&self, patch: &ServerConfigPatch) -> Self {
        Self {
            id: self.id.clone(),
            transport: patch
                .transport
                .clone()
                .unwrap_or_else(|| self.transport.clone()),
            domain: patch.domain.unwrap_or(self.domain),
            tags: patch.tags.clone().unwrap_or_else(|| self.tags.clone()),
            enabled: patch.enabled.unwrap_or(self.enabled),
            timeout: patch.timeout.unwrap_or(self.timeout),
        }
    }
}

/// Partial update for an existing configuration.
///
/// `None` leaves a field untouched. Optional fields use a nested option so a
/// patch can clear them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfigPatch {
    transport: Option<ServerTransport>,
    domain: Option<Option<ServerDomain>>,
    tags: Option<Vec<String>>,
    enabled: Option<bool>,
    timeout: Option<Option<Duration>>,
}

impl ServerConfigPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a patch that replaces every field except the id.
    #[must_use]
    pub fn replace_with(config: &ServerConfig) -> Self {
        Self {
            transport: Some(config.transport.clone()),
            domain: Some(config.domain),
            tags: Some(config.tags.clone()),
            enabled: Some(config.enabled),
            timeout: Some(config.timeout),
        }
    }

    /// Replaces the transport.
    #[must_use]
    pub fn transport(mut self, transport: ServerTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces or clears the domain.
    #[must_use]
    pub const fn domain(mut self, domain: Option<ServerDomain>) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Replaces the tags.
    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = Some(tags.into_iter().collect());
        self
    }

    /// Enables or disables the server.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Replaces or clears the timeout override.
    #[must_use]
    pub const fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Loose server record as it appears in a config document.
///
/// Validation into a [`ServerConfig`] happens in
/// [`ServerConfig::from_input`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInput {
    /// Transport name: `stdio`, `http` or `local`.
    pub transport: String,
    /// STDIO: executable to spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// STDIO: command-line arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// STDIO: environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// STDIO: working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// HTTP: endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// HTTP: request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Local: logical module name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Local: export inside the module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<String>,
    /// Semantic domain name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Whether the server is enabled; defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Per-server timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ServerInput {
    fn transport(&self) -> Result<ServerTransport, ServerConfigError> {
        let kind = TransportKind::try_from(self.transport.as_str())?;
        self.reject_foreign_fields(kind)?;

        match kind {
            TransportKind::Stdio => {
                let mut stdio = StdioTransportConfig::new(required(
                    kind,
                    "command",
                    self.command.as_deref(),
                )?)?
                .with_args(self.args.iter().cloned())
                .with_env(self.env.clone());
                if let Some(cwd) = &self.cwd {
                    stdio = stdio.with_cwd(cwd.as_str());
                }
                Ok(ServerTransport::Stdio(stdio))
            }
            TransportKind::Http => {
                let http =
                    HttpTransportConfig::new(required(kind, "url", self.url.as_deref())?)?
                        .with_headers(self.headers.clone());
                Ok(ServerTransport::Http(http))
            }
            TransportKind::Local => {
                let mut local =
                    LocalTransportConfig::new(required(kind, "module", self.module.as_deref())?)?;
                if let Some(export) = &self.export {
                    local = local.with_export(export.as_str());
                }
                Ok(ServerTransport::Local(local))
            }
        }
    }

    fn reject_foreign_fields(&self, kind: TransportKind) -> Result<(), ServerConfigError> {
        let populated: [(&'static str, TransportKind, bool); 8] = [
            ("command", TransportKind::Stdio, self.command.is_some()),
            ("args", TransportKind::Stdio, !self.args.is_empty()),
            ("env", TransportKind::Stdio, !self.env.is_empty()),
            ("cwd", TransportKind::Stdio, self.cwd.is_some()),
            ("url", TransportKind::Http, self.url.is_some()),
            ("headers", TransportKind::Http, !self.headers.is_empty()),
            ("module", TransportKind::Local, self.module.is_some()),
            ("export", TransportKind::Local, self.export.is_some()),
        ];

        match populated
            .into_iter()
            .find(|(_, owner, present)| *present && *owner != kind)
        {
            Some((field, _, _)) => Err(ServerConfigError::ConflictingField {
                transport: kind.as_str(),
                field,
            }),
            None => Ok(()),
        }
    }
}

fn required<'a>(
    kind: TransportKind,
    field: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, ServerConfigError> {
    value
        .filter(|candidate| !candidate.trim().is_empty())
        .ok_or(ServerConfigError::MissingField {
            transport: kind.as_str(),
            field,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stdio_input() -> ServerInput {
        ServerInput {
            transport: "stdio".to_owned(),
            command: Some("npx".to_owned()),
            args: vec!["-y".to_owned(), "@modelcontextprotocol/server-filesystem".to_owned()],
            domain: Some("files".to_owned()),
            tags: vec!["disk".to_owned(), "  ".to_owned()],
            ..ServerInput::default()
        }
    }

    #[test]
    fn stdio_input_is_validated() {
        let config = ServerConfig::from_input("fs", &stdio_input()).expect("valid input");

        assert_eq!(config.id().as_str(), "fs");
        assert_eq!(config.domain(), Some(ServerDomain::Files));
        assert_eq!(config.tags(), ["disk".to_owned()]);
        assert!(config.enabled());
        assert_eq!(config.transport().kind(), TransportKind::Stdio);
    }

    #[rstest]
    #[case("stdio", "command")]
    #[case("http", "url")]
    #[case("local", "module")]
    fn missing_transport_field_is_rejected(
        #[case] transport: &str,
        #[case] field: &'static str,
    ) {
        let input = ServerInput {
            transport: transport.to_owned(),
            ..ServerInput::default()
        };

        let result = ServerConfig::from_input("broken", &input);

        assert!(matches!(
            result,
            Err(ServerConfigError::MissingField { field: missing, .. }) if missing == field
        ));
    }

    #[test]
    fn foreign_transport_field_is_rejected() {
        let input = ServerInput {
            url: Some("https://example.com".to_owned()),
            ..stdio_input()
        };

        assert_eq!(
            ServerConfig::from_input("fs", &input),
            Err(ServerConfigError::ConflictingField {
                transport: "stdio",
                field: "url",
            })
        );
    }

    #[test]
    fn unknown_domain_is_rejected() {
        let input = ServerInput {
            domain: Some("gardening".to_owned()),
            ..stdio_input()
        };

        assert_eq!(
            ServerConfig::from_input("fs", &input),
            Err(ServerConfigError::UnknownDomain("gardening".to_owned()))
        );
    }

    #[test]
    fn input_parses_from_camel_case_json() {
        let input: ServerInput = serde_json::from_value(serde_json::json!({
            "transport": "http",
            "url": "https://tools.example.com/mcp",
            "timeoutMs": 2500,
            "enabled": false
        }))
        .expect("valid json");

        let config = ServerConfig::from_input("remote", &input).expect("valid input");

        assert!(!config.enabled());
        assert_eq!(config.timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn merge_never_overwrites_id() {
        let config = ServerConfig::from_input("fs", &stdio_input()).expect("valid input");
        let patch = ServerConfigPatch::new()
            .enabled(false)
            .domain(None)
            .tags(["local".to_owned()]);

        let merged = config.merged(&patch);

        assert_eq!(merged.id(), config.id());
        assert!(!merged.enabled());
        assert_eq!(merged.domain(), None);
        assert_eq!(merged.tags(), ["local".to_owned()]);
        assert_eq!(merged.transport(), config.transport());
    }
}
