//! Runtime state tracked for each registered server.

use super::{PromptDefinition, ResourceDefinition, ServerConfig, ToolDefinition};
use crate::selection::{ServerDomain, infer_domains, tool_keywords};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Connection status of a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum ServerStatus {
    /// No live connection.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// A live connection exists.
    Connected,
    /// The last connection attempt or probe failed.
    Error(String),
}

impl ServerStatus {
    /// Returns the canonical status name without the error message.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error(_) => "error",
        }
    }

    /// Returns whether the status is `connected`.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns whether the status is `error`.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns the error message when the status is `error`.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            Self::Disconnected | Self::Connecting | Self::Connected => None,
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(message) => write!(formatter, "error: {message}"),
            Self::Disconnected | Self::Connecting | Self::Connected => {
                formatter.write_str(self.as_str())
            }
        }
    }
}

/// Summary derived from a server's config and most recent tool list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    tool_count: usize,
    domains: Vec<ServerDomain>,
    tags: Vec<String>,
    tool_names: Vec<String>,
    last_refreshed: DateTime<Utc>,
}

impl ServerMetadata {
    /// Creates metadata for a server that has no tools yet.
    #[must_use]
    pub fn empty(config: &ServerConfig, clock: &impl Clock) -> Self {
        Self::derive(config, &[], clock)
    }

    /// Recomputes metadata from `tools`.
    ///
    /// Domains are the declared domain followed by domains inferred from tool
    /// names, titles and descriptions, without duplicates.
    #[must_use]
    pub fn derive(config: &ServerConfig, tools: &[ToolDefinition], clock: &impl Clock) -> Self {
        let keywords: Vec<String> = tools.iter().flat_map(tool_keywords).collect();

        let mut domains: Vec<ServerDomain> = config.domain().into_iter().collect();
        for inferred in infer_domains(&keywords) {
            if !domains.contains(&inferred) {
                domains.push(inferred);
            }
        }

        let tags: BTreeSet<String> = config
            .tags()
            .iter()
            .map(|tag| tag.to_lowercase())
            .collect();

        Self {
            tool_count: tools.len(),
            domains,
            tags: tags.into_iter().collect(),
            tool_names: tools.iter().map(|tool| tool.name().to_owned()).collect(),
            last_refreshed: clock.utc(),
        }
    }

    /// Returns the number of cached tools.
    #[must_use]
    pub const fn tool_count(&self) -> usize {
        self.tool_count
    }

    /// Returns the declared and inferred domains.
    #[must_use]
    pub fn domains(&self) -> &[ServerDomain] {
        &self.domains
    }

    /// Returns distinct lowercase tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns tool names in fetch order.
    #[must_use]
    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    /// Returns when the metadata was last recomputed.
    #[must_use]
    pub const fn last_refreshed(&self) -> DateTime<Utc> {
        self.last_refreshed
    }
}

/// Runtime view of one registered server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    config: ServerConfig,
    status: ServerStatus,
    metadata: ServerMetadata,
    tools: Option<Vec<ToolDefinition>>,
    prompts: Option<Vec<PromptDefinition>>,
    resources: Option<Vec<ResourceDefinition>>,
}

impl ServerState {
    /// Creates a disconnected state with no cached catalogue.
    #[must_use]
    pub fn new(config: ServerConfig, clock: &impl Clock) -> Self {
        let metadata = ServerMetadata::empty(&config, clock);
        Self {
            config,
            status: ServerStatus::Disconnected,
            metadata,
            tools: None,
            prompts: None,
            resources: None,
        }
    }

    /// Returns the current configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the connection status.
    #[must_use]
    pub const fn status(&self) -> &ServerStatus {
        &self.status
    }

    /// Returns the derived metadata.
    #[must_use]
    pub const fn metadata(&self) -> &ServerMetadata {
        &self.metadata
    }

    /// Returns cached tools, absent until the first successful fetch.
    #[must_use]
    pub fn tools(&self) -> Option<&[ToolDefinition]> {
        self.tools.as_deref()
    }

    /// Returns cached prompts, absent until the first successful fetch.
    #[must_use]
    pub fn prompts(&self) -> Option<&[PromptDefinition]> {
        self.prompts.as_deref()
    }

    /// Returns cached resources, absent until the first successful fetch.
    #[must_use]
    pub fn resources(&self) -> Option<&[ResourceDefinition]> {
        self.resources.as_deref()
    }

    /// Returns whether the server takes part in selection.
    #[must_use]
    pub const fn is_selectable(&self) -> bool {
        self.config.enabled() && !self.status.is_error()
    }

    pub(crate) fn replace_config(&mut self, config: ServerConfig, clock: &impl Clock) {
        self.config = config;
        self.metadata =
            ServerMetadata::derive(&self.config, self.tools.as_deref().unwrap_or_default(), clock);
    }

    pub(crate) fn replace_tools(&mut self, tools: Vec<ToolDefinition>, clock: &impl Clock) {
        self.metadata = ServerMetadata::derive(&self.config, &tools, clock);
        self.tools = Some(tools);
    }

    pub(crate) fn replace_prompts(&mut self, prompts: Vec<PromptDefinition>) {
        self.prompts = Some(prompts);
    }

    pub(crate) fn replace_resources(&mut self, resources: Vec<ResourceDefinition>) {
        self.resources = Some(resources);
    }

    /// Swaps in `status` and returns the previous one.
    pub(crate) fn replace_status(&mut self, status: ServerStatus) -> ServerStatus {
        std::mem::replace(&mut self.status, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_registry::domain::{ServerId, ServerTransport};
    use mockable::DefaultClock;
    use serde_json::json;

    fn config() -> ServerConfig {
        ServerConfig::new(
            ServerId::new("fs").expect("valid id"),
            ServerTransport::local("filesystem").expect("valid transport"),
        )
        .with_tags(["Disk".to_owned(), "disk".to_owned(), "local".to_owned()])
    }

    #[test]
    fn new_state_is_disconnected_without_catalogue() {
        let state = ServerState::new(config(), &DefaultClock);

        assert_eq!(state.status(), &ServerStatus::Disconnected);
        assert!(state.tools().is_none());
        assert_eq!(state.metadata().tool_count(), 0);
        assert_eq!(state.metadata().tags(), ["disk".to_owned(), "local".to_owned()]);
    }

    #[test]
    fn replacing_tools_recomputes_metadata() {
        let mut state = ServerState::new(config(), &DefaultClock);
        let tool = ToolDefinition::new("read_file", json!({}))
            .expect("valid tool")
            .with_description("Read a file from the filesystem");

        state.replace_tools(vec![tool], &DefaultClock);

        assert_eq!(state.metadata().tool_count(), 1);
        assert_eq!(state.metadata().tool_names(), ["read_file".to_owned()]);
        assert!(state.metadata().domains().contains(&ServerDomain::Files));
    }

    #[test]
    fn declared_domain_leads_metadata_domains() {
        let declared = config().with_domain(ServerDomain::Vcs);
        let mut state = ServerState::new(declared, &DefaultClock);
        let tool = ToolDefinition::new("read_file", json!({})).expect("valid tool");

        state.replace_tools(vec![tool], &DefaultClock);

        assert_eq!(state.metadata().domains().first(), Some(&ServerDomain::Vcs));
    }

    #[test]
    fn error_status_exposes_message() {
        let status = ServerStatus::Error("connect timed out".to_owned());

        assert_eq!(status.error_message(), Some("connect timed out"));
        assert_eq!(status.to_string(), "error: connect timed out");
    }
}
