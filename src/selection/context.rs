//! Query context and options for a selection request.

use super::ServerDomain;
use serde::{Deserialize, Serialize};

/// Default cap on the number of selected tools.
pub const DEFAULT_MAX_TOOLS: usize = 10;

/// Default minimum score a tool needs to be selected.
pub const DEFAULT_MIN_SCORE: f64 = 0.1;

/// Natural-language request plus explicit domain steering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionContext {
    prompt: String,
    #[serde(default)]
    current_file: Option<String>,
    #[serde(default)]
    user_intent: Option<String>,
    #[serde(default)]
    include_domains: Vec<ServerDomain>,
    #[serde(default)]
    exclude_domains: Vec<ServerDomain>,
}

impl SelectionContext {
    /// Creates a context for `prompt`.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Sets the file the user is working on.
    #[must_use]
    pub fn with_current_file(mut self, current_file: impl Into<String>) -> Self {
        self.current_file = Some(current_file.into());
        self
    }

    /// Sets a short statement of what the user is trying to do.
    #[must_use]
    pub fn with_user_intent(mut self, user_intent: impl Into<String>) -> Self {
        self.user_intent = Some(user_intent.into());
        self
    }

    /// Boosts tools from servers in these domains.
    #[must_use]
    pub fn with_include_domains(mut self, domains: impl IntoIterator<Item = ServerDomain>) -> Self {
        self.include_domains = domains.into_iter().collect();
        self
    }

    /// Vetoes tools from servers in these domains.
    #[must_use]
    pub fn with_exclude_domains(mut self, domains: impl IntoIterator<Item = ServerDomain>) -> Self {
        self.exclude_domains = domains.into_iter().collect();
        self
    }

    /// Returns the prompt text.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Returns the current file, if any.
    #[must_use]
    pub fn current_file(&self) -> Option<&str> {
        self.current_file.as_deref()
    }

    /// Returns the user intent, if any.
    #[must_use]
    pub fn user_intent(&self) -> Option<&str> {
        self.user_intent.as_deref()
    }

    /// Returns the boosted domains.
    #[must_use]
    pub fn include_domains(&self) -> &[ServerDomain] {
        &self.include_domains
    }

    /// Returns the vetoed domains.
    #[must_use]
    pub fn exclude_domains(&self) -> &[ServerDomain] {
        &self.exclude_domains
    }
}

/// Truncation and threshold settings for a selection request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionOptions {
    /// Maximum number of tools returned.
    pub max_tools: usize,
    /// Minimum score a tool needs to be returned.
    pub min_score: f64,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            max_tools: DEFAULT_MAX_TOOLS,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl SelectionOptions {
    /// Overrides the tool cap.
    #[must_use]
    pub const fn with_max_tools(mut self, max_tools: usize) -> Self {
        self.max_tools = max_tools;
        self
    }

    /// Overrides the score threshold.
    #[must_use]
    pub const fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}
