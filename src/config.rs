//! Declarative configuration document.
//!
//! A single JSON document describes the servers to register plus optional
//! selection and connection settings:
//!
//! ```json
//! {
//!   "servers": {
//!     "fs": { "transport": "stdio", "command": "npx", "args": ["fs-server"], "domain": "files" },
//!     "gh": { "transport": "http", "url": "https://example.com/mcp", "domain": "vcs" }
//!   },
//!   "selection": { "maxTools": 5, "minScore": 0.2, "cache": { "ttlMs": 60000 } },
//!   "connection": { "connectTimeoutMs": 10000, "healthChecksEnabled": false }
//! }
//! ```
//!
//! Server entries stay loose here; each one is validated when the registry
//! applies the document.

use crate::selection::{
    DEFAULT_CACHE_MAX_SIZE, DEFAULT_CACHE_TTL, DEFAULT_MAX_TOOLS, DEFAULT_MIN_SCORE, QueryCache,
    ScoringWeights, SelectionOptions, ToolSelector,
};
use crate::server_registry::{domain::ServerInput, services::ConnectionSettings};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that was requested.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON for the expected shape.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A scoring weight is negative or not finite.
    #[error("invalid scoring weight {field}: {value}")]
    InvalidWeight {
        /// Config name of the offending weight.
        field: &'static str,
        /// Value that was supplied.
        value: f64,
    },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Server records keyed by server id.
    pub servers: BTreeMap<String, ServerInput>,
    /// Tool selection settings.
    pub selection: SelectionSettings,
    /// Connection timeouts and health-check cadence.
    pub connection: ConnectionSettings,
}

impl OrchestratorConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document is malformed and
    /// [`ConfigError::InvalidWeight`] when a scoring weight is negative or
    /// not finite.
    pub fn from_json_str(document: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(document)?;
        if let Some((field, value)) = config.selection.weights.invalid_weight() {
            return Err(ConfigError::InvalidWeight { field, value });
        }
        Ok(config)
    }

    /// Reads and parses the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file is unreadable, otherwise
    /// the errors of [`Self::from_json_str`].
    pub fn load(path: &Utf8Path) -> ConfigResult<Self> {
        Self::from_json_str(&read_document(path)?)
    }
}

/// Selection defaults, cache sizing and scoring weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionSettings {
    /// Maximum number of tools returned per query.
    pub max_tools: usize,
    /// Minimum score a tool needs to be returned.
    pub min_score: f64,
    /// Query cache settings.
    pub cache: CacheSettings,
    /// Scoring weights.
    pub weights: ScoringWeights,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            max_tools: DEFAULT_MAX_TOOLS,
            min_score: DEFAULT_MIN_SCORE,
            cache: CacheSettings::default(),
            weights: ScoringWeights::default(),
        }
    }
}

impl SelectionSettings {
    /// Returns the default per-query options.
    #[must_use]
    pub const fn options(&self) -> SelectionOptions {
        SelectionOptions {
            max_tools: self.max_tools,
            min_score: self.min_score,
        }
    }

    /// Builds a selector, attaching a cache when enabled.
    #[must_use]
    pub fn selector(&self) -> ToolSelector {
        let selector = ToolSelector::new(self.weights, self.options());
        if self.cache.enabled {
            selector.with_cache(QueryCache::new(self.cache.max_size, self.cache.ttl))
        } else {
            selector
        }
    }
}

/// Query cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Whether selection results are cached.
    pub enabled: bool,
    /// Maximum number of cached queries.
    pub max_size: usize,
    /// Lifetime of a cached entry.
    #[serde(rename = "ttlMs", with = "duration_ms")]
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_CACHE_MAX_SIZE,
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Reads a UTF-8 file through a capability handle on its parent directory.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] when the directory or file cannot be read.
pub fn read_document(path: &Utf8Path) -> ConfigResult<String> {
    let read_error = |source: std::io::Error| ConfigError::Read {
        path: path.to_owned(),
        source,
    };
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        read_error(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no file name",
        ))
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(read_error)?;
    dir.read_to_string(file_name).map_err(read_error)
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes `value` as milliseconds, saturating at `u64::MAX`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserializes milliseconds into a [`Duration`].
    ///
    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
