//! Validated identifier type for tool-providing servers.

use super::ServerConfigError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Maximum length for a server identifier.
const MAX_SERVER_ID_LENGTH: usize = 100;

/// Unique, immutable identifier of a registered server.
///
/// Identifiers come from the keys of the declarative config document, so
/// they are free-form strings rather than generated UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerId(String);

impl ServerId {
    /// Creates a validated server identifier.
    ///
    /// The input is trimmed. Empty identifiers, identifiers containing
    /// whitespace or control characters, and identifiers longer than 100
    /// characters are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ServerConfigError`] when validation fails.
    pub fn new(value: impl Into<String>) -> Result<Self, ServerConfigError> {
        let normalized = value.into().trim().to_owned();

        if normalized.is_empty() {
            return Err(ServerConfigError::EmptyServerId);
        }

        if normalized
            .chars()
            .any(|character| character.is_whitespace() || character.is_control())
        {
            return Err(ServerConfigError::InvalidServerId(normalized));
        }

        if normalized.chars().count() > MAX_SERVER_ID_LENGTH {
            return Err(ServerConfigError::ServerIdTooLong(normalized));
        }

        Ok(Self(normalized))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServerId {
    type Error = ServerConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServerId> for String {
    fn from(value: ServerId) -> Self {
        value.0
    }
}

impl AsRef<str> for ServerId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for ServerId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
