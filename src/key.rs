use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{RateLimitError, Result};

/// Maximum accepted length for a raw client identifier.
pub const MAX_CLIENT_ID_LEN: usize = 255;

/// A validated client identifier.
///
/// Raw identifiers (IP addresses, API keys, user ids) come from untrusted
/// input and end up embedded in storage keys, so an unconstrained value could
/// be crafted to collide with another scope's key namespace. Construction
/// rejects anything outside `[A-Za-z0-9._-]`, empty input, and input longer
/// than [`MAX_CLIENT_ID_LEN`] — rejection is always explicit, never a silent
/// truncation or substitution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Validate a raw identifier.
    pub fn new(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(RateLimitError::InvalidClientId(
                "identifier must not be empty".to_string(),
            ));
        }

        if raw.len() > MAX_CLIENT_ID_LEN {
            return Err(RateLimitError::InvalidClientId(format!(
                "identifier exceeds {} characters",
                MAX_CLIENT_ID_LEN
            )));
        }

        if let Some(c) = raw.chars().find(|c| !is_allowed_char(*c)) {
            return Err(RateLimitError::InvalidClientId(format!(
                "identifier contains forbidden character {:?}",
                c
            )));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ClientId {
    type Error = RateLimitError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Build the storage key for a (scope, client) pair: `prefix + scope + ":" + id`.
pub fn storage_key(prefix: &str, scope: &str, client: &ClientId) -> String {
    format!("{}{}:{}", prefix, scope, client.as_str())
}
