//! Player identity.
//!
//! The identity is the stable account id (typically a Steam id) that keys a
//! save record. It is sent once, in the connect URL, and again in every load
//! request.
//!
//! Accepted characters are ASCII alphanumerics plus `-`, `_` and `.`, so the
//! value can be placed in a query string without escaping. `0` is the
//! "no account" sentinel some platforms hand out and is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated player identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlayerId(String);

impl PlayerId {
    /// The identity as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the identity is a plain numeric account id.
    pub fn is_numeric(&self) -> bool {
        self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PlayerId {
    type Err = PlayerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PlayerIdError::Empty);
        }
        if s.bytes().all(|b| b == b'0') {
            return Err(PlayerIdError::Zero);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(PlayerIdError::InvalidChar(c));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for PlayerId {
    type Error = PlayerIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PlayerId> for String {
    fn from(id: PlayerId) -> Self {
        id.0
    }
}

impl AsRef<str> for PlayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Error parsing a player identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerIdError {
    #[error("player identity cannot be empty")]
    Empty,
    #[error("player identity cannot be zero")]
    Zero,
    #[error("player identity contains invalid character {0:?}")]
    InvalidChar(char),
}
