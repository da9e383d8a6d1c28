//! User and connection identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque user key taken from an authenticated context
///
/// Construction trims surrounding whitespace and rejects empty values, so a
/// `UserIdentity` always routes somewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Build an identity, returning `None` for blank input
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-unique connection label exposed to clients (`"{user}-{n}"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Generates connection ids from a monotonically increasing counter
///
/// One generator lives inside each gateway, so ids are unique for that
/// gateway's lifetime and test instances do not share a sequence.
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    counter: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for `user`; the first id handed out ends in `-1`
    pub fn next_for(&self, user: &UserIdentity) -> ConnectionId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        ConnectionId(format!("{}-{}", user, n))
    }
}
