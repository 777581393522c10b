//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of plain strings and integers
//! (e.g., passing a security key where an entity id is expected) and make
//! the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An observation timestamp: seconds since the Unix epoch.
///
/// Every record carries exactly one of these under its `dateTime` field,
/// and it is the sole ordering key within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Returns the raw epoch-seconds value.
    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// The current wall-clock time.
    ///
    /// Used as the backfill reconciliation sentinel when the remote cannot
    /// be queried: a "latest remote timestamp" of now makes the computed
    /// gap empty.
    pub fn now() -> Self {
        Timestamp(chrono::Utc::now().timestamp())
    }

    /// Renders the timestamp as RFC 3339 for log messages.
    ///
    /// Falls back to the raw integer if the value is outside chrono's
    /// representable range.
    pub fn to_rfc3339(&self) -> String {
        match chrono::DateTime::from_timestamp(self.0, 0) {
            Some(dt) => dt.to_rfc3339(),
            None => self.0.to_string(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Timestamp(secs)
    }
}

/// The remote endpoint's identifier for one entity (table) records are
/// posted into. Each stream syncs to its own entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(s: impl Into<String>) -> Self {
        EntityId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

/// The static shared secret sent alongside updates for an entity.
///
/// The `Debug` impl redacts the value so keys cannot leak through error
/// chains or structured logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityKey(pub String);

impl SecurityKey {
    pub fn new(s: impl Into<String>) -> Self {
        SecurityKey(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecurityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecurityKey(<redacted>)")
    }
}

impl From<&str> for SecurityKey {
    fn from(s: &str) -> Self {
        SecurityKey(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ordering_follows_epoch_seconds() {
        assert!(Timestamp(10) < Timestamp(20));
        assert_eq!(Timestamp(30), Timestamp(30));
    }

    #[test]
    fn timestamp_renders_rfc3339() {
        let ts = Timestamp(0);
        assert_eq!(ts.to_rfc3339(), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn security_key_debug_is_redacted() {
        let key = SecurityKey::new("s3cret");
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("redacted"));
    }
}
