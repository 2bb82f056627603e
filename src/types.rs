//! Core types shared across the client.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Document fields, keyed by field name.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Identifier of the owning database instance.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque token issued by the remote service for one active subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerHandle(pub i64);

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a read may be served from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReadPolicy {
    /// Ask the server, fall back to the local cache when offline.
    #[default]
    ServerAndCache,
    /// Only the server; fails when it cannot be reached.
    ServerOnly,
    /// Only the local cache, without a round trip.
    CacheOnly,
}

impl ReadPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadPolicy::ServerAndCache => "server-and-cache",
            ReadPolicy::ServerOnly => "server-only",
            ReadPolicy::CacheOnly => "cache-only",
        }
    }
}

/// Options for `set`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetOptions {
    /// Merge into existing fields instead of replacing the document.
    pub merge: bool,
}

impl SetOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// Metadata accompanying every snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Local writes not yet acknowledged by the backend.
    #[serde(rename = "pendingWrites")]
    pub has_pending_writes: bool,

    /// Served from the local cache rather than the backend.
    #[serde(rename = "fromCache")]
    pub is_from_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_policy_wire_names() {
        assert_eq!(ReadPolicy::default(), ReadPolicy::ServerAndCache);
        for policy in [
            ReadPolicy::ServerAndCache,
            ReadPolicy::ServerOnly,
            ReadPolicy::CacheOnly,
        ] {
            let encoded = serde_json::to_value(policy).unwrap();
            assert_eq!(encoded, serde_json::Value::String(policy.as_str().into()));
        }
    }

    #[test]
    fn test_metadata_field_names() {
        let metadata: SnapshotMetadata =
            serde_json::from_str(r#"{"pendingWrites": true, "fromCache": false}"#).unwrap();
        assert!(metadata.has_pending_writes);
        assert!(!metadata.is_from_cache);
    }
}
