//! Task messages and dead-letter records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::TaskId;

/// Reason recorded when the redrive policy gives up on a message.
pub const MAX_RECEIVE_COUNT_EXCEEDED: &str = "max receive count exceeded";

/// Ordering partition key. Messages sharing a group are delivered one at a
/// time, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Fingerprint used by the dedup window.
///
/// Either supplied by the caller or derived from the payload with
/// [`DedupKey::from_content`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Content-based key: lowercase hex SHA-256 of the payload.
    pub fn from_content(payload: &[u8]) -> Self {
        let digest = Sha256::digest(payload);
        Self(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DedupKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A submitted task as seen by workers.
///
/// `payload` is opaque to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: TaskId,
    pub group_id: GroupId,
    pub dedup_key: DedupKey,
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,

    /// Number of leases granted so far, including the current one.
    pub receive_count: u32,

    /// Set while leased.
    pub lease_expiry: Option<DateTime<Utc>>,
}

impl TaskMessage {
    pub fn new(
        id: TaskId,
        group_id: GroupId,
        dedup_key: DedupKey,
        payload: Vec<u8>,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            dedup_key,
            payload,
            enqueued_at,
            receive_count: 0,
            lease_expiry: None,
        }
    }
}

/// A message that exhausted its receive budget, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub message: TaskMessage,
    pub reason: String,
    pub moved_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(message: TaskMessage, reason: impl Into<String>, moved_at: DateTime<Utc>) -> Self {
        Self {
            message,
            reason: reason.into(),
            moved_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_is_sha256_hex() {
        let key = DedupKey::from_content(b"abc");
        assert_eq!(
            key.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn content_key_differs_per_payload() {
        assert_ne!(DedupKey::from_content(b"a"), DedupKey::from_content(b"b"));
        assert_eq!(DedupKey::from_content(b"a"), DedupKey::from_content(b"a"));
    }

    #[test]
    fn new_message_is_unleased() {
        let msg = TaskMessage::new(
            TaskId::from_ulid(ulid::Ulid::new()),
            GroupId::new("g1"),
            DedupKey::new("k"),
            b"payload".to_vec(),
            Utc::now(),
        );
        assert_eq!(msg.receive_count, 0);
        assert!(msg.lease_expiry.is_none());
    }
}
