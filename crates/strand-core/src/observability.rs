use serde::{Deserialize, Serialize};

/// Snapshot of what the queue currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub leased: usize,
    /// Groups with at least one pending or leased message.
    pub groups: usize,
    pub groups_in_flight: usize,
    /// Groups whose head message can be leased right now.
    pub groups_ready: usize,
    pub dedup_entries: usize,
}

impl QueueCounts {
    /// Nothing pending and nothing leased.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.leased == 0
    }
}

/// Running totals of emitted [`QueueEvent`](crate::domain::QueueEvent)s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub submitted: u64,
    pub deduplicated: u64,
    pub leased: u64,
    pub acked: u64,
    pub lease_extended: u64,
    pub lease_expired: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
}
