//! Dedup index: collapses resubmissions inside a retention window.
//!
//! Best effort only. Entries are evicted lazily on lookup and by the reaper's
//! periodic sweep, and they outlive the message they point to: a payload
//! resubmitted after its original was acked still maps to the original id
//! until the window closes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::{DedupKey, TaskId};

#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    task_id: TaskId,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DedupIndex {
    retention: chrono::Duration,
    entries: HashMap<DedupKey, DedupEntry>,
}

impl DedupIndex {
    pub fn new(retention: chrono::Duration) -> Self {
        Self {
            retention,
            entries: HashMap::new(),
        }
    }

    fn is_live(&self, entry: &DedupEntry, now: DateTime<Utc>) -> bool {
        now - entry.recorded_at < self.retention
    }

    /// The id recorded for `key`, if still inside the window.
    pub fn lookup(&mut self, key: &DedupKey, now: DateTime<Utc>) -> Option<TaskId> {
        let entry = *self.entries.get(key)?;
        if self.is_live(&entry, now) {
            Some(entry.task_id)
        } else {
            self.entries.remove(key);
            None
        }
    }

    pub fn seen(&mut self, key: &DedupKey, now: DateTime<Utc>) -> bool {
        self.lookup(key, now).is_some()
    }

    pub fn record(&mut self, key: DedupKey, task_id: TaskId, recorded_at: DateTime<Utc>) {
        self.entries.insert(
            key,
            DedupEntry {
                task_id,
                recorded_at,
            },
        );
    }

    /// Drop every entry whose window has closed. Returns how many were dropped.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.retention;
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.recorded_at < retention);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
