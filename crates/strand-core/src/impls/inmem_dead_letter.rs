//! InMemoryDeadLetterStore - 開発用の dead-letter store
//!
//! Records carry a sequence number so that a listing cursor stays correct
//! while retention purges drop old records from the front.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::DeadLetterRecord;
use crate::error::StrandError;
use crate::ports::{DeadLetterStore, DeadLetters};

struct Entry {
    seq: u64,
    record: DeadLetterRecord,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<Entry>,
    next_seq: u64,
}

#[derive(Clone, Default)]
pub struct InMemoryDeadLetterStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Walks the store one record at a time, re-reading under the lock on every
/// step. Bounded by the sequence number current at creation.
struct Cursor {
    inner: Arc<RwLock<Inner>>,
    next_seq: u64,
    end_seq: u64,
}

impl Iterator for Cursor {
    type Item = DeadLetterRecord;

    fn next(&mut self) -> Option<DeadLetterRecord> {
        if self.next_seq >= self.end_seq {
            return None;
        }
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let idx = inner.entries.partition_point(|e| e.seq < self.next_seq);
        let entry = inner.entries.get(idx).filter(|e| e.seq < self.end_seq);
        match entry {
            Some(entry) => {
                self.next_seq = entry.seq + 1;
                Some(entry.record.clone())
            }
            None => {
                self.next_seq = self.end_seq;
                None
            }
        }
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn put(&self, record: DeadLetterRecord) -> Result<(), StrandError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(Entry { seq, record });
        Ok(())
    }

    fn list(&self) -> DeadLetters {
        let end_seq = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .next_seq;
        Box::new(Cursor {
            inner: Arc::clone(&self.inner),
            next_seq: 0,
            end_seq,
        })
    }

    fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StrandError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.entries.len();
        inner.entries.retain(|e| e.record.moved_at >= cutoff);
        Ok(before - inner.entries.len())
    }
}
