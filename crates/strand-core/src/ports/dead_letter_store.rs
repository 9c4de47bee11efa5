//! DeadLetterStore port - terminal holding area for poison messages.
//!
//! The store is append-only from the queue's point of view. It may live in
//! separate storage with weaker consistency than the queue itself: moving a
//! message here is a one-way transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::DeadLetterRecord;
use crate::error::StrandError;

/// Lazy, finite sequence of dead letters.
///
/// It covers the records present when [`DeadLetterStore::list`] was called;
/// call `list` again to restart.
pub type DeadLetters = Box<dyn Iterator<Item = DeadLetterRecord> + Send>;

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn put(&self, record: DeadLetterRecord) -> Result<(), StrandError>;

    fn list(&self) -> DeadLetters;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop records moved before `cutoff`. Returns how many were dropped.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StrandError>;
}
