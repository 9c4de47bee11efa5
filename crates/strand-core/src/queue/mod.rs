//! Queue module: per-group ordering, dedup, redrive, and the in-memory implementation.

mod dedup;
mod group;
mod memory;
mod record;
mod redrive;
mod state;

pub use dedup::DedupIndex;
pub use group::{GroupCursor, GroupTable};
pub use memory::InMemoryQueue;
pub use record::TaskRecord;
pub use redrive::{RedeliveryPosition, RedriveDecision, RedrivePolicy};
pub use state::MessageState;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DedupKey, GroupId, TaskId, TaskMessage};
use crate::error::StrandError;
use crate::observability::QueueCounts;

/// Queue port (interface).
///
/// Submission and processing paths depend on this trait, not on
/// [`InMemoryQueue`] directly.
///
/// Invariants every implementation keeps:
/// - within a group, messages are leased in submission order, one at a time
/// - a failed or expired lease goes through the redrive policy
/// - argument errors never mutate state
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue a message at the tail of its group.
    ///
    /// Without a `dedup_key` the payload digest is used. A key still inside
    /// its retention window returns the original id instead.
    async fn submit(
        &self,
        group_id: GroupId,
        dedup_key: Option<DedupKey>,
        payload: Vec<u8>,
    ) -> Result<TaskId, StrandError>;

    /// Lease up to `max_batch` messages, at most one per group.
    /// Returns immediately; empty when nothing is eligible.
    async fn lease(&self, max_batch: usize) -> Result<Vec<TaskMessage>, StrandError>;

    /// Processing succeeded. The message is removed.
    async fn ack(&self, task_id: TaskId) -> Result<(), StrandError>;

    /// Processing failed (queue decides redeliver/dead-letter).
    async fn fail(&self, task_id: TaskId) -> Result<(), StrandError>;

    /// Push the lease expiry forward by `extra`. Returns the new expiry.
    async fn extend_lease(
        &self,
        task_id: TaskId,
        extra: Duration,
    ) -> Result<DateTime<Utc>, StrandError>;

    /// Resolves when new work may be leasable. Spurious wake-ups are allowed.
    ///
    /// Work that became leasable after the caller's last empty `lease` and
    /// before this call must not be missed.
    async fn wait_for_work(&self);

    /// Observability hook.
    async fn counts_by_state(&self) -> Result<QueueCounts, StrandError>;
}
