//! In-memory queue implementation.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::{
    DedupIndex, GroupTable, MessageState, Queue, RedeliveryPosition, RedriveDecision,
    RedrivePolicy, TaskRecord,
};
use crate::config::QueueConfig;
use crate::domain::{DeadLetterRecord, DedupKey, GroupId, QueueEvent, TaskId, TaskMessage};
use crate::error::StrandError;
use crate::impls::{InMemoryDeadLetterStore, NoopEventSink};
use crate::observability::QueueCounts;
use crate::ports::{Clock, DeadLetterStore, EventSink, IdGenerator, SystemClock, UlidGenerator};

/// Lease deadline entry for the expiry heap.
///
/// We use reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct LeaseDeadline {
    expiry: DateTime<Utc>,
    task_id: TaskId,
}

impl PartialOrd for LeaseDeadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LeaseDeadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .expiry
            .cmp(&self.expiry)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

/// In-memory queue state. Guarded by one mutex: every mutation is serialized.
struct QueueState {
    /// Pending and leased messages (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// Per-group FIFO + in-flight slot.
    groups: GroupTable,

    dedup: DedupIndex,

    /// Lease deadlines. Entries made stale by ack, redelivery or extension
    /// stay in the heap and are skipped when popped.
    deadlines: BinaryHeap<LeaseDeadline>,
}

impl QueueState {
    fn ensure_leased(&self, task_id: TaskId) -> Result<(), StrandError> {
        match self.records.get(&task_id) {
            None => Err(StrandError::UnknownTask(task_id)),
            Some(record) if !record.state.is_leased() => Err(StrandError::NotLeased(task_id)),
            Some(_) => Ok(()),
        }
    }

    /// Pop every deadline at or before `now` that still belongs to a live lease.
    ///
    /// Each task appears at most once, even when several heap entries share
    /// its current expiry.
    fn pop_expired(&mut self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut expired = Vec::new();
        let mut seen = HashSet::new();
        while let Some(entry) = self.deadlines.peek() {
            if entry.expiry > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.deadlines.pop() else {
                break;
            };
            let live = self.records.get(&entry.task_id).is_some_and(|record| {
                record.is_lease_expired(now) && record.message.lease_expiry == Some(entry.expiry)
            });
            if live && seen.insert(entry.task_id) {
                expired.push(entry.task_id);
            }
        }
        expired
    }

    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            groups: self.groups.len(),
            groups_in_flight: self.groups.in_flight_count(),
            groups_ready: self.groups.ready_count(),
            dedup_entries: self.dedup.len(),
            ..QueueCounts::default()
        };
        for record in self.records.values() {
            match record.state {
                MessageState::Pending => counts.pending += 1,
                MessageState::Leased => counts.leased += 1,
                MessageState::Acknowledged | MessageState::DeadLettered => {}
            }
        }
        counts
    }
}

/// In-memory queue implementation.
///
/// One instance is shared (behind an `Arc`) by the submission path, the
/// worker pool and the reaper loop.
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: chrono::Duration,
    max_lease_batch_size: usize,
    redrive_policy: RedrivePolicy,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
    dead_letters: Arc<dyn DeadLetterStore>,
    events: Arc<dyn EventSink>,
}

impl InMemoryQueue {
    pub fn new(
        config: &QueueConfig,
        clock: Arc<dyn Clock>,
        dead_letters: Arc<dyn DeadLetterStore>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, StrandError> {
        config.validate()?;
        let visibility_timeout = to_delta("visibility_timeout_secs", config.visibility_timeout())?;
        let dedup_retention = to_delta("dedup_retention_secs", config.dedup_retention())?;

        Ok(Self {
            state: Mutex::new(QueueState {
                records: HashMap::new(),
                groups: GroupTable::new(),
                dedup: DedupIndex::new(dedup_retention),
                deadlines: BinaryHeap::new(),
            }),
            notify: Notify::new(),
            visibility_timeout,
            max_lease_batch_size: config.max_lease_batch_size,
            redrive_policy: RedrivePolicy::new(
                config.max_receive_count,
                config.redelivery_position,
            ),
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            dead_letters,
            events,
        })
    }

    /// System clock, in-memory dead-letter store, no event sink.
    pub fn with_defaults(config: &QueueConfig) -> Result<Self, StrandError> {
        Self::new(
            config,
            Arc::new(SystemClock::new()),
            Arc::new(InMemoryDeadLetterStore::new()),
            Arc::new(NoopEventSink),
        )
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterStore> {
        &self.dead_letters
    }

    /// Current record for a pending or leased task.
    pub async fn record(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.state.lock().await.records.get(&task_id).cloned()
    }

    /// Treat every lease past its expiry as an implicit `fail`.
    ///
    /// Returns how many leases expired.
    pub async fn sweep_expired_leases(&self) -> usize {
        let now = self.clock.now();
        let mut events = Vec::new();
        let mut became_ready = false;

        let mut guard = self.state.lock().await;
        let expired = guard.pop_expired(now);
        for &task_id in &expired {
            if let Some(record) = guard.records.get(&task_id) {
                warn!(
                    task_id = %task_id,
                    group_id = %record.message.group_id,
                    receive_count = record.message.receive_count,
                    "lease expired"
                );
                events.push(QueueEvent::LeaseExpired {
                    task_id,
                    group_id: record.message.group_id.clone(),
                    receive_count: record.message.receive_count,
                });
            }
            became_ready |= self.route_failure(&mut guard, task_id, now, &mut events).await;
        }
        drop(guard);

        self.publish(events, became_ready);
        expired.len()
    }

    /// Drop dedup entries whose window has closed.
    pub async fn evict_expired_dedup(&self) -> usize {
        let now = self.clock.now();
        self.state.lock().await.dedup.evict_expired(now)
    }

    /// Operator action: put a dead-lettered message back at the tail of its
    /// group with the same id and a fresh receive budget.
    ///
    /// Never called by the queue itself.
    pub async fn requeue_dead_letter(
        &self,
        record: DeadLetterRecord,
    ) -> Result<TaskId, StrandError> {
        let DeadLetterRecord {
            mut message,
            reason,
            ..
        } = record;
        let task_id = message.id;
        let group_id = message.group_id.clone();
        message.receive_count = 0;
        message.lease_expiry = None;

        let mut guard = self.state.lock().await;
        if guard.records.contains_key(&task_id) {
            return Err(StrandError::AlreadyQueued(task_id));
        }
        let mut record = TaskRecord::new(message);
        record.updated_at = self.clock.now();
        guard.records.insert(task_id, record);
        let became_ready = guard.groups.enqueue(&group_id, task_id);
        drop(guard);

        info!(
            task_id = %task_id,
            group_id = %group_id,
            previous_reason = %reason,
            "dead letter requeued"
        );
        self.publish(
            vec![QueueEvent::Submitted { task_id, group_id }],
            became_ready,
        );
        Ok(task_id)
    }

    /// Apply the redrive policy to a leased task that failed or expired.
    ///
    /// Returns `true` when the task's group became leasable.
    async fn route_failure(
        &self,
        state: &mut QueueState,
        task_id: TaskId,
        now: DateTime<Utc>,
        events: &mut Vec<QueueEvent>,
    ) -> bool {
        let Some(record) = state.records.get_mut(&task_id) else {
            return false;
        };
        if !record.state.is_leased() {
            return false;
        }
        let group_id = record.message.group_id.clone();
        let receive_count = record.message.receive_count;

        match self.redrive_policy.decide(receive_count) {
            RedriveDecision::Redeliver(position) => {
                record.release(now);
                debug!(
                    task_id = %task_id,
                    group_id = %group_id,
                    receive_count,
                    ?position,
                    "task redelivered"
                );
                events.push(QueueEvent::Redelivered {
                    task_id,
                    group_id: group_id.clone(),
                    receive_count,
                });
                state.groups.finish(&group_id, task_id, Some(position))
            }
            RedriveDecision::DeadLetter { reason } => {
                let Some(mut record) = state.records.remove(&task_id) else {
                    return false;
                };
                record.mark_dead_lettered(now);
                let dead_letter = DeadLetterRecord::new(record.message.clone(), reason, now);

                if let Err(err) = self.dead_letters.put(dead_letter).await {
                    // Keep the message rather than lose it; the next failure retries the move.
                    error!(
                        task_id = %task_id,
                        group_id = %group_id,
                        error = %err,
                        "failed to store dead letter"
                    );
                    record.release(now);
                    state.records.insert(task_id, record);
                    events.push(QueueEvent::Redelivered {
                        task_id,
                        group_id: group_id.clone(),
                        receive_count,
                    });
                    return state
                        .groups
                        .finish(&group_id, task_id, Some(RedeliveryPosition::Head));
                }

                warn!(
                    task_id = %task_id,
                    group_id = %group_id,
                    receive_count,
                    reason,
                    "task moved to dead-letter store"
                );
                events.push(QueueEvent::DeadLettered {
                    task_id,
                    group_id: group_id.clone(),
                    receive_count,
                    reason: reason.to_string(),
                });
                state.groups.finish(&group_id, task_id, None)
            }
        }
    }

    /// Emit events and wake idle workers. Called after the lock is released.
    fn publish(&self, events: Vec<QueueEvent>, became_ready: bool) {
        for event in &events {
            self.events.emit(event);
        }
        if became_ready {
            // Wake everyone already waiting, and leave a permit for a worker
            // that is between a lease attempt and `wait_for_work`.
            self.notify.notify_waiters();
            self.notify.notify_one();
        }
    }
}

fn to_delta(name: &str, duration: Duration) -> Result<chrono::Duration, StrandError> {
    chrono::Duration::from_std(duration)
        .map_err(|_| StrandError::InvalidConfig(format!("{name} is out of range")))
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn submit(
        &self,
        group_id: GroupId,
        dedup_key: Option<DedupKey>,
        payload: Vec<u8>,
    ) -> Result<TaskId, StrandError> {
        if group_id.is_empty() {
            return Err(StrandError::EmptyGroupId);
        }
        if payload.is_empty() {
            return Err(StrandError::EmptyPayload);
        }
        let dedup_key = match dedup_key {
            Some(key) if key.is_empty() => return Err(StrandError::EmptyDedupKey),
            Some(key) => key,
            None => DedupKey::from_content(&payload),
        };

        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if let Some(existing) = state.dedup.lookup(&dedup_key, now) {
            drop(state);
            debug!(
                task_id = %existing,
                group_id = %group_id,
                dedup_key = %dedup_key,
                "duplicate submission collapsed"
            );
            self.publish(
                vec![QueueEvent::Deduplicated {
                    task_id: existing,
                    group_id,
                }],
                false,
            );
            return Ok(existing);
        }

        let task_id = self.ids.generate_task_id();
        let message = TaskMessage::new(task_id, group_id.clone(), dedup_key.clone(), payload, now);
        state.records.insert(task_id, TaskRecord::new(message));
        let became_ready = state.groups.enqueue(&group_id, task_id);
        state.dedup.record(dedup_key, task_id, now);
        drop(state);

        info!(task_id = %task_id, group_id = %group_id, "task submitted");
        self.publish(
            vec![QueueEvent::Submitted { task_id, group_id }],
            became_ready,
        );
        Ok(task_id)
    }

    async fn lease(&self, max_batch: usize) -> Result<Vec<TaskMessage>, StrandError> {
        let limit = max_batch.min(self.max_lease_batch_size);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let expiry = now + self.visibility_timeout;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut leased = Vec::new();
        for (group_id, task_id) in state.groups.take_ready(limit) {
            let Some(record) = state.records.get_mut(&task_id) else {
                error!(
                    task_id = %task_id,
                    group_id = %group_id,
                    "group cursor points at a missing record"
                );
                state.groups.finish(&group_id, task_id, None);
                continue;
            };
            record.start_lease(now, expiry);
            state.deadlines.push(LeaseDeadline { expiry, task_id });
            leased.push(record.message.clone());
        }
        drop(guard);

        let events = leased
            .iter()
            .map(|message| {
                debug!(
                    task_id = %message.id,
                    group_id = %message.group_id,
                    receive_count = message.receive_count,
                    "task leased"
                );
                QueueEvent::Leased {
                    task_id: message.id,
                    group_id: message.group_id.clone(),
                    receive_count: message.receive_count,
                }
            })
            .collect();
        self.publish(events, false);
        Ok(leased)
    }

    async fn ack(&self, task_id: TaskId) -> Result<(), StrandError> {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.ensure_leased(task_id)?;

        let Some(mut record) = state.records.remove(&task_id) else {
            return Err(StrandError::UnknownTask(task_id));
        };
        record.mark_acknowledged(now);
        let group_id = record.message.group_id;
        let became_ready = state.groups.finish(&group_id, task_id, None);
        drop(guard);

        debug!(task_id = %task_id, group_id = %group_id, "task acknowledged");
        self.publish(
            vec![QueueEvent::Acked { task_id, group_id }],
            became_ready,
        );
        Ok(())
    }

    async fn fail(&self, task_id: TaskId) -> Result<(), StrandError> {
        let now = self.clock.now();
        let mut events = Vec::new();

        let mut guard = self.state.lock().await;
        guard.ensure_leased(task_id)?;
        debug!(task_id = %task_id, "task failed by worker");
        let became_ready = self.route_failure(&mut guard, task_id, now, &mut events).await;
        drop(guard);

        self.publish(events, became_ready);
        Ok(())
    }

    async fn extend_lease(
        &self,
        task_id: TaskId,
        extra: Duration,
    ) -> Result<DateTime<Utc>, StrandError> {
        let extra_delta =
            chrono::Duration::from_std(extra).map_err(|_| StrandError::ExtensionOutOfRange(extra))?;
        let now = self.clock.now();

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.ensure_leased(task_id)?;
        let Some(record) = state.records.get_mut(&task_id) else {
            return Err(StrandError::UnknownTask(task_id));
        };
        let previous = record.message.lease_expiry;
        let expiry = record
            .extend_lease(extra_delta, now)
            .ok_or(StrandError::ExtensionOutOfRange(extra))?;
        // The heap already holds an entry for an unchanged expiry.
        if previous != Some(expiry) {
            state.deadlines.push(LeaseDeadline { expiry, task_id });
        }
        drop(guard);

        debug!(task_id = %task_id, %expiry, "lease extended");
        self.publish(
            vec![QueueEvent::LeaseExtended {
                task_id,
                lease_expiry: expiry,
            }],
            false,
        );
        Ok(expiry)
    }

    async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    async fn counts_by_state(&self) -> Result<QueueCounts, StrandError> {
        let state = self.state.lock().await;
        Ok(state.counts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::RecordingEventSink;
    use crate::ports::ManualClock;
    use chrono::TimeZone;

    struct Harness {
        queue: Arc<InMemoryQueue>,
        clock: Arc<ManualClock>,
        dead_letters: Arc<InMemoryDeadLetterStore>,
        events: Arc<RecordingEventSink>,
    }

    fn harness(config: QueueConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let queue = InMemoryQueue::new(
            &config,
            clock.clone(),
            dead_letters.clone(),
            events.clone(),
        )
        .unwrap();
        Harness {
            queue: Arc::new(queue),
            clock,
            dead_letters,
            events,
        }
    }

    fn config(visibility_secs: u64, max_receive_count: u32) -> QueueConfig {
        QueueConfig {
            visibility_timeout_secs: visibility_secs,
            max_receive_count,
            ..QueueConfig::default()
        }
    }

    async fn submit(queue: &InMemoryQueue, group: &str, payload: &str) -> TaskId {
        queue
            .submit(GroupId::new(group), None, payload.as_bytes().to_vec())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn submit_rejects_empty_inputs() {
        let h = harness(QueueConfig::default());

        let err = h
            .queue
            .submit(GroupId::new(""), None, b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StrandError::EmptyGroupId));

        let err = h
            .queue
            .submit(GroupId::new("g"), None, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StrandError::EmptyPayload));

        let err = h
            .queue
            .submit(GroupId::new("g"), Some(DedupKey::new("")), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StrandError::EmptyDedupKey));

        let counts = h.queue.counts_by_state().await.unwrap();
        assert_eq!(counts, QueueCounts::default());
        assert!(h.events.events().is_empty());
    }

    #[tokio::test]
    async fn submit_and_counts() {
        let h = harness(QueueConfig::default());
        submit(&h.queue, "g1", "a").await;
        submit(&h.queue, "g1", "b").await;
        submit(&h.queue, "g2", "c").await;

        let counts = h.queue.counts_by_state().await.unwrap();
        assert_eq!(counts.pending, 3);
        assert_eq!(counts.leased, 0);
        assert_eq!(counts.groups, 2);
        assert_eq!(counts.dedup_entries, 3);
    }

    #[tokio::test]
    async fn explicit_dedup_key_collapses_resubmission() {
        let h = harness(QueueConfig::default());
        let key = DedupKey::new("order-42");

        let first = h
            .queue
            .submit(GroupId::new("g"), Some(key.clone()), b"p1".to_vec())
            .await
            .unwrap();
        let second = h
            .queue
            .submit(GroupId::new("g"), Some(key), b"p2".to_vec())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(h.queue.counts_by_state().await.unwrap().pending, 1);
        assert_eq!(h.events.names(), vec!["submitted", "deduplicated"]);
    }

    #[tokio::test]
    async fn content_dedup_applies_without_key() {
        let h = harness(QueueConfig::default());
        let a = submit(&h.queue, "g", "same").await;
        let b = submit(&h.queue, "g", "same").await;
        let c = submit(&h.queue, "g", "different").await;

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(h.queue.counts_by_state().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn dedup_window_closes() {
        let h = harness(QueueConfig {
            dedup_retention_secs: 60,
            ..QueueConfig::default()
        });
        let a = submit(&h.queue, "g", "same").await;
        h.clock.advance(Duration::from_secs(60));
        let b = submit(&h.queue, "g", "same").await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn dedup_outlives_ack() {
        let h = harness(QueueConfig::default());
        let a = submit(&h.queue, "g", "once").await;
        h.queue.lease(1).await.unwrap();
        h.queue.ack(a).await.unwrap();

        let b = submit(&h.queue, "g", "once").await;
        assert_eq!(a, b);
        assert!(h.queue.counts_by_state().await.unwrap().is_drained());
    }

    #[tokio::test]
    async fn lease_sets_expiry_and_receive_count() {
        let h = harness(config(30, 5));
        let id = submit(&h.queue, "g", "a").await;
        let now = h.clock.now();

        let leased = h.queue.lease(1).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].id, id);
        assert_eq!(leased[0].receive_count, 1);
        assert_eq!(leased[0].lease_expiry, Some(now + chrono::Duration::seconds(30)));

        let counts = h.queue.counts_by_state().await.unwrap();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.leased, 1);
        assert_eq!(counts.groups_in_flight, 1);
    }

    #[tokio::test]
    async fn lease_on_empty_queue_is_empty() {
        let h = harness(QueueConfig::default());
        assert!(h.queue.lease(10).await.unwrap().is_empty());
        submit(&h.queue, "g", "a").await;
        assert!(h.queue.lease(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lease_is_capped_by_max_batch_size() {
        let h = harness(QueueConfig {
            max_lease_batch_size: 2,
            ..QueueConfig::default()
        });
        for g in ["a", "b", "c"] {
            submit(&h.queue, g, g).await;
        }
        assert_eq!(h.queue.lease(10).await.unwrap().len(), 2);
        assert_eq!(h.queue.lease(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lease_spans_groups_but_one_per_group() {
        let h = harness(QueueConfig::default());
        let a1 = submit(&h.queue, "a", "a1").await;
        let _a2 = submit(&h.queue, "a", "a2").await;
        let b1 = submit(&h.queue, "b", "b1").await;

        let leased: Vec<_> = h.queue.lease(10).await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(leased, vec![a1, b1]);
    }

    #[tokio::test]
    async fn ack_rejects_unknown_and_unleased() {
        let h = harness(QueueConfig::default());
        let id = submit(&h.queue, "g", "a").await;

        let err = h.queue.ack(id).await.unwrap_err();
        assert!(matches!(err, StrandError::NotLeased(x) if x == id));

        let unknown = TaskId::from_ulid(ulid::Ulid::new());
        let err = h.queue.ack(unknown).await.unwrap_err();
        assert!(matches!(err, StrandError::UnknownTask(_)));
        let err = h.queue.fail(unknown).await.unwrap_err();
        assert!(err.is_invalid_argument());
        let err = h
            .queue
            .extend_lease(unknown, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());

        // nothing changed
        assert_eq!(h.queue.counts_by_state().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn ack_removes_and_releases_group() {
        let h = harness(QueueConfig::default());
        let a = submit(&h.queue, "g", "a").await;
        let b = submit(&h.queue, "g", "b").await;

        h.queue.lease(1).await.unwrap();
        h.queue.ack(a).await.unwrap();
        assert!(h.queue.record(a).await.is_none());
        assert!(matches!(h.queue.ack(a).await, Err(StrandError::UnknownTask(_))));

        let next = h.queue.lease(1).await.unwrap();
        assert_eq!(next[0].id, b);
    }

    #[tokio::test]
    async fn fail_redelivers_at_head_by_default() {
        let h = harness(config(30, 5));
        let a = submit(&h.queue, "g", "a").await;
        let b = submit(&h.queue, "g", "b").await;

        h.queue.lease(1).await.unwrap();
        h.queue.fail(a).await.unwrap();

        let record = h.queue.record(a).await.unwrap();
        assert_eq!(record.state, MessageState::Pending);
        assert!(record.message.lease_expiry.is_none());

        let next = h.queue.lease(1).await.unwrap();
        assert_eq!(next[0].id, a);
        assert_eq!(next[0].receive_count, 2);
        h.queue.ack(a).await.unwrap();
        assert_eq!(h.queue.lease(1).await.unwrap()[0].id, b);
    }

    #[tokio::test]
    async fn fail_redelivers_at_tail_when_configured() {
        let h = harness(QueueConfig {
            redelivery_position: RedeliveryPosition::Tail,
            ..QueueConfig::default()
        });
        let a = submit(&h.queue, "g", "a").await;
        let b = submit(&h.queue, "g", "b").await;

        h.queue.lease(1).await.unwrap();
        h.queue.fail(a).await.unwrap();
        assert_eq!(h.queue.lease(1).await.unwrap()[0].id, b);
    }

    #[tokio::test]
    async fn fail_on_last_receive_dead_letters() {
        let h = harness(config(30, 1));
        let a = submit(&h.queue, "g", "a").await;

        h.queue.lease(1).await.unwrap();
        h.queue.fail(a).await.unwrap();

        assert!(h.queue.record(a).await.is_none());
        let dead: Vec<_> = h.dead_letters.list().collect();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.id, a);
        assert_eq!(dead[0].message.receive_count, 1);
        assert_eq!(dead[0].reason, "max receive count exceeded");
        assert_eq!(dead[0].moved_at, h.clock.now());
        assert!(h.queue.lease(1).await.unwrap().is_empty());
        assert_eq!(h.events.names(), vec!["submitted", "leased", "dead-lettered"]);
    }

    #[tokio::test]
    async fn extend_lease_pushes_expiry() {
        let h = harness(config(10, 5));
        let a = submit(&h.queue, "g", "a").await;
        let leased = h.queue.lease(1).await.unwrap();
        let original = leased[0].lease_expiry.unwrap();

        let extended = h.queue.extend_lease(a, Duration::from_secs(20)).await.unwrap();
        assert_eq!(extended, original + chrono::Duration::seconds(20));

        // the original deadline is now stale
        h.clock.advance(Duration::from_secs(15));
        assert_eq!(h.queue.sweep_expired_leases().await, 0);
        assert_eq!(h.queue.record(a).await.unwrap().state, MessageState::Leased);

        h.clock.advance(Duration::from_secs(15));
        assert_eq!(h.queue.sweep_expired_leases().await, 1);
        assert_eq!(h.queue.record(a).await.unwrap().state, MessageState::Pending);
    }

    #[tokio::test]
    async fn extend_lease_requires_lease() {
        let h = harness(QueueConfig::default());
        let a = submit(&h.queue, "g", "a").await;
        let err = h
            .queue
            .extend_lease(a, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StrandError::NotLeased(_)));
    }

    #[tokio::test]
    async fn zero_extension_expires_once() {
        let h = harness(config(10, 5));
        let a = submit(&h.queue, "g", "a").await;
        h.queue.lease(1).await.unwrap();
        h.queue.extend_lease(a, Duration::ZERO).await.unwrap();

        h.clock.advance(Duration::from_secs(10));
        assert_eq!(h.queue.sweep_expired_leases().await, 1);
        assert_eq!(
            h.events.names(),
            vec![
                "submitted",
                "leased",
                "lease-extended",
                "lease-expired",
                "redelivered"
            ]
        );

        // exactly one copy of the task is back in its group
        assert_eq!(h.queue.lease(1).await.unwrap()[0].id, a);
        h.queue.ack(a).await.unwrap();
        let counts = h.queue.counts_by_state().await.unwrap();
        assert_eq!(counts.groups, 0);
        assert_eq!(counts.groups_ready, 0);
    }

    #[tokio::test]
    async fn lease_again_at_same_instant_expires_once() {
        let h = harness(config(10, 5));
        let a = submit(&h.queue, "g", "a").await;
        h.queue.lease(1).await.unwrap();
        h.queue.fail(a).await.unwrap();
        // same clock reading, so both heap entries share one expiry
        assert_eq!(h.queue.lease(1).await.unwrap()[0].receive_count, 2);

        h.clock.advance(Duration::from_secs(10));
        assert_eq!(h.queue.sweep_expired_leases().await, 1);
        assert_eq!(h.queue.record(a).await.unwrap().state, MessageState::Pending);

        let counts = h.queue.counts_by_state().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.groups_ready, 1);
        assert_eq!(h.queue.lease(1).await.unwrap()[0].receive_count, 3);
        assert!(h.queue.lease(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_ignores_unexpired_and_acked_leases() {
        let h = harness(config(10, 5));
        let a = submit(&h.queue, "g1", "a").await;
        submit(&h.queue, "g2", "b").await;
        h.queue.lease(2).await.unwrap();
        h.queue.ack(a).await.unwrap();

        h.clock.advance(Duration::from_secs(9));
        assert_eq!(h.queue.sweep_expired_leases().await, 0);

        h.clock.advance(Duration::from_secs(1));
        assert_eq!(h.queue.sweep_expired_leases().await, 1);
        assert_eq!(
            h.events.names(),
            vec![
                "submitted",
                "submitted",
                "leased",
                "leased",
                "acked",
                "lease-expired",
                "redelivered"
            ]
        );
    }

    #[tokio::test]
    async fn ack_after_redelivery_is_rejected() {
        let h = harness(config(10, 5));
        let a = submit(&h.queue, "g", "a").await;
        h.queue.lease(1).await.unwrap();
        h.clock.advance(Duration::from_secs(10));
        h.queue.sweep_expired_leases().await;

        let err = h.queue.ack(a).await.unwrap_err();
        assert!(matches!(err, StrandError::NotLeased(_)));
    }

    #[tokio::test]
    async fn requeue_dead_letter_resets_budget() {
        let h = harness(config(10, 1));
        let a = submit(&h.queue, "g", "a").await;
        h.queue.lease(1).await.unwrap();
        h.queue.fail(a).await.unwrap();

        let record = h.dead_letters.list().next().unwrap();
        let requeued = h.queue.requeue_dead_letter(record.clone()).await.unwrap();
        assert_eq!(requeued, a);

        let err = h.queue.requeue_dead_letter(record).await.unwrap_err();
        assert!(matches!(err, StrandError::AlreadyQueued(_)));

        let leased = h.queue.lease(1).await.unwrap();
        assert_eq!(leased[0].id, a);
        assert_eq!(leased[0].receive_count, 1);
        // the store is append-only; the old record stays
        assert_eq!(h.dead_letters.len(), 1);
    }

    #[tokio::test]
    async fn evict_expired_dedup_entries() {
        let h = harness(QueueConfig {
            dedup_retention_secs: 5,
            ..QueueConfig::default()
        });
        submit(&h.queue, "g", "a").await;
        h.clock.advance(Duration::from_secs(5));
        assert_eq!(h.queue.evict_expired_dedup().await, 1);
        assert_eq!(h.queue.counts_by_state().await.unwrap().dedup_entries, 0);
    }

    #[tokio::test]
    async fn wake_up_before_waiting_is_not_lost() {
        let h = harness(QueueConfig::default());
        assert!(h.queue.lease(1).await.unwrap().is_empty());

        // work arrives after the empty lease but before the worker waits
        let id = submit(&h.queue, "g", "a").await;
        tokio::time::timeout(Duration::from_millis(100), h.queue.wait_for_work())
            .await
            .unwrap();
        assert_eq!(h.queue.lease(1).await.unwrap()[0].id, id);
    }

    #[tokio::test]
    async fn submit_wakes_waiting_worker() {
        let h = harness(QueueConfig::default());
        let queue = Arc::clone(&h.queue);
        let waiter = tokio::spawn(async move {
            queue.wait_for_work().await;
            queue.lease(1).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = submit(&h.queue, "g", "a").await;

        let leased = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased[0].id, id);
    }

    struct FailingStore;

    #[async_trait]
    impl DeadLetterStore for FailingStore {
        async fn put(&self, _record: DeadLetterRecord) -> Result<(), StrandError> {
            Err(StrandError::DeadLetterStore("unavailable".into()))
        }

        fn list(&self) -> crate::ports::DeadLetters {
            Box::new(std::iter::empty())
        }

        fn len(&self) -> usize {
            0
        }

        async fn purge_before(&self, _cutoff: DateTime<Utc>) -> Result<usize, StrandError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn dead_letter_store_failure_keeps_message() {
        let queue = InMemoryQueue::new(
            &config(10, 1),
            Arc::new(SystemClock::new()),
            Arc::new(FailingStore),
            Arc::new(NoopEventSink),
        )
        .unwrap();
        let a = submit(&queue, "g", "a").await;
        queue.lease(1).await.unwrap();
        queue.fail(a).await.unwrap();

        let record = queue.record(a).await.unwrap();
        assert_eq!(record.state, MessageState::Pending);
        assert_eq!(queue.lease(1).await.unwrap()[0].id, a);
    }
}
