//! Task record: message + lifecycle state.

use chrono::{DateTime, Utc};

use super::MessageState;
use crate::domain::TaskMessage;

/// The single source of truth for one message inside the queue.
///
/// Group cursors and the lease heap hold `TaskId`s only; every state
/// transition happens here.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub message: TaskMessage,
    pub state: MessageState,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(message: TaskMessage) -> Self {
        let updated_at = message.enqueued_at;
        Self {
            message,
            state: MessageState::Pending,
            updated_at,
        }
    }

    /// Grant a lease (increments the receive count).
    pub fn start_lease(&mut self, now: DateTime<Utc>, expiry: DateTime<Utc>) {
        self.state = MessageState::Leased;
        self.message.receive_count += 1;
        self.message.lease_expiry = Some(expiry);
        self.updated_at = now;
    }

    /// `None` when not leased or when the new expiry would overflow.
    pub fn extend_lease(
        &mut self,
        extra: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let expiry = self.message.lease_expiry?.checked_add_signed(extra)?;
        self.message.lease_expiry = Some(expiry);
        self.updated_at = now;
        Some(expiry)
    }

    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_leased() && self.message.lease_expiry.is_some_and(|expiry| expiry <= now)
    }

    /// Back to pending for redelivery.
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.state = MessageState::Pending;
        self.message.lease_expiry = None;
        self.updated_at = now;
    }

    pub fn mark_acknowledged(&mut self, now: DateTime<Utc>) {
        self.state = MessageState::Acknowledged;
        self.message.lease_expiry = None;
        self.updated_at = now;
    }

    pub fn mark_dead_lettered(&mut self, now: DateTime<Utc>) {
        self.state = MessageState::DeadLettered;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DedupKey, GroupId, TaskId};
    use chrono::TimeZone;

    fn record() -> TaskRecord {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TaskRecord::new(TaskMessage::new(
            TaskId::from_ulid(ulid::Ulid::new()),
            GroupId::new("g"),
            DedupKey::new("k"),
            b"x".to_vec(),
            at,
        ))
    }

    #[test]
    fn lease_increments_receive_count() {
        let mut r = record();
        let now = r.message.enqueued_at;
        let expiry = now + chrono::Duration::seconds(5);

        r.start_lease(now, expiry);
        assert_eq!(r.state, MessageState::Leased);
        assert_eq!(r.message.receive_count, 1);
        assert_eq!(r.message.lease_expiry, Some(expiry));

        r.release(now);
        assert_eq!(r.state, MessageState::Pending);
        assert_eq!(r.message.receive_count, 1);
        assert!(r.message.lease_expiry.is_none());

        r.start_lease(now, expiry);
        assert_eq!(r.message.receive_count, 2);
    }

    #[test]
    fn expiry_is_inclusive() {
        let mut r = record();
        let now = r.message.enqueued_at;
        let expiry = now + chrono::Duration::seconds(5);
        r.start_lease(now, expiry);

        assert!(!r.is_lease_expired(expiry - chrono::Duration::milliseconds(1)));
        assert!(r.is_lease_expired(expiry));
    }

    #[test]
    fn extend_requires_a_lease() {
        let mut r = record();
        let now = r.message.enqueued_at;
        assert!(r.extend_lease(chrono::Duration::seconds(1), now).is_none());

        r.start_lease(now, now + chrono::Duration::seconds(5));
        let expiry = r.extend_lease(chrono::Duration::seconds(10), now).unwrap();
        assert_eq!(expiry, now + chrono::Duration::seconds(15));
    }

    #[test]
    fn terminal_states() {
        assert!(MessageState::Acknowledged.is_terminal());
        assert!(MessageState::DeadLettered.is_terminal());
        assert!(!MessageState::Pending.is_terminal());
        assert!(!MessageState::Leased.is_terminal());
    }
}
