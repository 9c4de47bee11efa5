//! Lifecycle events emitted by the queue for an external metrics collector.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{GroupId, TaskId};

/// One event per lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum QueueEvent {
    Submitted {
        task_id: TaskId,
        group_id: GroupId,
    },
    /// A submission collapsed into an existing message.
    Deduplicated {
        task_id: TaskId,
        group_id: GroupId,
    },
    Leased {
        task_id: TaskId,
        group_id: GroupId,
        receive_count: u32,
    },
    Acked {
        task_id: TaskId,
        group_id: GroupId,
    },
    LeaseExtended {
        task_id: TaskId,
        lease_expiry: DateTime<Utc>,
    },
    /// The sweep found an abandoned lease. Usually a crashed or hung worker.
    LeaseExpired {
        task_id: TaskId,
        group_id: GroupId,
        receive_count: u32,
    },
    Redelivered {
        task_id: TaskId,
        group_id: GroupId,
        receive_count: u32,
    },
    DeadLettered {
        task_id: TaskId,
        group_id: GroupId,
        receive_count: u32,
        reason: String,
    },
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Submitted { .. } => "submitted",
            QueueEvent::Deduplicated { .. } => "deduplicated",
            QueueEvent::Leased { .. } => "leased",
            QueueEvent::Acked { .. } => "acked",
            QueueEvent::LeaseExtended { .. } => "lease-extended",
            QueueEvent::LeaseExpired { .. } => "lease-expired",
            QueueEvent::Redelivered { .. } => "redelivered",
            QueueEvent::DeadLettered { .. } => "dead-lettered",
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            QueueEvent::Submitted { task_id, .. }
            | QueueEvent::Deduplicated { task_id, .. }
            | QueueEvent::Leased { task_id, .. }
            | QueueEvent::Acked { task_id, .. }
            | QueueEvent::LeaseExtended { task_id, .. }
            | QueueEvent::LeaseExpired { task_id, .. }
            | QueueEvent::Redelivered { task_id, .. }
            | QueueEvent::DeadLettered { task_id, .. } => *task_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_kebab_case_tag() {
        let event = QueueEvent::DeadLettered {
            task_id: TaskId::from_ulid(ulid::Ulid::new()),
            group_id: GroupId::new("g1"),
            receive_count: 5,
            reason: "max receive count exceeded".to_string(),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "dead-lettered");
        assert_eq!(v["group_id"], "g1");
        assert_eq!(v["receive_count"], 5);
        assert_eq!(event.name(), "dead-lettered");
    }
}
