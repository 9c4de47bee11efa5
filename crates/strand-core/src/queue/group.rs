//! Group cursors: the mechanism that keeps each group single-flight and FIFO.
//!
//! Invariant: a group id sits in `ready` exactly when its cursor has no
//! in-flight message and at least one pending message. Every mutation below
//! keeps `ready` in sync with the cursors.

use std::collections::{HashMap, VecDeque};

use super::RedeliveryPosition;
use crate::domain::{GroupId, TaskId};

#[derive(Debug, Default)]
pub struct GroupCursor {
    pending: VecDeque<TaskId>,
    in_flight: Option<TaskId>,
}

impl GroupCursor {
    pub fn in_flight(&self) -> Option<TaskId> {
        self.in_flight
    }

    pub fn pending(&self) -> impl Iterator<Item = &TaskId> {
        self.pending.iter()
    }

    fn is_ready(&self) -> bool {
        self.in_flight.is_none() && !self.pending.is_empty()
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }
}

/// All group cursors plus the round-robin list of groups that can be leased
/// from right now.
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: HashMap<GroupId, GroupCursor>,
    ready: VecDeque<GroupId>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group_id: &GroupId) -> Option<&GroupCursor> {
        self.groups.get(group_id)
    }

    /// Append a message to its group.
    ///
    /// Returns `true` when the group just became leasable.
    pub fn enqueue(&mut self, group_id: &GroupId, task_id: TaskId) -> bool {
        let cursor = self.groups.entry(group_id.clone()).or_default();
        let was_ready = cursor.is_ready();
        cursor.pending.push_back(task_id);
        if !was_ready && cursor.is_ready() {
            self.ready.push_back(group_id.clone());
            return true;
        }
        false
    }

    /// Take the oldest pending message of up to `max` ready groups and mark
    /// each in flight. Groups are served in round-robin order.
    pub fn take_ready(&mut self, max: usize) -> Vec<(GroupId, TaskId)> {
        let mut taken = Vec::new();
        while taken.len() < max {
            let Some(group_id) = self.ready.pop_front() else {
                break;
            };
            let Some(cursor) = self.groups.get_mut(&group_id) else {
                continue;
            };
            let Some(task_id) = cursor.pending.pop_front() else {
                continue;
            };
            cursor.in_flight = Some(task_id);
            taken.push((group_id, task_id));
        }
        taken
    }

    /// Clear the in-flight slot held by `task_id`, optionally putting the
    /// message back into the group.
    ///
    /// Returns `true` when the group became leasable again.
    pub fn finish(
        &mut self,
        group_id: &GroupId,
        task_id: TaskId,
        redeliver: Option<RedeliveryPosition>,
    ) -> bool {
        let Some(cursor) = self.groups.get_mut(group_id) else {
            return false;
        };
        let was_ready = cursor.is_ready();
        if cursor.in_flight == Some(task_id) {
            cursor.in_flight = None;
        }
        match redeliver {
            Some(RedeliveryPosition::Head) => cursor.pending.push_front(task_id),
            Some(RedeliveryPosition::Tail) => cursor.pending.push_back(task_id),
            None => {}
        }
        if cursor.is_idle() {
            self.groups.remove(group_id);
            return false;
        }
        if !was_ready && cursor.is_ready() {
            self.ready.push_back(group_id.clone());
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.groups
            .values()
            .filter(|c| c.in_flight.is_some())
            .count()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }
}
