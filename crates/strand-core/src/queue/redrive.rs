//! Redrive policy: decides redelivery vs. dead-lettering.

use serde::{Deserialize, Serialize};

use crate::domain::MAX_RECEIVE_COUNT_EXCEEDED;

/// Where a redelivered message goes within its group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedeliveryPosition {
    /// Back in front of its younger siblings. Submission order is kept.
    #[default]
    Head,
    /// Behind every message already pending in the group.
    Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedriveDecision {
    Redeliver(RedeliveryPosition),
    DeadLetter { reason: &'static str },
}

/// Redrive policy for failed or abandoned leases.
///
/// Stateless: the decision depends only on the message's receive count.
#[derive(Debug, Clone)]
pub struct RedrivePolicy {
    pub max_receive_count: u32,
    pub position: RedeliveryPosition,
}

impl RedrivePolicy {
    pub fn new(max_receive_count: u32, position: RedeliveryPosition) -> Self {
        Self {
            max_receive_count,
            position,
        }
    }

    /// # Arguments
    /// * `receive_count` - Leases granted so far, including the one that just
    ///   failed.
    pub fn decide(&self, receive_count: u32) -> RedriveDecision {
        if receive_count < self.max_receive_count {
            RedriveDecision::Redeliver(self.position)
        } else {
            RedriveDecision::DeadLetter {
                reason: MAX_RECEIVE_COUNT_EXCEEDED,
            }
        }
    }
}
