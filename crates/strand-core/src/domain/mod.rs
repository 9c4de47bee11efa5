//! Domain model: ids, messages, dead letters and lifecycle events.

pub mod events;
pub mod ids;
pub mod message;

pub use self::events::QueueEvent;
pub use self::ids::TaskId;
pub use self::message::{
    DeadLetterRecord, DedupKey, GroupId, MAX_RECEIVE_COUNT_EXCEEDED, TaskMessage,
};
