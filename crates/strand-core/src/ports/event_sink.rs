//! EventSink port - イベント記録の抽象化
//!
//! The queue emits one [`QueueEvent`] per lifecycle transition, after its lock
//! is released. Implementations must be cheap and must not call back into the
//! queue.

use crate::domain::QueueEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &QueueEvent);
}
