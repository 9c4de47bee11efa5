//! In-memory and development implementations of the ports.

pub mod event_sinks;
pub mod inmem_dead_letter;

pub use self::event_sinks::{
    CountingEventSink, NoopEventSink, RecordingEventSink, TracingEventSink,
};
pub use self::inmem_dead_letter::InMemoryDeadLetterStore;
