//! Ports.
//!
//! Seams between the queue core and what surrounds it: time, id generation,
//! observability and dead-letter storage.

pub mod clock;
pub mod dead_letter_store;
pub mod event_sink;
pub mod id_generator;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::dead_letter_store::{DeadLetterStore, DeadLetters};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
