//! App layer: wires the queue, the worker pool and the reaper loop together.

pub mod builder;
pub mod reaper_loop;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::reaper_loop::{ReapReport, ReaperHandle, ReaperLoop};
pub use self::worker_loop::{Heartbeat, TaskHandler, WorkerGroup, WorkerOptions};
