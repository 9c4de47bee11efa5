//! strand-core
//!
//! An ordered, group-partitioned task queue with at-least-once delivery.
//!
//! # Modules
//! - **domain**: messages, ids, dead-letter records, lifecycle events
//! - **ports**: seams for time, ids, events and dead-letter storage
//! - **queue**: the `Queue` trait, group cursors, dedup, redrive and the in-memory queue
//! - **impls**: in-memory dead-letter store and event sinks
//! - **app**: builder, worker pool, reaper loop
//! - **config** / **telemetry**: TOML configuration and tracing setup

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod telemetry;

pub use error::{ErrorKind, HandlerError, StrandError};
