//! Built-in [`EventSink`] implementations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::domain::QueueEvent;
use crate::observability::EventCounts;
use crate::ports::EventSink;

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &QueueEvent) {}
}

/// Writes each event as a JSON line to the `strand::events` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &QueueEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(target: "strand::events", event = event.name(), "{json}"),
            Err(err) => tracing::warn!(
                event = event.name(),
                error = %err,
                "failed to encode event"
            ),
        }
    }
}

/// Keeps a running total per event kind.
#[derive(Debug, Default)]
pub struct CountingEventSink {
    submitted: AtomicU64,
    deduplicated: AtomicU64,
    leased: AtomicU64,
    acked: AtomicU64,
    lease_extended: AtomicU64,
    lease_expired: AtomicU64,
    redelivered: AtomicU64,
    dead_lettered: AtomicU64,
}

impl CountingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EventCounts {
        EventCounts {
            submitted: self.submitted.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            leased: self.leased.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            lease_extended: self.lease_extended.load(Ordering::Relaxed),
            lease_expired: self.lease_expired.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

impl EventSink for CountingEventSink {
    fn emit(&self, event: &QueueEvent) {
        let counter = match event {
            QueueEvent::Submitted { .. } => &self.submitted,
            QueueEvent::Deduplicated { .. } => &self.deduplicated,
            QueueEvent::Leased { .. } => &self.leased,
            QueueEvent::Acked { .. } => &self.acked,
            QueueEvent::LeaseExtended { .. } => &self.lease_extended,
            QueueEvent::LeaseExpired { .. } => &self.lease_expired,
            QueueEvent::Redelivered { .. } => &self.redelivered,
            QueueEvent::DeadLettered { .. } => &self.dead_lettered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Stores every event in order. Meant for tests.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<QueueEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(QueueEvent::name)
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &QueueEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
