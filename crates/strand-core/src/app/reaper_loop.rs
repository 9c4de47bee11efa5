//! ReaperLoop - periodic housekeeping.
//!
//! Every tick:
//! 1. expired leases are treated as failures and go through the redrive policy
//! 2. dedup entries past their window are evicted
//! 3. dead letters past the retention period are purged

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::config::QueueConfig;
use crate::queue::InMemoryQueue;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub expired_leases: usize,
    pub evicted_dedup_entries: usize,
    pub purged_dead_letters: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct ReaperLoop {
    queue: Arc<InMemoryQueue>,
    interval: Duration,
    /// `None` disables the purge (retention too large to represent).
    dead_letter_retention: Option<chrono::Duration>,
}

impl ReaperLoop {
    pub fn new(queue: Arc<InMemoryQueue>, config: &QueueConfig) -> Self {
        Self {
            queue,
            interval: config.sweep_interval(),
            dead_letter_retention: chrono::Duration::from_std(config.dead_letter_retention())
                .ok(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn tick(&self) -> ReapReport {
        let expired_leases = self.queue.sweep_expired_leases().await;
        let evicted_dedup_entries = self.queue.evict_expired_dedup().await;

        let cutoff = self
            .dead_letter_retention
            .and_then(|retention| self.queue.clock().now().checked_sub_signed(retention));
        let purged_dead_letters = match cutoff {
            Some(cutoff) => match self.queue.dead_letters().purge_before(cutoff).await {
                Ok(purged) => purged,
                Err(err) => {
                    error!(error = %err, "dead-letter purge failed");
                    0
                }
            },
            None => 0,
        };

        let report = ReapReport {
            expired_leases,
            evicted_dedup_entries,
            purged_dead_letters,
        };
        if !report.is_empty() {
            debug!(
                expired_leases,
                evicted_dedup_entries,
                purged_dead_letters,
                "reaper tick"
            );
        }
        report
    }

    /// Run on a fixed interval until shut down. Must be called inside a tokio runtime.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            debug!("reaper stopped");
        });

        ReaperHandle { shutdown_tx, join }
    }
}

pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            error!(error = %err, "reaper task terminated abnormally");
        }
    }
}
