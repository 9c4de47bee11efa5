//! WorkerLoop - lease → handle → ack / fail.
//!
//! A worker never decides between redelivery and dead-lettering itself; it
//! reports the outcome and the queue applies the redrive policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::WorkerConfig;
use crate::domain::TaskMessage;
use crate::error::HandlerError;
use crate::queue::Queue;

/// Processing logic run on each leased message.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, message: &TaskMessage) -> Result<(), HandlerError>;
}

/// Lease heartbeat: while a handler runs, extend its lease by `extension`
/// every `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub extension: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub concurrency: usize,
    pub batch_size: usize,
    /// Fallback wake-up when no notification arrives.
    pub poll_interval: Duration,
    pub heartbeat: Option<Heartbeat>,
}

impl WorkerOptions {
    /// Each heartbeat extends the lease by one heartbeat interval, so the
    /// expiry stays a constant distance ahead while the handler runs.
    pub fn from_config(worker: &WorkerConfig) -> Self {
        Self {
            concurrency: worker.concurrency,
            batch_size: worker.batch_size,
            poll_interval: worker.poll_interval(),
            heartbeat: worker.heartbeat_interval().map(|interval| Heartbeat {
                interval,
                extension: interval,
            }),
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Worker group handle.
/// - dropping `shutdown_tx` stops every worker
/// - `shutdown_and_join()` waits for all of them
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `options.concurrency` workers. Must be called inside a tokio runtime.
    pub fn spawn(
        options: WorkerOptions,
        queue: Arc<dyn Queue>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(options.concurrency);
        for worker_id in 0..options.concurrency {
            let q = Arc::clone(&queue);
            let h = Arc::clone(&handler);
            let opts = options.clone();
            let rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, q, h, opts, rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new leases. In-flight handlers run to completion.
    pub fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker task terminated abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<dyn Queue>,
    handler: Arc<dyn TaskHandler>,
    options: WorkerOptions,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let batch = match queue.lease(options.batch_size).await {
            Ok(batch) => batch,
            Err(err) => {
                error!(worker_id, error = %err, "lease failed");
                Vec::new()
            }
        };

        if batch.is_empty() {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // sender gone: nobody can ask us to keep going
                    if changed.is_err() {
                        break;
                    }
                }
                _ = queue.wait_for_work() => {}
                _ = tokio::time::sleep(options.poll_interval) => {}
            }
            continue;
        }

        // Messages in one batch come from distinct groups, so they run side by
        // side and each keeps its own heartbeat from the moment it is leased.
        let running: Vec<JoinHandle<()>> = batch
            .into_iter()
            .map(|message| {
                let queue = Arc::clone(&queue);
                let handler = Arc::clone(&handler);
                let heartbeat = options.heartbeat;
                tokio::spawn(async move {
                    process(worker_id, &queue, &handler, heartbeat, message).await;
                })
            })
            .collect();
        for join in running {
            if let Err(err) = join.await {
                error!(worker_id, error = %err, "batch member terminated abnormally");
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn process(
    worker_id: usize,
    queue: &Arc<dyn Queue>,
    handler: &Arc<dyn TaskHandler>,
    heartbeat: Option<Heartbeat>,
    message: TaskMessage,
) {
    let task_id = message.id;
    let group_id = message.group_id.clone();
    let receive_count = message.receive_count;

    // Run the handler on its own task so a panic is contained to this message.
    let handler = Arc::clone(handler);
    let mut running = tokio::spawn(async move { handler.handle(&message).await });

    let joined = match heartbeat {
        None => running.await,
        Some(heartbeat) => {
            let start = tokio::time::Instant::now() + heartbeat.interval;
            let mut ticker = tokio::time::interval_at(start, heartbeat.interval);
            loop {
                tokio::select! {
                    joined = &mut running => break joined,
                    _ = ticker.tick() => {
                        if let Err(err) = queue.extend_lease(task_id, heartbeat.extension).await {
                            debug!(
                                worker_id,
                                task_id = %task_id,
                                error = %err,
                                "heartbeat could not extend lease"
                            );
                        }
                    }
                }
            }
        }
    };

    match joined {
        Ok(Ok(())) => {
            if let Err(err) = queue.ack(task_id).await {
                // usually the lease expired and the message was redelivered
                warn!(worker_id, task_id = %task_id, error = %err, "ack failed");
            }
        }
        Ok(Err(err)) => {
            warn!(
                worker_id,
                task_id = %task_id,
                group_id = %group_id,
                receive_count,
                error = %err,
                "handler failed"
            );
            if let Err(err) = queue.fail(task_id).await {
                warn!(worker_id, task_id = %task_id, error = %err, "fail report failed");
            }
        }
        Err(err) => {
            // Crash semantics: report nothing and let the lease expire.
            error!(
                worker_id,
                task_id = %task_id,
                group_id = %group_id,
                error = %err,
                "handler crashed"
            );
        }
    }
}
