//! AppBuilder - construction and wiring.
//!
//! The shared queue is built once here and injected into the worker pool and
//! the reaper loop. Everything is validated up front so misconfiguration
//! fails at startup rather than on the first message.

use std::sync::Arc;

use tracing::info;

use super::reaper_loop::{ReaperHandle, ReaperLoop};
use super::worker_loop::{TaskHandler, WorkerGroup, WorkerOptions};
use crate::config::StrandConfig;
use crate::error::StrandError;
use crate::impls::{InMemoryDeadLetterStore, NoopEventSink};
use crate::ports::{Clock, DeadLetterStore, EventSink, SystemClock};
use crate::queue::{InMemoryQueue, Queue};

/// Builds an [`App`].
///
/// # Example
/// ```ignore
/// let app = AppBuilder::new(config)
///     .event_sink(Arc::new(TracingEventSink))
///     .handler(Arc::new(MyHandler))
///     .build()?;
/// app.queue().submit(group, None, payload).await?;
/// app.shutdown().await;
/// ```
///
/// Without a handler no workers are spawned; the app only accepts
/// submissions and runs the reaper.
pub struct AppBuilder {
    config: StrandConfig,
    clock: Option<Arc<dyn Clock>>,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
    events: Option<Arc<dyn EventSink>>,
    handler: Option<Arc<dyn TaskHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] StrandError),

    #[error("build() must be called from within a tokio runtime")]
    NoRuntime,
}

impl AppBuilder {
    pub fn new(config: StrandConfig) -> Self {
        Self {
            config,
            clock: None,
            dead_letters: None,
            events: None,
            handler: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn dead_letters(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validate, build the queue, then spawn the reaper and workers.
    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new()),
        };
        let dead_letters: Arc<dyn DeadLetterStore> = match self.dead_letters {
            Some(store) => store,
            None => Arc::new(InMemoryDeadLetterStore::new()),
        };
        let events: Arc<dyn EventSink> = match self.events {
            Some(events) => events,
            None => Arc::new(NoopEventSink),
        };

        let queue = Arc::new(InMemoryQueue::new(
            &self.config.queue,
            clock,
            Arc::clone(&dead_letters),
            events,
        )?);

        let reaper = ReaperLoop::new(Arc::clone(&queue), &self.config.queue).spawn();

        let workers = self.handler.map(|handler| {
            let options = WorkerOptions::from_config(&self.config.worker);
            let queue: Arc<dyn Queue> = queue.clone();
            WorkerGroup::spawn(options, queue, handler)
        });

        info!(
            environment = %self.config.environment,
            workers = workers.as_ref().map_or(0, WorkerGroup::len),
            "app started"
        );

        Ok(App {
            config: self.config,
            queue,
            dead_letters,
            reaper,
            workers,
        })
    }
}

/// A running queue with its background loops.
pub struct App {
    config: StrandConfig,
    queue: Arc<InMemoryQueue>,
    dead_letters: Arc<dyn DeadLetterStore>,
    reaper: ReaperHandle,
    workers: Option<WorkerGroup>,
}

impl App {
    pub fn config(&self) -> &StrandConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<InMemoryQueue> {
        &self.queue
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterStore> {
        &self.dead_letters
    }

    /// Stop leasing, let in-flight handlers finish, then stop the reaper.
    pub async fn shutdown(self) {
        if let Some(workers) = self.workers {
            workers.shutdown_and_join().await;
        }
        self.reaper.shutdown().await;
        info!("app stopped");
    }
}
