use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskId;

/// Operational classification of a [`StrandError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed API usage. Reported synchronously, no state was changed.
    InvalidArgument,
    Configuration,
    /// A backing store (dead-letter store, ...) failed.
    Storage,
}

#[derive(Debug, Error)]
pub enum StrandError {
    #[error("group id must not be empty")]
    EmptyGroupId,

    #[error("payload must not be empty")]
    EmptyPayload,

    #[error("dedup key must not be empty when supplied")]
    EmptyDedupKey,

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("task {0} is not leased")]
    NotLeased(TaskId),

    #[error("task {0} is already queued")]
    AlreadyQueued(TaskId),

    #[error("lease extension out of range: {0:?}")]
    ExtensionOutOfRange(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("dead-letter store error: {0}")]
    DeadLetterStore(String),
}

impl StrandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrandError::EmptyGroupId
            | StrandError::EmptyPayload
            | StrandError::EmptyDedupKey
            | StrandError::UnknownTask(_)
            | StrandError::NotLeased(_)
            | StrandError::AlreadyQueued(_)
            | StrandError::ExtensionOutOfRange(_) => ErrorKind::InvalidArgument,
            StrandError::InvalidConfig(_)
            | StrandError::ConfigRead { .. }
            | StrandError::ConfigParse(_) => ErrorKind::Configuration,
            StrandError::DeadLetterStore(_) => ErrorKind::Storage,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgument
    }
}

/// Error returned by a [`TaskHandler`](crate::app::TaskHandler).
///
/// Any handler error is treated as a transient processing failure: the task is
/// failed back to the queue and the redrive policy decides what happens next.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
