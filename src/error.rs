//! Error types for the pipeline core

use std::time::Duration;
use thiserror::Error;

/// Top-level pipeline error
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Item error: {0}")]
    Item(#[from] ItemError),

    #[error("Worker task failed to join: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Rejected configuration. Raised before any worker starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("producer count must be greater than zero")]
    ZeroProducers,

    #[error("consumer count must be greater than zero")]
    ZeroConsumers,

    #[error("messages per producer must be greater than zero")]
    ZeroMessages,

    #[error("channel capacity must be greater than zero")]
    ZeroCapacity,

    #[error("take timeout must be greater than zero")]
    ZeroTakeTimeout,

    #[error("{which} delay range is inverted: min {min:?} > max {max:?}")]
    InvalidDelay {
        which: &'static str,
        min: Duration,
        max: Duration,
    },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Bounded channel failures. Neither is retried.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,
}

/// Timing marker misuse
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemError {
    #[error("{0} timestamp already set")]
    AlreadyStamped(&'static str),

    #[error("item completed before it was created")]
    NotCreated,

    #[error("item is not registered in the ledger")]
    Unregistered,

    #[error("item is already registered in the ledger")]
    AlreadyRegistered,
}
