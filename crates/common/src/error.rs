//! Errors raised by the shared plumbing

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Every receiver (or sender) of the event queue is gone
    #[error("Event queue closed")]
    QueueClosed,

    /// `try_send` found the bounded queue at capacity
    #[error("Event queue full")]
    QueueFull,

    #[error("Invalid log filter: {0}")]
    LogFilter(String),

    #[error("Logging already initialised: {0}")]
    LoggingInitialised(String),
}

pub type Result<T> = std::result::Result<T, Error>;
