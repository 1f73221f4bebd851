//! Hub session error types

use std::time::Duration;

use protocol::ProtocolError;
use thiserror::Error;

/// Step of a chunked upload that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Open,
    Write,
    Close,
}

impl std::fmt::Display for TransferStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Write => "write",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by transports, sessions and transfers
#[derive(Debug, Error)]
pub enum HubError {
    /// Transport failed to establish a link
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Send attempted while disconnected
    #[error("Not connected to a hub")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The brick answered with a non-zero status
    #[error("Command 0x{command:02x} failed with status 0x{status:02x}: {message}")]
    Device {
        command: u8,
        status: u8,
        message: &'static str,
    },

    /// No reply arrived before the deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The link dropped while the request was outstanding
    #[error("Connection lost")]
    ConnectionLost,

    /// An upload failed part way through
    #[error("Transfer failed during {stage}: {source}")]
    Transfer {
        stage: TransferStage,
        #[source]
        source: Box<HubError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON-RPC error object returned by the relay
    #[error("Relay error {code}: {message}")]
    Relay { code: i64, message: String },

    /// HTTP bridge request failure
    #[error("Bridge request failed: {0}")]
    Http(String),

    /// Command not valid for the device on that port
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl HubError {
    /// Build a `Device` error from an NXT reply status
    pub fn device(command: u8, status: u8) -> Self {
        Self::Device {
            command,
            status,
            message: protocol::nxt::status_message(status),
        }
    }

    pub fn transfer(stage: TransferStage, source: HubError) -> Self {
        Self::Transfer {
            stage,
            source: Box::new(source),
        }
    }

    /// Errors after which the session can no longer be used
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost | Self::NotConnected)
    }
}

impl From<common::Error> for HubError {
    fn from(err: common::Error) -> Self {
        match err {
            common::Error::QueueClosed => Self::ConnectionLost,
            common::Error::QueueFull => Self::Connection("event queue full".to_string()),
            common::Error::LogFilter(msg) | common::Error::LoggingInitialised(msg) => {
                Self::Config(msg)
            }
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HubError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(ProtocolError::InvalidReply {
            command: 0,
            reason: format!("malformed JSON: {}", err),
        })
    }
}

/// Type alias for hub results
pub type Result<T> = std::result::Result<T, HubError>;
