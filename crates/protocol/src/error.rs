//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame shorter than the fixed header of its protocol
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    /// Length prefix disagrees with the bytes actually delivered
    #[error("Length mismatch: prefix says {declared} bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Frame length exceeds maximum allowed size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame decoded as a different message type than the caller asked for
    #[error("Unexpected message type 0x{actual:02x} (expected 0x{expected:02x})")]
    UnexpectedMessageType { expected: u8, actual: u8 },

    /// Reply telegram is missing fields required by its command
    #[error("Invalid reply to command 0x{command:02x}: {reason}")]
    InvalidReply { command: u8, reason: String },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
