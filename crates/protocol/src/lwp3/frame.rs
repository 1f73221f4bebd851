//! LWP3 frame encoding and decoding
//!
//! # Frame Format
//!
//! ```text
//! [Length: u8 (total frame size)][Hub id: u8 = 0][Message type: u8][Payload ...]
//! ```
//!
//! The one byte length form covers frames up to 127 bytes; every message this
//! crate produces or consumes fits in it.

use crate::error::{ProtocolError, Result};

/// Hub id byte; always zero for a directly connected hub
pub const HUB_ID: u8 = 0x00;

/// Largest frame expressible with the one byte length prefix
pub const MAX_FRAME_SIZE: usize = 127;

/// Fixed header: length, hub id, message type
pub const HEADER_LEN: usize = 3;

/// A decoded LWP3 frame with its header stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lwp3Frame {
    /// Message type byte
    pub message_type: u8,
    /// Everything after the message type
    pub payload: Vec<u8>,
}

impl Lwp3Frame {
    pub fn new(message_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// Serialize to wire bytes, filling in the length byte last
    ///
    /// # Example
    /// ```
    /// use protocol::lwp3::Lwp3Frame;
    ///
    /// let bytes = Lwp3Frame::new(0x02, vec![0x01]).encode().unwrap();
    /// assert_eq!(bytes, vec![0x04, 0x00, 0x02, 0x01]);
    /// ```
    pub fn encode(&self) -> Result<Vec<u8>> {
        let size = HEADER_LEN + self.payload.len();
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut frame = Vec::with_capacity(size);
        frame.push(0x00);
        frame.push(HUB_ID);
        frame.push(self.message_type);
        frame.extend_from_slice(&self.payload);
        frame[0] = frame.len() as u8;

        Ok(frame)
    }

    /// Parse wire bytes, checking the length prefix against the delivered size
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::FrameTooShort {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let declared = bytes[0] as usize;
        if declared != bytes.len() {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            message_type: bytes[2],
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

/// Read the message type of a raw frame without decoding it
pub fn peek_message_type(bytes: &[u8]) -> Option<u8> {
    bytes.get(2).copied()
}
