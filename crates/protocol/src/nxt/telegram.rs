//! Telegram framing, reply parsing and stream reassembly

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BytesMut};

use super::command_type;
use crate::error::{ProtocolError, Result};

/// Size of the little-endian length prefix
pub const PREFIX_LEN: usize = 2;

/// Largest body the u16 prefix can describe
pub const MAX_TELEGRAM_SIZE: usize = u16::MAX as usize;

/// An outbound direct or system command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    /// Command type byte, including the no-reply bit
    pub command_type: u8,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Telegram {
    /// Direct command; `reply` selects whether the brick answers
    pub fn direct(opcode: u8, payload: impl Into<Vec<u8>>, reply: bool) -> Self {
        Self::with_type(command_type::DIRECT, opcode, payload, reply)
    }

    /// System command; `reply` selects whether the brick answers
    pub fn system(opcode: u8, payload: impl Into<Vec<u8>>, reply: bool) -> Self {
        Self::with_type(command_type::SYSTEM, opcode, payload, reply)
    }

    fn with_type(base: u8, opcode: u8, payload: impl Into<Vec<u8>>, reply: bool) -> Self {
        let command_type = if reply {
            base
        } else {
            base | command_type::NO_REPLY
        };
        Self {
            command_type,
            opcode,
            payload: payload.into(),
        }
    }

    pub fn expects_reply(&self) -> bool {
        self.command_type & command_type::NO_REPLY == 0
    }

    pub fn is_system(&self) -> bool {
        self.command_type & !command_type::NO_REPLY == command_type::SYSTEM
    }

    /// Serialize with the length prefix
    ///
    /// # Example
    /// ```
    /// use protocol::nxt::{Telegram, opcode};
    ///
    /// let bytes = Telegram::direct(opcode::GET_BATT_LVL, vec![], true).encode().unwrap();
    /// assert_eq!(bytes, vec![0x02, 0x00, 0x00, 0x0b]);
    /// ```
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body_len = 2 + self.payload.len();
        if body_len > MAX_TELEGRAM_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: MAX_TELEGRAM_SIZE,
            });
        }

        let mut frame = vec![0u8; PREFIX_LEN];
        LittleEndian::write_u16(&mut frame, body_len as u16);
        frame.push(self.command_type);
        frame.push(self.opcode);
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }

    /// Parse a prefixed outbound telegram (used by mock bricks and tests)
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let body = strip_prefix(frame)?;
        if body.len() < 2 {
            return Err(ProtocolError::FrameTooShort {
                expected: PREFIX_LEN + 2,
                actual: frame.len(),
            });
        }
        Ok(Self {
            command_type: body[0],
            opcode: body[1],
            payload: body[2..].to_vec(),
        })
    }
}

/// A reply telegram body: `[0x02][opcode][status][payload...]`
///
/// Field accessors index the body directly, so offsets match the firmware
/// documentation (status at 2, first payload byte at 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    bytes: Vec<u8>,
}

impl Reply {
    /// Wrap a reply body (length prefix already removed)
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 3 {
            return Err(ProtocolError::FrameTooShort {
                expected: 3,
                actual: body.len(),
            });
        }
        if body[0] != command_type::REPLY {
            return Err(ProtocolError::UnexpectedMessageType {
                expected: command_type::REPLY,
                actual: body[0],
            });
        }
        Ok(Self {
            bytes: body.to_vec(),
        })
    }

    /// Build a reply body from parts, mostly for scripted bricks
    pub fn build(opcode: u8, status: u8, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(3 + payload.len());
        bytes.extend_from_slice(&[command_type::REPLY, opcode, status]);
        bytes.extend_from_slice(payload);
        Self { bytes }
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[1]
    }

    pub fn status(&self) -> u8 {
        self.bytes[2]
    }

    pub fn is_success(&self) -> bool {
        self.status() == super::status::SUCCESS
    }

    /// Full body including type, opcode and status
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes after the status byte
    pub fn payload(&self) -> &[u8] {
        &self.bytes[3..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Fail with `InvalidReply` unless the body carries at least `min` bytes
    pub fn require_len(&self, min: usize) -> Result<()> {
        if self.bytes.len() < min {
            return Err(ProtocolError::InvalidReply {
                command: self.opcode(),
                reason: format!("expected at least {} bytes, got {}", min, self.bytes.len()),
            });
        }
        Ok(())
    }

    /// Serialize with the length prefix
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = vec![0u8; PREFIX_LEN];
        LittleEndian::write_u16(&mut frame, self.bytes.len() as u16);
        frame.extend_from_slice(&self.bytes);
        frame
    }
}

fn strip_prefix(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < PREFIX_LEN {
        return Err(ProtocolError::FrameTooShort {
            expected: PREFIX_LEN,
            actual: frame.len(),
        });
    }
    let declared = LittleEndian::read_u16(frame) as usize;
    let actual = frame.len() - PREFIX_LEN;
    if declared != actual {
        return Err(ProtocolError::LengthMismatch { declared, actual });
    }
    Ok(&frame[PREFIX_LEN..])
}

/// Reassembles telegram bodies from arbitrarily split or coalesced deliveries
#[derive(Debug, Default)]
pub struct TelegramAssembler {
    buffer: BytesMut,
}

impl TelegramAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the transport
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete body (prefix stripped), if one is buffered
    pub fn next_body(&mut self) -> Option<Vec<u8>> {
        if self.buffer.len() < PREFIX_LEN {
            return None;
        }
        let length = LittleEndian::read_u16(&self.buffer[..PREFIX_LEN]) as usize;
        if self.buffer.len() < PREFIX_LEN + length {
            return None;
        }
        self.buffer.advance(PREFIX_LEN);
        Some(self.buffer.split_to(length).to_vec())
    }

    /// Push `bytes` and return every body completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.push(bytes);
        std::iter::from_fn(|| self.next_body()).collect()
    }

    /// Bytes waiting for the rest of their telegram
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
