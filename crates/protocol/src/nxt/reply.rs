//! Typed views of reply telegrams
//!
//! Offsets index the reply body (`[0x02][opcode][status]...`), so the first
//! payload field is always at offset 3.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::Reply;
use super::status::PENDING_COMMUNICATION;
use crate::error::Result;

/// GET_OUT_STATE reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputState {
    pub port: u8,
    pub power: i8,
    pub mode: u8,
    pub regulation: u8,
    pub turn_ratio: i8,
    pub run_state: u8,
    pub tacho_limit: u32,
    /// Count since the last motor command reset
    pub tacho_count: i32,
    /// Count relative to the last programmed movement
    pub block_tacho_count: i32,
    /// Count since the last RESET_POSITION
    pub rotation_count: i32,
}

impl OutputState {
    pub const REPLY_LEN: usize = 25;

    pub fn from_reply(reply: &Reply) -> Result<Self> {
        reply.require_len(Self::REPLY_LEN)?;
        let b = reply.bytes();
        Ok(Self {
            port: b[3],
            power: b[4] as i8,
            mode: b[5],
            regulation: b[6],
            turn_ratio: b[7] as i8,
            run_state: b[8],
            tacho_limit: LittleEndian::read_u32(&b[9..13]),
            tacho_count: LittleEndian::read_i32(&b[13..17]),
            block_tacho_count: LittleEndian::read_i32(&b[17..21]),
            rotation_count: LittleEndian::read_i32(&b[21..25]),
        })
    }

    /// Shaft angle in 0..360 derived from the rotation count
    pub fn position(&self) -> i32 {
        self.rotation_count.rem_euclid(360)
    }
}

/// GET_IN_VALS reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputValues {
    pub port: u8,
    pub valid: bool,
    pub calibrated: bool,
    pub sensor_type: u8,
    pub sensor_mode: u8,
    pub raw: u16,
    pub normalized: u16,
    pub scaled: i16,
    pub calibrated_value: i16,
}

impl InputValues {
    pub const REPLY_LEN: usize = 16;

    pub fn from_reply(reply: &Reply) -> Result<Self> {
        reply.require_len(Self::REPLY_LEN)?;
        let b = reply.bytes();
        Ok(Self {
            port: b[3],
            valid: b[4] != 0,
            calibrated: b[5] != 0,
            sensor_type: b[6],
            sensor_mode: b[7],
            raw: LittleEndian::read_u16(&b[8..10]),
            normalized: LittleEndian::read_u16(&b[10..12]),
            scaled: LittleEndian::read_i16(&b[12..14]),
            calibrated_value: LittleEndian::read_i16(&b[14..16]),
        })
    }
}

/// GET_BATT_LVL reply, in millivolts
pub fn battery_millivolts(reply: &Reply) -> Result<u16> {
    reply.require_len(5)?;
    Ok(LittleEndian::read_u16(&reply.bytes()[3..5]))
}

/// KEEP_ALIVE reply: the brick's configured sleep time in milliseconds
pub fn keep_alive_sleep_ms(reply: &Reply) -> Result<u32> {
    reply.require_len(7)?;
    Ok(LittleEndian::read_u32(&reply.bytes()[3..7]))
}

/// LS_GET_STATUS reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsStatus {
    /// Number of bytes waiting to be read
    Ready(u8),
    /// The I2C transaction has not finished yet
    Pending,
}

impl LsStatus {
    pub fn from_reply(reply: &Reply) -> Result<Self> {
        if reply.status() == PENDING_COMMUNICATION {
            return Ok(Self::Pending);
        }
        reply.require_len(4)?;
        Ok(Self::Ready(reply.bytes()[3]))
    }

    pub fn bytes_ready(&self) -> u8 {
        match self {
            Self::Ready(n) => *n,
            Self::Pending => 0,
        }
    }
}

/// LS_READ reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsRead {
    pub data: Vec<u8>,
}

impl LsRead {
    pub fn from_reply(reply: &Reply) -> Result<Self> {
        reply.require_len(4)?;
        let b = reply.bytes();
        let count = b[3] as usize;
        let end = (4 + count).min(b.len());
        Ok(Self {
            data: b[4..end].to_vec(),
        })
    }

    /// First byte as an ultrasonic distance in cm; 0 and 255 mean no echo
    pub fn distance_cm(&self) -> Option<u8> {
        match self.data.first() {
            None | Some(0) | Some(255) => None,
            Some(&d) => Some(d),
        }
    }
}

/// GET_FIRMWARE_VERSION reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub protocol_major: u8,
    pub protocol_minor: u8,
    pub firmware_major: u8,
    pub firmware_minor: u8,
}

impl FirmwareInfo {
    pub const REPLY_LEN: usize = 7;

    pub fn from_reply(reply: &Reply) -> Result<Self> {
        reply.require_len(Self::REPLY_LEN)?;
        let b = reply.bytes();
        Ok(Self {
            protocol_minor: b[3],
            protocol_major: b[4],
            firmware_minor: b[5],
            firmware_major: b[6],
        })
    }

    pub fn protocol(&self) -> String {
        format!("{}.{}", self.protocol_major, self.protocol_minor)
    }

    pub fn firmware(&self) -> String {
        format!("{}.{:02}", self.firmware_major, self.firmware_minor)
    }
}

/// GET_DEVICE_INFO reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    /// Bluetooth address as `XX:XX:XX:XX:XX:XX`
    pub address: String,
    pub signal_strength: u32,
    pub free_flash: u32,
}

impl DeviceInfo {
    pub const REPLY_LEN: usize = 33;

    pub fn from_reply(reply: &Reply) -> Result<Self> {
        reply.require_len(Self::REPLY_LEN)?;
        let b = reply.bytes();
        let address = b[18..24]
            .iter()
            .map(|byte| format!("{:02X}", byte))
            .collect::<Vec<_>>()
            .join(":");
        Ok(Self {
            name: nul_terminated(&b[3..18]),
            address,
            signal_strength: LittleEndian::read_u32(&b[25..29]),
            free_flash: LittleEndian::read_u32(&b[29..33]),
        })
    }
}

/// READ_IO_MAP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoMapRead {
    pub module: u32,
    pub data: Vec<u8>,
}

impl IoMapRead {
    pub fn from_reply(reply: &Reply) -> Result<Self> {
        reply.require_len(9)?;
        let b = reply.bytes();
        let size = LittleEndian::read_u16(&b[7..9]) as usize;
        let end = (9 + size).min(b.len());
        Ok(Self {
            module: LittleEndian::read_u32(&b[3..7]),
            data: b[9..end].to_vec(),
        })
    }
}

/// WRITE_IO_MAP reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoMapWrite {
    pub module: u32,
    pub size: u16,
}

impl IoMapWrite {
    pub fn from_reply(reply: &Reply) -> Result<Self> {
        reply.require_len(9)?;
        let b = reply.bytes();
        Ok(Self {
            module: LittleEndian::read_u32(&b[3..7]),
            size: LittleEndian::read_u16(&b[7..9]),
        })
    }
}

/// MESSAGE_READ reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRead {
    pub local_inbox: u8,
    pub message: String,
}

impl MessageRead {
    pub fn from_reply(reply: &Reply) -> Result<Self> {
        reply.require_len(5)?;
        let b = reply.bytes();
        let size = b[4] as usize;
        let end = (5 + size).min(b.len());
        Ok(Self {
            local_inbox: b[3],
            message: nul_terminated(&b[5..end]),
        })
    }
}

/// OPEN_WRITE reply: the handle assigned by the brick
pub fn open_write_handle(reply: &Reply) -> Result<u8> {
    reply.require_len(4)?;
    Ok(reply.bytes()[3])
}

/// WRITE reply: bytes the brick accepted
pub fn bytes_written(reply: &Reply) -> Result<u16> {
    reply.require_len(6)?;
    Ok(LittleEndian::read_u16(&reply.bytes()[4..6]))
}

/// GET_CURR_PROGRAM reply
pub fn current_program_name(reply: &Reply) -> Result<String> {
    reply.require_len(4)?;
    let b = reply.bytes();
    let end = (3 + super::FILENAME_FIELD_LEN).min(b.len());
    Ok(nul_terminated(&b[3..end]))
}

fn nul_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
