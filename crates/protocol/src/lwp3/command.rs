//! Outbound LWP3 commands
//!
//! [`OutputCommand`] covers the `PORT_OUTPUT_COMMAND` family; the free functions
//! build the fixed-layout hub property, alert, action and input-format frames.

use super::frame::{HEADER_LEN, Lwp3Frame};
use super::{end_state, execution, message_type, profile, subcommand};
use crate::error::{ProtocolError, Result};

/// Longest timed run expressible in the u16 millisecond field
pub const MAX_RUN_TIME_MS: u32 = u16::MAX as u32;

/// Longest acceleration/deceleration ramp accepted by the hub
pub const MAX_RAMP_TIME_MS: u32 = 10_000;

/// Maximum power byte sent with speed commands
pub const MAX_POWER: u8 = 100;

/// A port output command: `[len][0][0x81][port][flags][subcommand][payload...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputCommand {
    pub port: u8,
    pub flags: u8,
    pub subcommand: u8,
    pub payload: Vec<u8>,
}

impl OutputCommand {
    pub fn new(port: u8, flags: u8, subcommand: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            port,
            flags,
            subcommand,
            payload: payload.into(),
        }
    }

    /// Serialize to a complete frame
    ///
    /// # Example
    /// ```
    /// use protocol::lwp3::OutputCommand;
    ///
    /// let frame = OutputCommand::new(0x01, 0x11, 0x07, vec![50, 100, 0]).encode().unwrap();
    /// assert_eq!(frame, vec![0x09, 0x00, 0x81, 0x01, 0x11, 0x07, 50, 100, 0]);
    /// ```
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(3 + self.payload.len());
        body.push(self.port);
        body.push(self.flags);
        body.push(self.subcommand);
        body.extend_from_slice(&self.payload);
        Lwp3Frame::new(message_type::PORT_OUTPUT_COMMAND, body).encode()
    }

    /// Parse a frame previously produced by [`OutputCommand::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let frame = Lwp3Frame::decode(bytes)?;
        if frame.message_type != message_type::PORT_OUTPUT_COMMAND {
            return Err(ProtocolError::UnexpectedMessageType {
                expected: message_type::PORT_OUTPUT_COMMAND,
                actual: frame.message_type,
            });
        }
        if frame.payload.len() < 3 {
            return Err(ProtocolError::FrameTooShort {
                expected: HEADER_LEN + 3,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            port: frame.payload[0],
            flags: frame.payload[1],
            subcommand: frame.payload[2],
            payload: frame.payload[3..].to_vec(),
        })
    }

    /// START_SPEED with feedback; `speed` is clamped to -100..=100
    pub fn start_speed(port: u8, speed: i32) -> Self {
        Self::new(
            port,
            execution::EXECUTE_IMMEDIATELY | execution::COMMAND_FEEDBACK,
            subcommand::START_SPEED,
            vec![power_byte(speed), MAX_POWER, profile::DO_NOT_USE],
        )
    }

    /// START_SPEED_FOR_TIME; the run time is clamped to the u16 field
    pub fn start_speed_for_time(port: u8, time_ms: u32, speed: i32, end: u8) -> Self {
        let time = time_ms.min(MAX_RUN_TIME_MS) as u16;
        let mut payload = time.to_le_bytes().to_vec();
        payload.extend_from_slice(&[power_byte(speed), MAX_POWER, end, profile::DO_NOT_USE]);
        Self::new(
            port,
            execution::EXECUTE_IMMEDIATELY | execution::COMMAND_FEEDBACK,
            subcommand::START_SPEED_FOR_TIME,
            payload,
        )
    }

    /// START_SPEED_FOR_DEGREES (tacho motors only)
    pub fn start_speed_for_degrees(port: u8, degrees: i32, speed: i32, end: u8) -> Self {
        let mut payload = degrees.to_le_bytes().to_vec();
        payload.extend_from_slice(&[power_byte(speed), MAX_POWER, end, profile::DO_NOT_USE]);
        Self::new(
            port,
            execution::EXECUTE_IMMEDIATELY | execution::COMMAND_FEEDBACK,
            subcommand::START_SPEED_FOR_DEGREES,
            payload,
        )
    }

    /// GOTO_ABSOLUTE_POSITION (tacho motors only)
    pub fn goto_absolute_position(port: u8, position: i32, speed: i32, end: u8) -> Self {
        let mut payload = position.to_le_bytes().to_vec();
        payload.extend_from_slice(&[power_byte(speed), MAX_POWER, end, profile::DO_NOT_USE]);
        Self::new(
            port,
            execution::EXECUTE_IMMEDIATELY | execution::COMMAND_FEEDBACK,
            subcommand::GOTO_ABSOLUTE_POSITION,
            payload,
        )
    }

    /// SET_ACC_TIME, clamped to 0..=10000 ms
    pub fn set_acceleration(port: u8, time_ms: u32) -> Self {
        Self::ramp(port, subcommand::SET_ACC_TIME, time_ms, profile::ACCELERATION)
    }

    /// SET_DEC_TIME, clamped to 0..=10000 ms
    pub fn set_deceleration(port: u8, time_ms: u32) -> Self {
        Self::ramp(port, subcommand::SET_DEC_TIME, time_ms, profile::DECELERATION)
    }

    fn ramp(port: u8, sub: u8, time_ms: u32, selector: u8) -> Self {
        let time = time_ms.min(MAX_RAMP_TIME_MS) as u16;
        let mut payload = time.to_le_bytes().to_vec();
        payload.push(selector);
        Self::new(port, execution::EXECUTE_IMMEDIATELY, sub, payload)
    }

    /// PRESET_ENCODER: redefine the current position
    pub fn preset_encoder(port: u8, position: i32) -> Self {
        Self::new(
            port,
            execution::EXECUTE_IMMEDIATELY,
            subcommand::PRESET_ENCODER,
            position.to_le_bytes().to_vec(),
        )
    }

    /// WRITE_DIRECT_MODE_DATA in mode 0 (LED brightness, matrix pixels, hub LED color)
    pub fn write_direct(port: u8, data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(1 + data.len());
        payload.push(0x00);
        payload.extend_from_slice(data);
        Self::new(
            port,
            execution::EXECUTE_IMMEDIATELY,
            subcommand::WRITE_DIRECT_MODE_DATA,
            payload,
        )
    }

    /// Brightness in percent, clamped to 0..=100
    pub fn led_brightness(port: u8, brightness: u8) -> Self {
        Self::write_direct(port, &[brightness.min(100)])
    }

    /// Hub LED color from a 0xRRGGBB value
    pub fn hub_led_rgb(port: u8, rgb: u32) -> Self {
        Self::write_direct(
            port,
            &[(rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8],
        )
    }

    /// All nine pixels of the 3x3 color light matrix
    pub fn matrix_pixels(port: u8, pixels: &[u8; 9]) -> Self {
        Self::write_direct(port, pixels)
    }
}

/// Clamp a signed power to -100..=100 and encode it as a two's complement byte
pub fn power_byte(power: i32) -> u8 {
    power.clamp(-100, 100) as i8 as u8
}

/// Default end state for timed and positioned runs
pub const DEFAULT_END_STATE: u8 = end_state::BRAKE;

/// `[5,0,0x01,property,operation]`
pub fn hub_property_request(property: u8, operation: u8) -> Vec<u8> {
    vec![0x05, super::HUB_ID, message_type::HUB_PROPERTIES, property, operation]
}

/// `[5,0,0x03,alert,operation]`
pub fn alert_request(alert: u8, operation: u8) -> Vec<u8> {
    vec![0x05, super::HUB_ID, message_type::HUB_ALERTS, alert, operation]
}

/// `[4,0,0x02,action]`
pub fn hub_action(action: u8) -> Vec<u8> {
    vec![0x04, super::HUB_ID, message_type::HUB_ACTIONS, action]
}

/// PORT_INPUT_FORMAT_SETUP_SINGLE: `[0x0a,0,0x41,port,mode,delta u32 LE,notify]`
pub fn input_format_setup(port: u8, mode: u8, delta: u32, notify: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(10);
    frame.extend_from_slice(&[
        0x0a,
        super::HUB_ID,
        message_type::PORT_INPUT_FORMAT_SETUP_SINGLE,
        port,
        mode,
    ]);
    frame.extend_from_slice(&delta.to_le_bytes());
    frame.push(u8::from(notify));
    frame
}
