//! PORT_VALUE decoding per device type and input mode

use std::fmt;

use protocol::lwp3::{Color, mode};
use protocol::{DeviceType, ProtocolError};

/// One decoded quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Int(i32),
    Float(f32),
    Bool(bool),
    Color(Color),
    /// The sensor reported "no reading"
    None,
}

impl Reading {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Color> {
        match self {
            Self::Color(c) => Some(*c),
            _ => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{:.1}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Color(c) => write!(f, "{}", c),
            Self::None => f.write_str("none"),
        }
    }
}

/// Quantities decoded from one PORT_VALUE frame
pub type Readings = Vec<(&'static str, Reading)>;

fn need(value: &[u8], len: usize) -> Result<(), ProtocolError> {
    if value.len() < len {
        // `value` starts at frame offset 4
        return Err(ProtocolError::FrameTooShort {
            expected: 4 + len,
            actual: 4 + value.len(),
        });
    }
    Ok(())
}

/// Decode a PORT_VALUE payload
///
/// `value` holds the frame bytes after the port byte, so `value[0]` is frame
/// byte 4. Combinations without a decoder yield no readings.
pub fn decode_port_value(
    device_type: DeviceType,
    input_mode: u8,
    value: &[u8],
) -> Result<Readings, ProtocolError> {
    let mut readings = Readings::new();

    if device_type.has_tacho() {
        if input_mode == mode::MOTOR_POSITION {
            need(value, 4)?;
            let position = i32::from_le_bytes([value[0], value[1], value[2], value[3]]);
            readings.push(("position", Reading::Int(position)));
        }
        return Ok(readings);
    }

    if device_type.is_tilt() {
        if input_mode == mode::TILT_ANGLE {
            need(value, 2)?;
            readings.push(("tiltX", Reading::Int(i32::from(value[0] as i8))));
            readings.push(("tiltY", Reading::Int(i32::from(value[1] as i8))));
            if value.len() > 2 {
                readings.push(("tiltZ", Reading::Int(i32::from(value[2] as i8))));
            }
        }
        return Ok(readings);
    }

    match device_type {
        DeviceType::ColorDistanceSensor | DeviceType::SpikeColorSensor => {
            need(value, 1)?;
            match input_mode {
                mode::COLOR => {
                    let color = Color::from_index(value[0]).map_or(Reading::None, Reading::Color);
                    readings.push(("color", color));
                }
                mode::DISTANCE => readings.push(("distance", Reading::Int(i32::from(value[0])))),
                mode::REFLECTION => {
                    readings.push(("reflection", Reading::Int(i32::from(value[0]))))
                }
                _ => {}
            }
        }
        DeviceType::SpikeUltrasonicSensor if input_mode == mode::DISTANCE => {
            need(value, 2)?;
            let millimetres = u16::from_le_bytes([value[0], value[1]]);
            // 0xffff: no echo
            let distance = if millimetres == 0xffff {
                Reading::None
            } else {
                Reading::Float(f32::from(millimetres) / 10.0)
            };
            readings.push(("distance", distance));
        }
        DeviceType::MotionSensor if input_mode == mode::MOTION_DISTANCE => {
            need(value, 1)?;
            readings.push(("distance", Reading::Int(i32::from(value[0]))));
        }
        DeviceType::SpikeForceSensor => {
            need(value, 1)?;
            match input_mode {
                mode::FORCE => readings.push(("force", Reading::Float(f32::from(value[0]) * 0.1))),
                mode::TOUCHED => readings.push(("touched", Reading::Bool(value[0] == 1))),
                _ => {}
            }
        }
        _ => {}
    }

    Ok(readings)
}
