//! Inbound LWP3 message decoding

use std::fmt;

use super::frame::Lwp3Frame;
use super::{
    HubType, IoEvent, alert_operation, hub_property, message_type, property_operation,
};
use crate::error::{ProtocolError, Result};

/// Firmware version packed into an int32 (major/minor nibbles, bugfix, build)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub bugfix: u8,
    pub build: u16,
}

impl FirmwareVersion {
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self {
            major: bytes[3] >> 4,
            minor: bytes[3] & 0x0f,
            bugfix: bytes[2],
            build: u16::from_le_bytes([bytes[0], bytes[1]]),
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{:02}.{:04}",
            self.major, self.minor, self.bugfix, self.build
        )
    }
}

/// Decoded HUB_PROPERTIES update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubPropertyUpdate {
    SystemType(HubType),
    Button(bool),
    /// Battery level in percent
    Battery(u8),
    /// Signal strength in dBm
    Rssi(i16),
    FirmwareVersion(FirmwareVersion),
    Other { property: u8, value: Vec<u8> },
}

/// A decoded inbound LWP3 message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lwp3Message {
    HubProperty(HubPropertyUpdate),
    HubAlert {
        alert: u8,
        active: bool,
    },
    AttachedIo {
        port: u8,
        event: IoEvent,
        device_type: u8,
    },
    Error {
        command: u8,
        code: u8,
    },
    /// Raw sensor/motor value; the layout depends on the port's device type
    PortValue {
        port: u8,
        value: Vec<u8>,
    },
    PortFeedback {
        port: u8,
        feedback: u8,
    },
    /// Anything not acted upon (unknown types, non-update property operations)
    Unhandled {
        message_type: u8,
    },
}

/// Decode an inbound frame
pub fn decode_message(bytes: &[u8]) -> Result<Lwp3Message> {
    let frame = Lwp3Frame::decode(bytes)?;
    let p = &frame.payload;

    let message = match frame.message_type {
        message_type::HUB_PROPERTIES => {
            require(bytes, p, 3)?;
            if p[1] != property_operation::UPDATE {
                return Ok(Lwp3Message::Unhandled {
                    message_type: frame.message_type,
                });
            }
            Lwp3Message::HubProperty(decode_property(bytes, p[0], &p[2..])?)
        }
        message_type::HUB_ALERTS => {
            require(bytes, p, 3)?;
            if p[1] != alert_operation::UPDATE {
                return Ok(Lwp3Message::Unhandled {
                    message_type: frame.message_type,
                });
            }
            Lwp3Message::HubAlert {
                alert: p[0],
                active: p[2] == 0xff,
            }
        }
        message_type::HUB_ATTACHED_IO => {
            require(bytes, p, 2)?;
            let event = IoEvent::from_byte(p[1]).ok_or_else(|| ProtocolError::InvalidReply {
                command: frame.message_type,
                reason: format!("unknown attach event {}", p[1]),
            })?;
            let device_type = if event.is_attach() {
                require(bytes, p, 3)?;
                p[2]
            } else {
                0
            };
            Lwp3Message::AttachedIo {
                port: p[0],
                event,
                device_type,
            }
        }
        message_type::GENERIC_ERROR => {
            require(bytes, p, 2)?;
            Lwp3Message::Error {
                command: p[0],
                code: p[1],
            }
        }
        message_type::PORT_VALUE_SINGLE => {
            require(bytes, p, 1)?;
            Lwp3Message::PortValue {
                port: p[0],
                value: p[1..].to_vec(),
            }
        }
        message_type::PORT_OUTPUT_FEEDBACK => {
            require(bytes, p, 2)?;
            Lwp3Message::PortFeedback {
                port: p[0],
                feedback: p[1],
            }
        }
        other => Lwp3Message::Unhandled {
            message_type: other,
        },
    };

    Ok(message)
}

fn decode_property(bytes: &[u8], property: u8, value: &[u8]) -> Result<HubPropertyUpdate> {
    let update = match property {
        hub_property::SYSTEM_TYPE_ID => HubPropertyUpdate::SystemType(HubType::from_byte(value[0])),
        hub_property::BUTTON => HubPropertyUpdate::Button(value[0] == 1),
        hub_property::BATTERY_VOLTAGE => HubPropertyUpdate::Battery(value[0]),
        hub_property::RSSI => HubPropertyUpdate::Rssi(i16::from(value[0]) - 256),
        hub_property::FW_VERSION => {
            let raw: [u8; 4] = value
                .get(..4)
                .and_then(|s| s.try_into().ok())
                .ok_or(ProtocolError::FrameTooShort {
                    expected: 9,
                    actual: bytes.len(),
                })?;
            HubPropertyUpdate::FirmwareVersion(FirmwareVersion::from_le_bytes(raw))
        }
        other => HubPropertyUpdate::Other {
            property: other,
            value: value.to_vec(),
        },
    };
    Ok(update)
}

fn require(bytes: &[u8], payload: &[u8], needed: usize) -> Result<()> {
    if payload.len() < needed {
        return Err(ProtocolError::FrameTooShort {
            expected: 3 + needed,
            actual: bytes.len(),
        });
    }
    Ok(())
}
