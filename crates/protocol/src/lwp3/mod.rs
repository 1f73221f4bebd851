//! LEGO Wireless Protocol v3 (Powered Up, BOOST, SPIKE, Control+)
//!
//! Every LWP3 frame starts with a one byte total length, the hub id (always 0)
//! and the message type:
//!
//! ```text
//! [length][hub id: 0][message type][payload ...]
//! ```
//!
//! Outbound motor and LED commands use the `PORT_OUTPUT_COMMAND` message (see
//! [`OutputCommand`]). Inbound frames are pushed by the hub and decoded into
//! [`Lwp3Message`]; there is no generic request/reply concept.

pub mod command;
pub mod frame;
pub mod message;

use std::fmt;
use std::time::Duration;

pub use command::{
    OutputCommand, alert_request, hub_action, hub_property_request, input_format_setup,
};
pub use frame::{HUB_ID, Lwp3Frame, MAX_FRAME_SIZE};
pub use message::{FirmwareVersion, HubPropertyUpdate, Lwp3Message, decode_message};

/// GATT service exposed by every LWP3 hub
pub const SERVICE_UUID: &str = "00001623-1212-efde-1623-785feabcd123";

/// The single characteristic used for both directions
pub const CHARACTERISTIC_UUID: &str = "00001624-1212-efde-1623-785feabcd123";

/// Maximum outbound messages per second
pub const SEND_RATE_MAX: u32 = 20;

/// RSSI ping period keeping the BLE link alive
pub const PING_INTERVAL: Duration = Duration::from_millis(5000);

/// Message type byte (frame offset 2)
pub mod message_type {
    pub const HUB_PROPERTIES: u8 = 0x01;
    pub const HUB_ACTIONS: u8 = 0x02;
    pub const HUB_ALERTS: u8 = 0x03;
    pub const HUB_ATTACHED_IO: u8 = 0x04;
    pub const GENERIC_ERROR: u8 = 0x05;
    pub const PORT_INPUT_FORMAT_SETUP_SINGLE: u8 = 0x41;
    pub const PORT_VALUE_SINGLE: u8 = 0x45;
    pub const PORT_OUTPUT_COMMAND: u8 = 0x81;
    pub const PORT_OUTPUT_FEEDBACK: u8 = 0x82;
}

/// Hub property references
pub mod hub_property {
    pub const BUTTON: u8 = 0x02;
    pub const FW_VERSION: u8 = 0x03;
    pub const RSSI: u8 = 0x05;
    pub const BATTERY_VOLTAGE: u8 = 0x06;
    pub const SYSTEM_TYPE_ID: u8 = 0x0b;
}

/// Operations carried in a HUB_PROPERTIES frame
pub mod property_operation {
    pub const ENABLE_UPDATES: u8 = 0x02;
    pub const DISABLE_UPDATES: u8 = 0x03;
    pub const REQUEST_UPDATE: u8 = 0x05;
    pub const UPDATE: u8 = 0x06;
}

/// Hub alert types
pub mod alert {
    pub const LOW_VOLTAGE: u8 = 0x01;
    pub const HIGH_CURRENT: u8 = 0x02;
    pub const LOW_SIGNAL_STRENGTH: u8 = 0x03;
    pub const OVER_POWER_CONDITION: u8 = 0x04;
}

/// Operations carried in a HUB_ALERTS frame
pub mod alert_operation {
    pub const ENABLE_UPDATES: u8 = 0x01;
    pub const DISABLE_UPDATES: u8 = 0x02;
    pub const REQUEST_UPDATE: u8 = 0x03;
    pub const UPDATE: u8 = 0x04;
}

/// Hub actions
pub mod hub_action_type {
    pub const SWITCH_OFF_HUB: u8 = 0x01;
    pub const DISCONNECT: u8 = 0x02;
}

/// Port output sub-commands
pub mod subcommand {
    pub const START_POWER: u8 = 0x01;
    pub const SET_ACC_TIME: u8 = 0x05;
    pub const SET_DEC_TIME: u8 = 0x06;
    pub const START_SPEED: u8 = 0x07;
    pub const START_SPEED_FOR_TIME: u8 = 0x09;
    pub const START_SPEED_FOR_DEGREES: u8 = 0x0b;
    pub const GOTO_ABSOLUTE_POSITION: u8 = 0x0d;
    pub const PRESET_ENCODER: u8 = 0x14;
    pub const WRITE_DIRECT_MODE_DATA: u8 = 0x51;
}

/// Startup and completion flags of an output command
pub mod execution {
    pub const BUFFER_IF_NECESSARY: u8 = 0x00;
    pub const COMMAND_FEEDBACK: u8 = 0x01;
    pub const EXECUTE_IMMEDIATELY: u8 = 0x10;
}

/// What a motor does once a timed or positioned run completes
pub mod end_state {
    pub const FLOAT: u8 = 0;
    pub const HOLD: u8 = 127;
    pub const BRAKE: u8 = 128;
}

/// Acceleration profile selector
pub mod profile {
    pub const DO_NOT_USE: u8 = 0x00;
    pub const ACCELERATION: u8 = 0x01;
    pub const DECELERATION: u8 = 0x02;
}

/// Port feedback bit flags (PORT_OUTPUT_FEEDBACK)
pub mod feedback {
    pub const IN_PROGRESS: u8 = 0x01;
    pub const COMPLETED: u8 = 0x02;
    pub const DISCARDED: u8 = 0x04;
    pub const IDLE: u8 = 0x08;
    pub const BUSY_OR_FULL: u8 = 0x10;
}

/// Input modes, numbered per device family
pub mod mode {
    pub const MOTOR_POWER: u8 = 0;
    pub const MOTOR_SPEED: u8 = 1;
    pub const MOTOR_POSITION: u8 = 2;
    pub const MOTOR_ABSOLUTE_POSITION: u8 = 3;

    pub const TILT_ANGLE: u8 = 0;
    pub const TILT_DIRECTION: u8 = 1;
    pub const TILT_IMPACT: u8 = 2;

    pub const COLOR: u8 = 0;
    pub const DISTANCE: u8 = 1;
    pub const COUNT: u8 = 2;
    pub const REFLECTION: u8 = 3;
    pub const AMBIENT: u8 = 4;

    pub const MOTION_DISTANCE: u8 = 0;
    pub const MOTION_COUNT: u8 = 1;

    pub const FORCE: u8 = 0;
    pub const TOUCHED: u8 = 1;
    pub const TAPPED: u8 = 2;
}

/// Event byte of a HUB_ATTACHED_IO frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    Detached,
    Attached,
    AttachedVirtual,
}

impl IoEvent {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Detached),
            0x01 => Some(Self::Attached),
            0x02 => Some(Self::AttachedVirtual),
            _ => None,
        }
    }

    pub fn is_attach(&self) -> bool {
        matches!(self, Self::Attached | Self::AttachedVirtual)
    }
}

/// Hub models reported by the SYSTEM_TYPE_ID property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubType {
    Unknown,
    WeDo2SmartHub,
    MoveHub,
    Hub,
    RemoteControl,
    DuploTrainBase,
    TechnicMediumHub,
    Mario,
    TechnicSmallHub,
}

impl HubType {
    /// Map the raw system type byte; unrecognised values become `Unknown`
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::WeDo2SmartHub,
            2 => Self::MoveHub,
            3 => Self::Hub,
            4 => Self::RemoteControl,
            5 => Self::DuploTrainBase,
            6 => Self::TechnicMediumHub,
            7 => Self::Mario,
            8 => Self::TechnicSmallHub,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown Hub",
            Self::WeDo2SmartHub => "WeDo 2.0 Smart Hub",
            Self::MoveHub => "Boost Move Hub",
            Self::Hub => "Powered Up Hub",
            Self::RemoteControl => "Powered Up Remote",
            Self::DuploTrainBase => "Duplo Train Hub",
            Self::TechnicMediumHub => "Control+ Hub",
            Self::Mario => "Mario",
            Self::TechnicSmallHub => "Technic Small Hub",
        }
    }
}

impl fmt::Display for HubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Colors reported by color sensors in COLOR mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    Pink,
    Purple,
    Blue,
    LightBlue,
    Cyan,
    Green,
    Yellow,
    Orange,
    Red,
    White,
    Brown,
}

impl Color {
    /// Map a sensor color index. 255 ("no reading") and unknown indices yield `None`.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Black),
            1 => Some(Self::Pink),
            2 => Some(Self::Purple),
            3 => Some(Self::Blue),
            4 => Some(Self::LightBlue),
            5 => Some(Self::Cyan),
            6 => Some(Self::Green),
            7 => Some(Self::Yellow),
            8 => Some(Self::Orange),
            9 => Some(Self::Red),
            10 => Some(Self::White),
            11 => Some(Self::Brown),
            _ => None,
        }
    }

    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::Pink => "pink",
            Self::Purple => "purple",
            Self::Blue => "blue",
            Self::LightBlue => "light blue",
            Self::Cyan => "cyan",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Orange => "orange",
            Self::Red => "red",
            Self::White => "white",
            Self::Brown => "brown",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
