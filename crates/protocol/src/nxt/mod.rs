//! NXT direct and system command telegrams
//!
//! A telegram on the Bluetooth link is prefixed by its body length as a
//! little-endian u16:
//!
//! ```text
//! [len lo][len hi][command type][opcode][payload ...]
//! ```
//!
//! Replies come back as `[0x02][opcode][status][payload ...]` behind the same
//! length prefix. The brick answers requests strictly in order, so replies are
//! matched to requests by position rather than by id.

pub mod command;
pub mod reply;
pub mod status;
pub mod telegram;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use reply::{
    DeviceInfo, FirmwareInfo, InputValues, IoMapRead, IoMapWrite, LsRead, LsStatus, MessageRead,
    OutputState,
};
pub use status::status_message;
pub use telegram::{Reply, Telegram, TelegramAssembler};

/// Maximum outbound telegrams per second
pub const SEND_RATE_MAX: u32 = 40;

/// Default wait for a reply before the request is abandoned
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Pairing PIN the brick ships with
pub const PAIRING_PIN: &str = "1234";

/// Longest file name the brick accepts (the 20 byte field keeps a terminating NUL)
pub const MAX_FILENAME_LEN: usize = 19;

/// Width of a file name field on the wire
pub const FILENAME_FIELD_LEN: usize = 20;

/// Largest WRITE chunk used by uploads
pub const MAX_WRITE_CHUNK: usize = 32;

/// IO map module holding the LCD buffer
pub const MODULE_DISPLAY: u32 = 0x000a_0001;
/// Offset of the screen buffer inside the display module
pub const DISPLAY_OFFSET: u16 = 119;
pub const DISPLAY_WIDTH: usize = 100;
pub const DISPLAY_HEIGHT: usize = 64;
/// One bit per pixel, 8 pixel rows per byte
pub const DISPLAY_BUFFER_SIZE: usize = DISPLAY_WIDTH * DISPLAY_HEIGHT / 8;
/// IO map read size used when fetching the screen
pub const DISPLAY_READ_CHUNK: usize = 32;
/// IO map write size used when pushing the screen
pub const DISPLAY_WRITE_CHUNK: usize = 59;

/// Command type byte (offset 0 of the telegram body)
pub mod command_type {
    pub const DIRECT: u8 = 0x00;
    pub const SYSTEM: u8 = 0x01;
    pub const REPLY: u8 = 0x02;
    /// OR-ed into DIRECT/SYSTEM when no reply is wanted
    pub const NO_REPLY: u8 = 0x80;
}

/// Direct command opcodes
pub mod opcode {
    pub const START_PROGRAM: u8 = 0x00;
    pub const STOP_PROGRAM: u8 = 0x01;
    pub const PLAY_SOUND_FILE: u8 = 0x02;
    pub const PLAY_TONE: u8 = 0x03;
    pub const SET_OUT_STATE: u8 = 0x04;
    pub const SET_IN_MODE: u8 = 0x05;
    pub const GET_OUT_STATE: u8 = 0x06;
    pub const GET_IN_VALS: u8 = 0x07;
    pub const RESET_IN_VAL: u8 = 0x08;
    pub const MESSAGE_WRITE: u8 = 0x09;
    pub const RESET_POSITION: u8 = 0x0a;
    pub const GET_BATT_LVL: u8 = 0x0b;
    pub const STOP_SOUND: u8 = 0x0c;
    pub const KEEP_ALIVE: u8 = 0x0d;
    pub const LS_GET_STATUS: u8 = 0x0e;
    pub const LS_WRITE: u8 = 0x0f;
    pub const LS_READ: u8 = 0x10;
    pub const GET_CURR_PROGRAM: u8 = 0x11;
    pub const MESSAGE_READ: u8 = 0x13;
}

/// System command opcodes
pub mod system_opcode {
    pub const OPEN_READ: u8 = 0x80;
    pub const OPEN_WRITE: u8 = 0x81;
    pub const READ: u8 = 0x82;
    pub const WRITE: u8 = 0x83;
    pub const CLOSE: u8 = 0x84;
    pub const DELETE: u8 = 0x85;
    pub const GET_FIRMWARE_VERSION: u8 = 0x88;
    pub const READ_IO_MAP: u8 = 0x94;
    pub const WRITE_IO_MAP: u8 = 0x95;
    pub const SET_BRICK_NAME: u8 = 0x98;
    pub const GET_DEVICE_INFO: u8 = 0x9b;
}

/// SET_OUT_STATE mode bits
pub mod motor_mode {
    pub const IDLE: u8 = 0x00;
    pub const ON: u8 = 0x01;
    pub const BRAKE: u8 = 0x02;
    pub const REGULATED: u8 = 0x04;
}

pub mod regulation {
    pub const IDLE: u8 = 0x00;
    pub const SPEED: u8 = 0x01;
    pub const SYNC: u8 = 0x02;
}

pub mod run_state {
    pub const IDLE: u8 = 0x00;
    pub const RAMP_UP: u8 = 0x10;
    pub const RUNNING: u8 = 0x20;
    pub const RAMP_DOWN: u8 = 0x40;
}

/// Sensor types for SET_IN_MODE
pub mod sensor_type {
    pub const NO_SENSOR: u8 = 0x00;
    pub const SWITCH: u8 = 0x01;
    pub const TEMPERATURE: u8 = 0x02;
    pub const REFLECTION: u8 = 0x03;
    pub const ANGLE: u8 = 0x04;
    pub const LIGHT_ACTIVE: u8 = 0x05;
    pub const LIGHT_INACTIVE: u8 = 0x06;
    pub const SOUND_DB: u8 = 0x07;
    pub const SOUND_DBA: u8 = 0x08;
    pub const CUSTOM: u8 = 0x09;
    pub const LOW_SPEED: u8 = 0x0a;
    pub const LOW_SPEED_9V: u8 = 0x0b;
    pub const COLOR_FULL: u8 = 0x0d;
    pub const COLOR_RED: u8 = 0x0e;
    pub const COLOR_GREEN: u8 = 0x0f;
    pub const COLOR_BLUE: u8 = 0x10;
    pub const COLOR_NONE: u8 = 0x11;

    /// Human readable sensor type
    pub fn name(sensor_type: u8) -> &'static str {
        match sensor_type {
            NO_SENSOR => "none",
            SWITCH => "touch",
            TEMPERATURE => "temperature",
            REFLECTION => "reflection",
            ANGLE => "angle",
            LIGHT_ACTIVE | LIGHT_INACTIVE => "light",
            SOUND_DB | SOUND_DBA => "sound",
            CUSTOM => "custom",
            LOW_SPEED | LOW_SPEED_9V => "digital",
            COLOR_FULL => "color",
            COLOR_RED | COLOR_GREEN | COLOR_BLUE | COLOR_NONE => "color lamp",
            _ => "unknown",
        }
    }
}

/// Sensor modes for SET_IN_MODE
pub mod sensor_mode {
    pub const RAW: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x20;
    pub const TRANSITION_COUNT: u8 = 0x40;
    pub const PERIOD_COUNTER: u8 = 0x60;
    pub const PCT_FULL_SCALE: u8 = 0x80;
    pub const CELSIUS: u8 = 0xa0;
    pub const FAHRENHEIT: u8 = 0xc0;
    pub const ANGLE_STEPS: u8 = 0xe0;
}

/// I2C address and distance register of the ultrasonic sensor
pub mod ultrasonic {
    pub const I2C_ADDRESS: u8 = 0x02;
    pub const DISTANCE_REGISTER: u8 = 0x42;
}

/// Error returned when a port name does not parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPort(pub String);

impl fmt::Display for InvalidPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid port '{}'", self.0)
    }
}

impl std::error::Error for InvalidPort {}

/// Motor output ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputPort {
    A,
    B,
    C,
}

impl OutputPort {
    pub const ALL: [OutputPort; 3] = [Self::A, Self::B, Self::C];

    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputPort {
    type Err = InvalidPort;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            _ => Err(InvalidPort(s.to_string())),
        }
    }
}

/// Sensor input ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputPort {
    S1,
    S2,
    S3,
    S4,
}

impl InputPort {
    pub const ALL: [InputPort; 4] = [Self::S1, Self::S2, Self::S3, Self::S4];

    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.index() + 1)
    }
}

impl FromStr for InputPort {
    type Err = InvalidPort;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S1" | "1" => Ok(Self::S1),
            "S2" | "2" => Ok(Self::S2),
            "S3" | "3" => Ok(Self::S3),
            "S4" | "4" => Ok(Self::S4),
            _ => Err(InvalidPort(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_parsing() {
        assert_eq!("b".parse::<OutputPort>().unwrap(), OutputPort::B);
        assert_eq!(OutputPort::C.index(), 2);
        assert!("D".parse::<OutputPort>().is_err());

        assert_eq!("S3".parse::<InputPort>().unwrap().index(), 2);
        assert_eq!("4".parse::<InputPort>().unwrap(), InputPort::S4);
        assert_eq!(InputPort::S1.to_string(), "S1");
        assert!(InputPort::from_index(4).is_none());
    }

    #[test]
    fn test_display_geometry() {
        assert_eq!(DISPLAY_BUFFER_SIZE, 800);
    }

    #[test]
    fn test_sensor_type_names() {
        assert_eq!(sensor_type::name(sensor_type::SWITCH), "touch");
        assert_eq!(sensor_type::name(sensor_type::LOW_SPEED_9V), "digital");
        assert_eq!(sensor_type::name(0x0c), "unknown");
    }
}
