//! Wire formats spoken by LEGO hubs
//!
//! This crate encodes outbound commands and decodes inbound frames for the two
//! hub families supported by `lego-hub`:
//!
//! - [`lwp3`]: LEGO Wireless Protocol v3 (Powered Up, BOOST, SPIKE, Control+)
//! - [`nxt`]: NXT direct and system command telegrams
//!
//! It is pure and synchronous; transports and sessions live in the `hub` crate.
//!
//! # Example
//!
//! ```
//! use protocol::lwp3::{OutputCommand, Lwp3Message, decode_message};
//!
//! let frame = OutputCommand::start_speed(0x01, 50).encode().unwrap();
//! let decoded = OutputCommand::decode(&frame).unwrap();
//! assert_eq!(decoded.port, 0x01);
//!
//! let attach = decode_message(&[0x06, 0x00, 0x04, 0x01, 0x01, 0x30]).unwrap();
//! assert!(matches!(attach, Lwp3Message::AttachedIo { port: 1, device_type: 0x30, .. }));
//! ```
//!
//! # NXT telegrams
//!
//! ```
//! use protocol::nxt::{Reply, TelegramAssembler, command, reply};
//!
//! let frame = command::get_battery_level().encode().unwrap();
//! assert_eq!(frame[0] as usize, frame.len() - 2);
//!
//! let mut assembler = TelegramAssembler::new();
//! let bodies = assembler.feed(&[0x05, 0x00, 0x02, 0x0b, 0x00, 0x70, 0x17]);
//! let battery = Reply::parse(&bodies[0]).unwrap();
//! assert_eq!(reply::battery_millivolts(&battery).unwrap(), 6000);
//! ```

pub mod device;
pub mod error;
pub mod lwp3;
pub mod nxt;

pub use device::{DeviceKind, DeviceType, UNDEFINED_IDENTIFIERS};
pub use error::{ProtocolError, Result};
