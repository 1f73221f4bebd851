//! Reply status codes reported by the brick firmware

use super::opcode;

pub const SUCCESS: u8 = 0x00;
/// A low-speed (I2C) transaction is still in flight
pub const PENDING_COMMUNICATION: u8 = 0x20;
pub const MAILBOX_EMPTY: u8 = 0x40;

/// Map a status byte to its firmware description
pub fn status_message(status: u8) -> &'static str {
    match status {
        0x00 => "Success",
        0x20 => "Pending communication transaction in progress",
        0x40 => "Specified mailbox queue is empty",
        0x81 => "No more handles",
        0x82 => "No space",
        0x83 => "No more files",
        0x84 => "End of file expected",
        0x85 => "End of file",
        0x86 => "Not a linear file",
        0x87 => "File not found",
        0x88 => "Handle already closed",
        0x89 => "No linear space",
        0x8a => "Undefined error",
        0x8b => "File is busy",
        0x8c => "No write buffers",
        0x8d => "Append not possible",
        0x8e => "File is full",
        0x8f => "File exists",
        0x90 => "Module not found",
        0x91 => "Out of bounds",
        0x92 => "Illegal file name",
        0x93 => "Illegal handle",
        0xbd => "Request failed (specified file not found)",
        0xbe => "Unknown command opcode",
        0xbf => "Insane packet",
        0xc0 => "Data contains out-of-range values",
        0xdd => "Communication bus error",
        0xde => "No free memory in communication buffer",
        0xdf => "Specified channel/connection is not valid",
        0xe0 => "Specified channel/connection not configured or busy",
        0xec => "No active program",
        0xed => "Illegal size specified",
        0xee => "Illegal mailbox queue ID specified",
        0xef => "Attempted to access invalid field of a structure",
        0xf0 => "Bad input or output specified",
        0xfb => "Insufficient memory available",
        0xff => "Bad arguments",
        _ => "Unknown error",
    }
}

/// Whether a reply status must be surfaced as a failure.
///
/// LS_GET_STATUS reporting a pending I2C transaction only means the sensor
/// has not answered yet; every other non-zero status is an error.
pub fn is_failure(command: u8, status: u8) -> bool {
    match (command, status) {
        (_, SUCCESS) => false,
        (opcode::LS_GET_STATUS, PENDING_COMMUNICATION) => false,
        _ => true,
    }
}
