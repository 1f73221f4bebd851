//! Builders for every direct and system command the brick understands

use super::{
    FILENAME_FIELD_LEN, MAX_FILENAME_LEN, Telegram, motor_mode, opcode, regulation, run_state,
    system_opcode, ultrasonic,
};

/// Lowest and highest tone the speaker can play
pub const TONE_MIN_HZ: u16 = 200;
pub const TONE_MAX_HZ: u16 = 14_000;

/// Encode a file or program name into the fixed 20 byte field.
///
/// Names longer than 19 characters are truncated so the field always ends
/// in NUL.
pub fn filename_field(name: &str) -> [u8; FILENAME_FIELD_LEN] {
    let mut field = [0u8; FILENAME_FIELD_LEN];
    for (slot, byte) in field.iter_mut().zip(name.bytes().take(MAX_FILENAME_LEN)) {
        *slot = byte;
    }
    field
}

/// Parameters of a SET_OUT_STATE command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputStateCommand {
    pub port: u8,
    /// -100..=100
    pub power: i8,
    pub mode: u8,
    pub regulation: u8,
    pub turn_ratio: i8,
    pub run_state: u8,
    /// Degrees to run before stopping; 0 runs forever
    pub tacho_limit: u32,
}

impl OutputStateCommand {
    /// Regulated motor run at `power` percent
    pub fn run(port: u8, power: i32) -> Self {
        Self {
            port,
            power: power.clamp(-100, 100) as i8,
            mode: motor_mode::ON | motor_mode::BRAKE | motor_mode::REGULATED,
            regulation: regulation::SPEED,
            turn_ratio: 0,
            run_state: run_state::RUNNING,
            tacho_limit: 0,
        }
    }

    /// Regulated run that stops after `|degrees|`; the sign of `power` sets direction
    pub fn run_for_degrees(port: u8, power: i32, degrees: i32) -> Self {
        let mut cmd = Self::run(port, power);
        cmd.tacho_limit = degrees.unsigned_abs();
        cmd
    }

    /// Stop, either braking or coasting
    pub fn stop(port: u8, brake: bool) -> Self {
        Self {
            port,
            power: 0,
            mode: if brake { motor_mode::BRAKE } else { motor_mode::IDLE },
            regulation: regulation::IDLE,
            turn_ratio: 0,
            run_state: run_state::IDLE,
            tacho_limit: 0,
        }
    }

    pub fn telegram(&self) -> Telegram {
        let mut payload = vec![
            self.port,
            self.power as u8,
            self.mode,
            self.regulation,
            self.turn_ratio as u8,
            self.run_state,
        ];
        payload.extend_from_slice(&self.tacho_limit.to_le_bytes());
        Telegram::direct(opcode::SET_OUT_STATE, payload, false)
    }
}

pub fn start_program(name: &str) -> Telegram {
    Telegram::direct(opcode::START_PROGRAM, filename_field(name).to_vec(), true)
}

pub fn stop_program() -> Telegram {
    Telegram::direct(opcode::STOP_PROGRAM, vec![], true)
}

pub fn play_sound_file(name: &str, repeat: bool) -> Telegram {
    let mut payload = vec![u8::from(repeat)];
    payload.extend_from_slice(&filename_field(name));
    Telegram::direct(opcode::PLAY_SOUND_FILE, payload, false)
}

pub fn stop_sound() -> Telegram {
    Telegram::direct(opcode::STOP_SOUND, vec![], false)
}

/// PLAY_TONE with the frequency clamped to the speaker range
pub fn play_tone(frequency_hz: u32, duration_ms: u32) -> Telegram {
    let frequency = frequency_hz.clamp(TONE_MIN_HZ as u32, TONE_MAX_HZ as u32) as u16;
    let duration = duration_ms.min(u16::MAX as u32) as u16;
    let mut payload = frequency.to_le_bytes().to_vec();
    payload.extend_from_slice(&duration.to_le_bytes());
    Telegram::direct(opcode::PLAY_TONE, payload, false)
}

pub fn get_output_state(port: u8) -> Telegram {
    Telegram::direct(opcode::GET_OUT_STATE, vec![port], true)
}

pub fn set_input_mode(port: u8, sensor_type: u8, sensor_mode: u8) -> Telegram {
    Telegram::direct(opcode::SET_IN_MODE, vec![port, sensor_type, sensor_mode], false)
}

pub fn reset_input_scaled_value(port: u8) -> Telegram {
    Telegram::direct(opcode::RESET_IN_VAL, vec![port], false)
}

pub fn get_input_values(port: u8) -> Telegram {
    Telegram::direct(opcode::GET_IN_VALS, vec![port], true)
}

pub fn reset_motor_position(port: u8, relative: bool) -> Telegram {
    Telegram::direct(opcode::RESET_POSITION, vec![port, u8::from(relative)], false)
}

pub fn get_battery_level() -> Telegram {
    Telegram::direct(opcode::GET_BATT_LVL, vec![], true)
}

pub fn keep_alive() -> Telegram {
    Telegram::direct(opcode::KEEP_ALIVE, vec![], true)
}

pub fn ls_get_status(port: u8) -> Telegram {
    Telegram::direct(opcode::LS_GET_STATUS, vec![port], true)
}

/// LS_WRITE: `[port, tx len, rx len, tx bytes...]`
pub fn ls_write(port: u8, tx: &[u8], rx_len: u8) -> Telegram {
    let mut payload = vec![port, tx.len() as u8, rx_len];
    payload.extend_from_slice(tx);
    Telegram::direct(opcode::LS_WRITE, payload, false)
}

pub fn ls_read(port: u8) -> Telegram {
    Telegram::direct(opcode::LS_READ, vec![port], true)
}

/// Ask the ultrasonic sensor for one distance byte
pub fn ultrasonic_distance_request(port: u8) -> Telegram {
    ls_write(
        port,
        &[ultrasonic::I2C_ADDRESS, ultrasonic::DISTANCE_REGISTER],
        1,
    )
}

/// MESSAGE_WRITE: `[mailbox, size incl. NUL, text..., 0]`
pub fn message_write(mailbox: u8, text: &str) -> Telegram {
    // Size byte covers the terminating NUL
    let bytes: Vec<u8> = text.bytes().take(u8::MAX as usize - 1).collect();
    let mut payload = Vec::with_capacity(bytes.len() + 3);
    payload.push(mailbox);
    payload.push((bytes.len() + 1) as u8);
    payload.extend_from_slice(&bytes);
    payload.push(0);
    Telegram::direct(opcode::MESSAGE_WRITE, payload, false)
}

pub fn message_read(remote_inbox: u8, local_inbox: u8, remove: bool) -> Telegram {
    Telegram::direct(
        opcode::MESSAGE_READ,
        vec![remote_inbox, local_inbox, u8::from(remove)],
        true,
    )
}

pub fn get_current_program_name() -> Telegram {
    Telegram::direct(opcode::GET_CURR_PROGRAM, vec![], true)
}

pub fn get_firmware_version() -> Telegram {
    Telegram::system(system_opcode::GET_FIRMWARE_VERSION, vec![], true)
}

pub fn get_device_info() -> Telegram {
    Telegram::system(system_opcode::GET_DEVICE_INFO, vec![], true)
}

/// READ_IO_MAP: `[module u32, offset u16, size u16]`
pub fn read_io_map(module: u32, offset: u16, size: u16) -> Telegram {
    let mut payload = module.to_le_bytes().to_vec();
    payload.extend_from_slice(&offset.to_le_bytes());
    payload.extend_from_slice(&size.to_le_bytes());
    Telegram::system(system_opcode::READ_IO_MAP, payload, true)
}

/// WRITE_IO_MAP: `[module u32, offset u16, size u16, data...]`
pub fn write_io_map(module: u32, offset: u16, data: &[u8]) -> Telegram {
    let mut payload = module.to_le_bytes().to_vec();
    payload.extend_from_slice(&offset.to_le_bytes());
    payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
    payload.extend_from_slice(data);
    Telegram::system(system_opcode::WRITE_IO_MAP, payload, true)
}

/// SET_BRICK_NAME with a 16 byte, NUL padded name field
pub fn set_brick_name(name: &str) -> Telegram {
    let mut field = [0u8; 16];
    for (slot, byte) in field.iter_mut().zip(name.bytes().take(15)) {
        *slot = byte;
    }
    Telegram::system(system_opcode::SET_BRICK_NAME, field.to_vec(), true)
}

pub fn delete_file(name: &str) -> Telegram {
    Telegram::system(system_opcode::DELETE, filename_field(name).to_vec(), true)
}

/// OPEN_WRITE: `[name: 20 bytes][size u32]`
pub fn open_write(name: &str, size: u32) -> Telegram {
    let mut payload = filename_field(name).to_vec();
    payload.extend_from_slice(&size.to_le_bytes());
    Telegram::system(system_opcode::OPEN_WRITE, payload, true)
}

pub fn write(handle: u8, chunk: &[u8]) -> Telegram {
    let mut payload = Vec::with_capacity(1 + chunk.len());
    payload.push(handle);
    payload.extend_from_slice(chunk);
    Telegram::system(system_opcode::WRITE, payload, true)
}

pub fn close(handle: u8) -> Telegram {
    Telegram::system(system_opcode::CLOSE, vec![handle], true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_field_truncates_to_19() {
        let field = filename_field("a_very_long_program_name.rxe");
        assert_eq!(&field[..19], b"a_very_long_program");
        assert_eq!(field[19], 0);

        let short = filename_field("x.rxe");
        assert_eq!(&short[..5], b"x.rxe");
        assert!(short[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_set_motor_power_layout() {
        let t = OutputStateCommand::run(1, -75).telegram();
        assert_eq!(t.opcode, opcode::SET_OUT_STATE);
        assert!(!t.expects_reply());
        assert_eq!(t.payload, vec![1, 0xb5, 0x07, 0x01, 0x00, 0x20, 0, 0, 0, 0]);
    }

    #[test]
    fn test_run_for_degrees_uses_absolute_limit() {
        let cmd = OutputStateCommand::run_for_degrees(0, 50, -720);
        assert_eq!(cmd.tacho_limit, 720);
        assert_eq!(&cmd.telegram().payload[6..], &720u32.to_le_bytes());
    }

    #[test]
    fn test_stop_brake_and_coast() {
        assert_eq!(
            OutputStateCommand::stop(2, true).telegram().payload,
            vec![2, 0, 0x02, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(OutputStateCommand::stop(2, false).mode, motor_mode::IDLE);
    }

    #[test]
    fn test_play_tone_clamps_frequency() {
        let t = play_tone(50, 500);
        assert_eq!(t.payload, vec![0xc8, 0x00, 0xf4, 0x01]);
        let t = play_tone(20_000, 100);
        assert_eq!(&t.payload[..2], &14_000u16.to_le_bytes());
    }

    #[test]
    fn test_message_write_counts_nul() {
        let t = message_write(0, "hi");
        assert_eq!(t.payload, vec![0, 3, b'h', b'i', 0]);
    }

    #[test]
    fn test_ultrasonic_request() {
        let t = ultrasonic_distance_request(3);
        assert_eq!(t.payload, vec![3, 2, 1, 0x02, 0x42]);
        assert!(!t.expects_reply());
    }

    #[test]
    fn test_io_map_payloads() {
        let t = read_io_map(0x000a_0001, 119, 32);
        assert_eq!(t.payload, vec![0x01, 0x00, 0x0a, 0x00, 119, 0, 32, 0]);

        let t = write_io_map(0x000a_0001, 151, &[0xff; 3]);
        assert_eq!(&t.payload[4..8], &[151, 0, 3, 0]);
        assert_eq!(&t.payload[8..], &[0xff; 3]);
    }

    #[test]
    fn test_open_write_layout() {
        let t = open_write("prog.rxe", 40);
        assert!(t.is_system());
        assert_eq!(t.payload.len(), 24);
        assert_eq!(&t.payload[20..], &[40, 0, 0, 0]);
    }
}
