//! Integration tests for the LWP3 and NXT codecs
//!
//! Covers framing invariants (length prefixes), output command round-trips and
//! stream reassembly under arbitrary splits.

use protocol::lwp3::{self, Lwp3Frame, Lwp3Message, OutputCommand, decode_message};
use protocol::nxt::{self, Reply, Telegram, TelegramAssembler, command, reply};
use protocol::{DeviceKind, DeviceType, ProtocolError};

mod lwp3_frames {
    use super::*;

    #[test]
    fn test_attach_then_value_sequence() {
        let frames: Vec<Vec<u8>> = vec![
            vec![0x0f, 0x00, 0x04, 0x00, 0x01, 0x31, 0x00, 0, 0, 0, 0, 0, 0, 0, 0],
            vec![0x08, 0x00, 0x45, 0x00, 0x68, 0x01, 0x00, 0x00],
        ];

        let decoded: Vec<Lwp3Message> = frames
            .iter()
            .map(|f| decode_message(f).expect("decode"))
            .collect();

        assert!(matches!(
            decoded[0],
            Lwp3Message::AttachedIo {
                port: 0,
                device_type: 0x31,
                ..
            }
        ));
        let Lwp3Message::PortValue { port, value } = &decoded[1] else {
            panic!("Expected port value, got {:?}", decoded[1]);
        };
        assert_eq!(*port, 0);
        assert_eq!(i32::from_le_bytes([value[0], value[1], value[2], value[3]]), 360);
    }

    #[test]
    fn test_unknown_message_type_is_unhandled() {
        let msg = decode_message(&[0x04, 0x00, 0x66, 0x00]).unwrap();
        assert_eq!(msg, Lwp3Message::Unhandled { message_type: 0x66 });
    }

    #[test]
    fn test_rejects_inconsistent_length() {
        let result = decode_message(&[0x07, 0x00, 0x45, 0x00, 0x01]);
        let Err(ProtocolError::LengthMismatch { declared, actual }) = result else {
            panic!("Expected LengthMismatch, got {:?}", result);
        };
        assert_eq!(declared, 7);
        assert_eq!(actual, 5);
    }

    #[test]
    fn test_shutdown_frame() {
        assert_eq!(
            lwp3::hub_action(lwp3::hub_action_type::SWITCH_OFF_HUB),
            vec![4, 0, 0x02, 0x01]
        );
    }

    #[test]
    fn test_frame_header_constant() {
        let frame = Lwp3Frame::new(lwp3::message_type::HUB_PROPERTIES, vec![0x0b, 0x05])
            .encode()
            .unwrap();
        assert_eq!(frame[1], lwp3::HUB_ID);
    }
}

mod nxt_telegrams {
    use super::*;

    #[test]
    fn test_battery_reply_through_assembler() {
        let mut assembler = TelegramAssembler::new();
        let bodies = assembler.feed(&[0x05, 0x00, 0x02, 0x0b, 0x00, 0x70, 0x17]);
        assert_eq!(bodies.len(), 1);

        let parsed = Reply::parse(&bodies[0]).unwrap();
        assert_eq!(reply::battery_millivolts(&parsed).unwrap(), 6000);
    }

    #[test]
    fn test_upload_sequence_frames() {
        let open = command::open_write("prog.rxe", 40).encode().unwrap();
        assert_eq!(open[0] as usize, open.len() - 2);
        assert_eq!(open[2], nxt::command_type::SYSTEM);
        assert_eq!(open[3], nxt::system_opcode::OPEN_WRITE);

        let write = command::write(3, &[0xaa; 32]).encode().unwrap();
        assert_eq!(write.len(), 2 + 2 + 1 + 32);
        assert_eq!(write[4], 3);

        let close = command::close(3).encode().unwrap();
        assert_eq!(close, vec![0x03, 0x00, 0x01, 0x84, 0x03]);
    }

    #[test]
    fn test_status_table_lookup() {
        let reply = Reply::build(nxt::system_opcode::OPEN_WRITE, 0x8f, &[]);
        assert!(!reply.is_success());
        assert_eq!(nxt::status_message(reply.status()), "File exists");
    }
}

mod device_table {
    use super::*;

    #[test]
    fn test_every_known_id_has_consistent_flags() {
        for id in 0..=u8::MAX {
            let Some(device) = DeviceType::from_id(id) else {
                continue;
            };
            if device.has_tacho() {
                assert!(device.is_motor());
            }
            assert_eq!(device.is_motor(), device.kind() == DeviceKind::Motor);
            assert!(!device.name().is_empty());
        }
    }

    #[test]
    fn test_undefined_identifiers_are_listed() {
        assert!(protocol::UNDEFINED_IDENTIFIERS.contains(&"TECHNIC_COLOR_SENSOR"));
        assert_eq!(protocol::UNDEFINED_IDENTIFIERS.len(), 4);
    }
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn payload_strategy(max: usize) -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), 0..=max)
    }

    proptest! {
        /// Property: the NXT prefix always equals the frame length minus 2
        #[test]
        fn prop_nxt_prefix_matches_body(
            opcode in any::<u8>(),
            payload in payload_strategy(600),
            system in any::<bool>(),
            reply in any::<bool>(),
        ) {
            let telegram = if system {
                Telegram::system(opcode, payload, reply)
            } else {
                Telegram::direct(opcode, payload, reply)
            };
            let frame = telegram.encode().unwrap();
            let prefix = u16::from_le_bytes([frame[0], frame[1]]) as usize;
            prop_assert_eq!(prefix, frame.len() - 2);
            prop_assert_eq!(Telegram::decode(&frame).unwrap(), telegram);
        }

        /// Property: OUTPUT commands survive encode and decode unchanged
        #[test]
        fn prop_output_command_roundtrip(
            port in any::<u8>(),
            flags in any::<u8>(),
            subcommand in any::<u8>(),
            payload in payload_strategy(100),
        ) {
            let cmd = OutputCommand::new(port, flags, subcommand, payload);
            let frame = cmd.encode().unwrap();
            prop_assert_eq!(frame[0] as usize, frame.len());
            prop_assert_eq!(OutputCommand::decode(&frame).unwrap(), cmd);
        }

        /// Property: reassembly yields the same bodies however the stream is split
        #[test]
        fn prop_assembler_split_invariant(
            bodies in proptest::collection::vec(payload_strategy(40), 1..8),
            split in 1usize..16,
        ) {
            let mut stream = Vec::new();
            for body in &bodies {
                stream.extend_from_slice(&(body.len() as u16).to_le_bytes());
                stream.extend_from_slice(body);
            }

            let mut assembler = TelegramAssembler::new();
            let mut out = Vec::new();
            for chunk in stream.chunks(split) {
                out.extend(assembler.feed(chunk));
            }
            prop_assert_eq!(out, bodies);
            prop_assert_eq!(assembler.pending(), 0);
        }
    }
}
