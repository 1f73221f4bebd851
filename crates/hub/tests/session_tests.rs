//! Session behaviour against scripted hubs
//!
//! A [`MockTransport`] stands in for the radio: LWP3 tests inject the frames
//! a hub would push, NXT tests install a responder that answers telegrams the
//! way a brick does.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, alert_update_frame, attach_frame, detach_frame, nxt_reply_frame,
    port_value_frame, property_update_frame, with_timeout,
};
use hub::config::{HubConfig, HubProtocol};
use hub::session::{HubEvent, Lwp3Session, NxtSession};
use hub::transport::{MockHandle, MockTransport};
use hub::{HubError, Reading, TransferStage};
use protocol::lwp3::{self, HubType, hub_property, mode};
use protocol::nxt::{InputPort, OutputPort, Telegram, opcode, system_opcode};
use protocol::{DeviceKind, DeviceType};
use tokio::sync::broadcast;

async fn wait_for<F>(events: &mut broadcast::Receiver<HubEvent>, matches: F) -> HubEvent
where
    F: Fn(&HubEvent) -> bool,
{
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive")
}

mod lwp3_session {
    use super::*;

    async fn wait_sent(handle: &MockHandle, frame: Vec<u8>) {
        with_timeout(DEFAULT_TEST_TIMEOUT, async {
            while !handle.sent().await.contains(&frame) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("frame was never written");
    }

    async fn connected() -> (Lwp3Session, MockHandle) {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let session = Lwp3Session::new(Arc::new(transport), &HubConfig::default());
        session.connect().await.expect("connect");
        (session, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialisation_sequence() {
        let (_session, handle) = connected().await;
        let sent = handle.sent().await;

        assert_eq!(sent[0], vec![5, 0, 0x01, 0x0b, 0x05]);
        assert_eq!(sent[1], vec![5, 0, 0x01, 0x03, 0x05]);
        assert_eq!(sent[2], vec![5, 0, 0x01, 0x06, 0x05]);
        assert_eq!(sent[3], vec![5, 0, 0x01, 0x05, 0x05]);
        assert_eq!(sent[4], vec![5, 0, 0x01, 0x02, 0x02]);
        assert_eq!(&sent[7..10], &[
            vec![5, 0, 0x03, 0x01, 0x01],
            vec![5, 0, 0x03, 0x02, 0x01],
            vec![5, 0, 0x03, 0x04, 0x01],
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_tacho_motor_subscribes_position() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();
        handle.clear_sent().await;

        handle.inject(attach_frame(1, 0x30)).await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Attached { port: 1, .. })).await;

        let motor = session.device(1).await.expect("device on port 1");
        assert_eq!(motor.kind(), DeviceKind::Motor);
        assert!(motor.has_tacho());
        assert!(motor.is_motor());

        wait_sent(&handle, lwp3::input_format_setup(1, mode::MOTOR_POSITION, 1, true)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_device_is_minimal() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle.inject(attach_frame(5, 0x7e)).await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Attached { port: 5, .. })).await;

        let device = session.device(5).await.expect("device");
        assert_eq!(device.device_type(), None);
        assert_eq!(device.kind(), DeviceKind::Unknown);
        assert!(!device.is_motor());
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_value_updates_device() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle.inject(attach_frame(0, 0x31)).await;
        handle.inject(port_value_frame(0, &720i32.to_le_bytes())).await;

        let event = wait_for(&mut events, |e| matches!(e, HubEvent::Telemetry { .. })).await;
        let HubEvent::Telemetry {
            port,
            quantity,
            reading,
        } = event
        else {
            unreachable!();
        };
        assert_eq!((port, quantity, reading), (0, "position", Reading::Int(720)));
        assert_eq!(
            session.device(0).await.unwrap().value("position"),
            Some(Reading::Int(720))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_builtin_tilt_feeds_status() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle.inject(attach_frame(0x3a, 0x28)).await;
        handle.inject(port_value_frame(0x3a, &[0xfb, 0x0a])).await;
        wait_for(&mut events, |e| {
            matches!(e, HubEvent::Telemetry { quantity: "tiltY", .. })
        })
        .await;

        let status = session.status().await;
        assert_eq!(status.tilt_x, Some(-5));
        assert_eq!(status.tilt_y, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_properties_and_alerts() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle
            .inject(property_update_frame(hub_property::SYSTEM_TYPE_ID, &[2]))
            .await;
        handle
            .inject(property_update_frame(hub_property::BATTERY_VOLTAGE, &[64]))
            .await;
        handle
            .inject(alert_update_frame(lwp3::alert::LOW_VOLTAGE, true))
            .await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Alert { .. })).await;

        let status = session.status().await;
        assert_eq!(status.hub_type, Some(HubType::MoveHub));
        assert_eq!(status.name(), "Boost Move Hub");
        assert_eq!(status.battery, Some(64));
        assert!(status.low_voltage);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_removes_device() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle.inject(attach_frame(2, 0x26)).await;
        handle.inject(detach_frame(2)).await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Detached { port: 2 })).await;

        assert!(session.device(2).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_clears_registry() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle.inject(attach_frame(0, 0x30)).await;
        handle.inject(attach_frame(1, 0x30)).await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Attached { port: 1, .. })).await;
        assert_eq!(session.devices().await.len(), 2);

        handle.drop_link("hub switched off").await;
        let event = wait_for(&mut events, |e| matches!(e, HubEvent::Disconnected { .. })).await;
        let HubEvent::Disconnected { reason } = event else {
            unreachable!();
        };
        assert_eq!(reason, "hub switched off");
        assert!(session.devices().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_degrees_on_plain_motor_is_unsupported() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle.inject(attach_frame(0, 0x02)).await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Attached { .. })).await;
        let motor = session.device(0).await.unwrap();

        let result = motor.start_speed_for_degrees(90, 50, lwp3::end_state::BRAKE).await;
        let Err(HubError::Unsupported(_)) = result else {
            panic!("expected Unsupported, got {:?}", result);
        };
        motor.start_speed(50).await.expect("plain motors can run");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_motors() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle.inject(attach_frame(0, 0x26)).await;
        handle.inject(attach_frame(1, 0x22)).await;
        handle.inject(attach_frame(2, 0x2f)).await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Attached { port: 2, .. })).await;
        wait_sent(&handle, lwp3::input_format_setup(2, mode::MOTOR_POSITION, 1, true)).await;
        handle.clear_sent().await;

        session.stop_all_motors().await.unwrap();

        let sent = handle.sent().await;
        // two motors; the tilt sensor on port 1 is skipped
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|f| f[2] == 0x81 && f[5] == 0x07 && f[6] == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_outliving_session_is_not_connected() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle.inject(attach_frame(0, 0x30)).await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Attached { .. })).await;
        let motor = session.device(0).await.unwrap();
        drop(session);

        let Err(HubError::NotConnected) = motor.start_speed(10).await else {
            panic!("expected NotConnected");
        };
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_frame() {
        let (session, handle) = connected().await;
        handle.clear_sent().await;
        session.shutdown().await.unwrap();
        assert_eq!(handle.sent().await, vec![vec![4, 0, 0x02, 0x01]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_port_mode_skips_active_mode() {
        let (session, handle) = connected().await;
        let mut events = session.subscribe();

        handle.inject(attach_frame(1, 0x3d)).await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Attached { .. })).await;
        wait_sent(&handle, lwp3::input_format_setup(1, mode::COLOR, 1, true)).await;
        handle.clear_sent().await;

        session.set_port_mode(1, mode::REFLECTION).await.unwrap();
        session.set_port_mode(1, mode::REFLECTION).await.unwrap();
        assert_eq!(handle.sent().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_led_needs_led_port() {
        let (session, handle) = connected().await;
        let Err(HubError::Unsupported(_)) = session.set_hub_led(0xff0000).await else {
            panic!("expected Unsupported without a hub LED");
        };

        let mut events = session.subscribe();
        handle.inject(attach_frame(0x32, 0x17)).await;
        wait_for(&mut events, |e| matches!(e, HubEvent::Attached { .. })).await;
        handle.clear_sent().await;

        session.set_hub_led(0x00ff00).await.unwrap();
        let sent = handle.sent().await;
        assert_eq!(sent.last().unwrap()[5..], [0x51, 0x00, 0x00, 0xff, 0x00]);
    }

    #[test]
    fn test_device_type_table_is_consistent() {
        for id in 0..=u8::MAX {
            let Some(device_type) = DeviceType::from_id(id) else {
                continue;
            };
            if device_type.has_tacho() {
                assert!(device_type.is_motor(), "{:?}", device_type);
            }
        }
    }
}

mod nxt_session {
    use super::*;

    fn nxt_config() -> HubConfig {
        let mut config = HubConfig::default();
        config.hub.protocol = HubProtocol::Nxt;
        config
    }

    /// Answers like a brick; WRITE number `fail_write` (1-based) reports "no write buffers"
    fn brick(fail_write: Option<usize>) -> impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static {
        let writes = AtomicUsize::new(0);
        move |frame| {
            let telegram = Telegram::decode(frame).expect("telegram");
            if !telegram.expects_reply() {
                return Vec::new();
            }
            let op = telegram.opcode;
            let reply = match op {
                opcode::GET_BATT_LVL => nxt_reply_frame(op, 0, &[0x70, 0x17]),
                opcode::KEEP_ALIVE => nxt_reply_frame(op, 0, &600_000u32.to_le_bytes()),
                opcode::START_PROGRAM => nxt_reply_frame(op, 0x87, &[]),
                system_opcode::OPEN_WRITE => nxt_reply_frame(op, 0, &[3]),
                system_opcode::WRITE => {
                    let n = writes.fetch_add(1, Ordering::SeqCst) + 1;
                    if Some(n) == fail_write {
                        nxt_reply_frame(op, 0x8c, &[3, 0, 0])
                    } else {
                        let len = (telegram.payload.len() - 1) as u16;
                        let mut payload = vec![telegram.payload[0]];
                        payload.extend_from_slice(&len.to_le_bytes());
                        nxt_reply_frame(op, 0, &payload)
                    }
                }
                system_opcode::CLOSE => nxt_reply_frame(op, 0, &[telegram.payload[0]]),
                system_opcode::READ_IO_MAP => {
                    let size = u16::from_le_bytes([telegram.payload[6], telegram.payload[7]]);
                    let mut payload = telegram.payload[..4].to_vec();
                    payload.extend_from_slice(&size.to_le_bytes());
                    payload.extend(std::iter::repeat_n(0x0f, size as usize));
                    nxt_reply_frame(op, 0, &payload)
                }
                system_opcode::WRITE_IO_MAP => {
                    let mut payload = telegram.payload[..4].to_vec();
                    payload.extend_from_slice(&telegram.payload[6..8]);
                    nxt_reply_frame(op, 0, &payload)
                }
                _ => nxt_reply_frame(op, 0, &[]),
            };
            vec![reply]
        }
    }

    async fn connected(fail_write: Option<usize>) -> (NxtSession, MockHandle) {
        let transport = MockTransport::with_responder(brick(fail_write));
        let handle = transport.handle();
        let session = NxtSession::new(Arc::new(transport), &nxt_config());
        session.connect().await.expect("connect");
        (session, handle)
    }

    fn opcodes(sent: &[Vec<u8>]) -> Vec<u8> {
        sent.iter().map(|frame| frame[3]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_level_millivolts() {
        let (session, _handle) = connected(None).await;
        assert_eq!(session.get_battery_level().await.unwrap(), 6000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_status_is_device_error() {
        let (session, _handle) = connected(None).await;
        let result = session.start_program("missing.rxe").await;
        let Err(HubError::Device {
            command,
            status,
            message,
        }) = result
        else {
            panic!("expected device error, got {:?}", result);
        };
        assert_eq!(command, opcode::START_PROGRAM);
        assert_eq!(status, 0x87);
        assert_eq!(message, "File not found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_forty_bytes() {
        let (session, handle) = connected(None).await;
        handle.clear_sent().await;

        let summary = session
            .upload_file("prog.rxe", &[0xaa; 40], None)
            .await
            .unwrap();
        assert_eq!(summary.handle, 3);
        assert_eq!(summary.chunks, 2);

        let sent = handle.sent().await;
        assert_eq!(opcodes(&sent), vec![
            system_opcode::OPEN_WRITE,
            system_opcode::WRITE,
            system_opcode::WRITE,
            system_opcode::CLOSE,
        ]);
        // [len][len][type][op][handle][data...]
        assert_eq!(sent[1].len() - 5, 32);
        assert_eq!(sent[2].len() - 5, 8);
        assert_eq!(sent[3][4], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_thousand_bytes() {
        let (session, handle) = connected(None).await;
        handle.clear_sent().await;

        let data = common::test_utils::random_payload(1000);
        session.upload_file("data.bin", &data, None).await.unwrap();

        let sent = handle.sent().await;
        let writes: Vec<&Vec<u8>> = sent
            .iter()
            .filter(|f| f[3] == system_opcode::WRITE)
            .collect();
        assert_eq!(writes.len(), 32);
        assert!(writes.iter().all(|f| f.len() - 5 <= 32));
        let uploaded: Vec<u8> = writes.iter().flat_map(|f| f[5..].to_vec()).collect();
        assert_eq!(uploaded, data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_still_closes() {
        let (session, handle) = connected(Some(3)).await;
        handle.clear_sent().await;

        let result = session.upload_file("data.bin", &[1u8; 200], None).await;
        let Err(HubError::Transfer { stage, source }) = result else {
            panic!("expected transfer error, got {:?}", result);
        };
        assert_eq!(stage, TransferStage::Write);
        assert!(matches!(*source, HubError::Device { status: 0x8c, .. }));

        let ops = opcodes(&handle.sent().await);
        assert_eq!(ops.iter().filter(|&&op| op == system_opcode::WRITE).count(), 3);
        assert_eq!(ops.last(), Some(&system_opcode::CLOSE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_rejects_pending() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let session = Arc::new(NxtSession::new(Arc::new(transport), &nxt_config()));
        session.connect().await.unwrap();

        let requester = session.clone();
        let first = tokio::spawn(async move { requester.get_battery_level().await });
        let requester = session.clone();
        let second = tokio::spawn(async move { requester.keep_alive().await });

        while session.pending_requests().await < 2 {
            tokio::task::yield_now().await;
        }
        handle.drop_link("out of range").await;

        let Err(HubError::ConnectionLost) = first.await.unwrap() else {
            panic!("first request should see the link drop");
        };
        let Err(HubError::ConnectionLost) = second.await.unwrap() else {
            panic!("second request should see the link drop");
        };
        assert_eq!(session.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let transport = MockTransport::new();
        let session = NxtSession::new(Arc::new(transport), &nxt_config());
        session.connect().await.unwrap();

        let result = session.get_battery_level().await;
        let Err(HubError::Timeout(after)) = result else {
            panic!("expected timeout, got {:?}", result);
        };
        assert_eq!(after, std::time::Duration::from_secs(5));
        assert_eq!(session.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_recovers_after_abandoned_call() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let session = NxtSession::new(Arc::new(transport), &nxt_config());
        session.connect().await.unwrap();

        let gave_up = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            session.get_battery_level(),
        )
        .await;
        assert!(gave_up.is_err());

        handle.set_responder(brick(None)).await;
        for _ in 0..3 {
            assert_eq!(session.keep_alive().await.unwrap(), 600_000);
        }
        assert_eq!(session.get_battery_level().await.unwrap(), 6000);
        assert_eq!(session.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reply_commands_do_not_wait() {
        let (session, handle) = connected(None).await;
        handle.clear_sent().await;

        session.set_motor_power(OutputPort::B, 75).await.unwrap();
        session.play_tone(440, 200).await.unwrap();
        session
            .set_input_mode(InputPort::S2, protocol::nxt::sensor_type::SWITCH, 0x20)
            .await
            .unwrap();

        let sent = handle.sent().await;
        assert_eq!(opcodes(&sent), vec![
            opcode::SET_OUT_STATE,
            opcode::PLAY_TONE,
            opcode::SET_IN_MODE,
            opcode::RESET_IN_VAL,
        ]);
        assert!(sent.iter().all(|f| f[2] & 0x80 != 0));
        assert_eq!(session.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_presets() {
        use protocol::nxt::{sensor_mode, sensor_type};

        let (session, handle) = connected(None).await;
        handle.clear_sent().await;

        session.setup_touch_sensor(InputPort::S1).await.unwrap();
        session.setup_light_sensor(InputPort::S2, false).await.unwrap();
        session.setup_sound_sensor(InputPort::S3, true).await.unwrap();
        let started = tokio::time::Instant::now();
        session.setup_ultrasonic_sensor(InputPort::S4).await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(100));

        let modes: Vec<Vec<u8>> = handle
            .sent()
            .await
            .into_iter()
            .filter(|f| f[3] == opcode::SET_IN_MODE)
            .map(|f| f[4..7].to_vec())
            .collect();
        assert_eq!(modes, vec![
            vec![0, sensor_type::SWITCH, sensor_mode::RAW],
            vec![1, sensor_type::LIGHT_INACTIVE, sensor_mode::PCT_FULL_SCALE],
            vec![2, sensor_type::SOUND_DBA, sensor_mode::PCT_FULL_SCALE],
            vec![3, sensor_type::LOW_SPEED_9V, sensor_mode::RAW],
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drawn_screen_is_written_in_chunks() {
        let (session, handle) = connected(None).await;
        handle.clear_sent().await;

        let mut screen = hub::ScreenBuffer::default();
        screen.text("HI", 0, 0);
        session.write_display(&screen).await.unwrap();

        let writes: Vec<Vec<u8>> = handle
            .sent()
            .await
            .into_iter()
            .filter(|f| f[3] == system_opcode::WRITE_IO_MAP)
            .collect();
        assert_eq!(writes.len(), 14);
        // [len][len][type][op][module u32][offset u16][size u16][data...]
        assert_eq!(u16::from_le_bytes([writes[0][8], writes[0][9]]), 119);
        assert_eq!(&writes[0][12..17], &screen.as_bytes()[..5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ultrasonic_polls_until_ready() {
        let polls = Arc::new(AtomicUsize::new(0));
        let seen = polls.clone();
        let transport = MockTransport::with_responder(move |frame| {
            let telegram = Telegram::decode(frame).unwrap();
            match telegram.opcode {
                opcode::LS_GET_STATUS => {
                    if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                        vec![nxt_reply_frame(opcode::LS_GET_STATUS, 0x20, &[])]
                    } else {
                        vec![nxt_reply_frame(opcode::LS_GET_STATUS, 0, &[1])]
                    }
                }
                opcode::LS_READ => vec![nxt_reply_frame(opcode::LS_READ, 0, &[1, 42])],
                _ => Vec::new(),
            }
        });
        let handle = transport.handle();
        let session = NxtSession::new(Arc::new(transport), &nxt_config());
        session.connect().await.unwrap();

        let distance = session.get_ultrasonic_distance(InputPort::S4).await.unwrap();
        assert_eq!(distance, Some(42));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(handle.sent().await[0], vec![7, 0, 0x80, 0x0f, 3, 2, 1, 0x02, 0x42]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_display_in_chunks() {
        let (session, handle) = connected(None).await;
        handle.clear_sent().await;

        let screen = session.read_display().await.unwrap();
        assert_eq!(screen.as_bytes().len(), 800);
        assert!(screen.as_bytes().iter().all(|&b| b == 0x0f));

        let reads = opcodes(&handle.sent().await)
            .into_iter()
            .filter(|&op| op == system_opcode::READ_IO_MAP)
            .count();
        assert_eq!(reads, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_disconnect_clears_caches() {
        let (session, _handle) = connected(None).await;
        let mut events = session.subscribe();

        session.disconnect().await.unwrap();
        wait_for(&mut events, |e| matches!(e, HubEvent::Disconnected { .. })).await;
        assert!(session.motor_state(OutputPort::A).await.is_none());
        assert!(!session.is_connected());
    }
}
