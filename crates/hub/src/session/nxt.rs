//! NXT brick session over the Bluetooth serial link
//!
//! Every telegram that asks for a reply is registered with a FIFO
//! [`RequestCorrelator`] before it is written, under a send-order lock so the
//! queue order matches the wire order. The brick answers in order, so the
//! reader hands each reply to the oldest waiter.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use common::{EventReceiver, SendRateLimiter, TransportEvent};
use protocol::nxt::command::{self, OutputStateCommand};
use protocol::nxt::{
    self, DeviceInfo, FirmwareInfo, InputPort, InputValues, LsRead, LsStatus, MessageRead,
    OutputPort, OutputState, Reply, Telegram, TelegramAssembler, command_type, sensor_mode,
    sensor_type,
};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tracing::{debug, info, trace, warn};

use super::display::ScreenBuffer;
use super::{HubEvent, TaskSet, cancelled, event_channel, run_periodic};
use crate::config::{HubConfig, TimingSettings};
use crate::correlator::{CorrelationMode, RequestCorrelator, ResolveOutcome};
use crate::error::{HubError, Result};
use crate::transfer::{ChunkedTransfer, TelegramSender, TransferProgress, TransferSummary};
use crate::transport::{ConnectionState, TransportAdapter};

/// LS_GET_STATUS polls before giving up on an I2C answer
const LS_POLL_ATTEMPTS: usize = 8;
/// Settle time before each LS_GET_STATUS poll
const LS_POLL_DELAY: Duration = Duration::from_millis(30);
/// Pause between screen buffer reads
const DISPLAY_READ_DELAY: Duration = Duration::from_millis(20);
/// Pause between screen buffer writes
const DISPLAY_WRITE_DELAY: Duration = Duration::from_millis(15);
/// The ultrasonic sensor ignores I2C traffic right after being powered
const ULTRASONIC_SETTLE: Duration = Duration::from_millis(100);

struct NxtShared {
    transport: Arc<dyn TransportAdapter>,
    limiter: SendRateLimiter,
    correlator: RequestCorrelator<Reply>,
    /// Held from registration until the telegram is on the wire
    send_order: Mutex<()>,
    events: broadcast::Sender<HubEvent>,
    timing: TimingSettings,
    transfer: ChunkedTransfer,
    motors: RwLock<HashMap<u8, OutputState>>,
    sensors: RwLock<HashMap<u8, InputValues>>,
    tasks: Mutex<Option<TaskSet>>,
}

#[async_trait]
impl TelegramSender for NxtShared {
    async fn request(&self, telegram: Telegram) -> Result<Reply> {
        self.call(telegram).await
    }
}

impl NxtShared {
    /// Back off once when the send window is closed
    async fn pace(&self) {
        if !self.limiter.okay_to_send() {
            trace!("Send window closed, backing off");
            self.limiter
                .acquire_with_backoff(self.timing.rate_limit_backoff())
                .await;
        }
    }

    /// Write a telegram without waiting for an answer
    async fn send_only(&self, telegram: &Telegram) -> Result<()> {
        let frame = telegram.encode()?;
        let _order = self.send_order.lock().await;
        self.pace().await;
        trace!("-> {:02x?}", frame);
        self.transport.send(&frame).await
    }

    /// Write a telegram and wait for its successful reply
    async fn call(&self, mut telegram: Telegram) -> Result<Reply> {
        telegram.command_type &= !command_type::NO_REPLY;
        let opcode = telegram.opcode;
        let frame = telegram.encode()?;

        let pending = {
            let _order = self.send_order.lock().await;
            self.pace().await;
            let pending = self.correlator.register(opcode).await;
            trace!("-> {:02x?}", frame);
            if let Err(e) = self.transport.send(&frame).await {
                self.correlator.cancel(pending).await;
                return Err(e);
            }
            pending
        };

        let reply = self.correlator.wait(pending).await?;
        if nxt::status::is_failure(opcode, reply.status()) {
            let err = HubError::device(opcode, reply.status());
            debug!("{}", err);
            return Err(err);
        }
        Ok(reply)
    }

    fn emit(&self, event: HubEvent) {
        let _ = self.events.send(event);
    }

    async fn handle_body(&self, body: &[u8]) {
        let reply = match Reply::parse(body) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Ignoring inbound telegram: {}", e);
                return;
            }
        };
        trace!("<- {:02x?}", reply.bytes());

        let opcode = reply.opcode();
        if self.correlator.resolve_next(opcode, Ok(reply)).await == ResolveOutcome::Unmatched {
            debug!("Unsolicited reply for opcode 0x{:02x}", opcode);
        }
    }

    async fn teardown(&self, reason: &str) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };
        let rejected = self.correlator.fail_all().await;
        if rejected > 0 {
            debug!("Rejected {} outstanding request(s)", rejected);
        }
        self.motors.write().await.clear();
        self.sensors.write().await.clear();
        info!("Brick disconnected: {}", reason);
        self.emit(HubEvent::Disconnected {
            reason: reason.to_string(),
        });
        tasks.cancel();
    }
}

async fn read_loop(shared: Weak<NxtShared>, events: EventReceiver, mut token: watch::Receiver<bool>) {
    let mut assembler = TelegramAssembler::new();
    loop {
        let event = tokio::select! {
            _ = cancelled(&mut token) => break,
            event = events.recv() => event,
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };

        match event {
            Ok(TransportEvent::Frame(bytes)) => {
                for body in assembler.feed(&bytes) {
                    shared.handle_body(&body).await;
                }
            }
            Ok(TransportEvent::Disconnected { reason }) => {
                shared.teardown(&reason).await;
                break;
            }
            Err(_) => {
                shared.teardown("transport closed").await;
                break;
            }
        }
    }
    debug!("NXT reader stopped");
}

/// Session with one NXT brick
pub struct NxtSession {
    shared: Arc<NxtShared>,
}

impl NxtSession {
    pub fn new(transport: Arc<dyn TransportAdapter>, config: &HubConfig) -> Self {
        let shared = NxtShared {
            transport,
            limiter: SendRateLimiter::new(config.max_send_rate()),
            correlator: RequestCorrelator::new(
                CorrelationMode::Fifo,
                config.timing.request_timeout(),
            ),
            send_order: Mutex::new(()),
            events: event_channel(),
            timing: config.timing.clone(),
            transfer: ChunkedTransfer::from_settings(&config.transfer),
            motors: RwLock::new(HashMap::new()),
            sensors: RwLock::new(HashMap::new()),
            tasks: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Connect, start the reader and the keep-alive
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        info!("Connecting to NXT brick via {}", shared.transport.name());
        shared.transport.connect().await?;
        shared.limiter.reset();

        let mut tasks = TaskSet::new();
        let token = tasks.token();
        tasks.spawn(read_loop(
            Arc::downgrade(shared),
            shared.transport.events(),
            token,
        ));

        let weak = Arc::downgrade(shared);
        let token = tasks.token();
        tasks.spawn(run_periodic(
            shared.timing.keep_alive_interval(),
            token,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(shared) = weak.upgrade() else {
                        return false;
                    };
                    match shared.call(command::keep_alive()).await {
                        Ok(_) => trace!("Keep-alive acknowledged"),
                        Err(e) => warn!("Keep-alive failed: {}", e),
                    }
                    true
                }
            },
        ));

        if let Some(previous) = shared.tasks.lock().await.replace(tasks) {
            previous.cancel();
        }

        info!("Connected to NXT brick");
        shared.emit(HubEvent::Connected);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.shared.teardown("disconnect requested").await;
        self.shared.transport.disconnect().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.transport.is_connected()
    }

    /// Requests still waiting for a reply
    pub async fn pending_requests(&self) -> usize {
        self.shared.correlator.pending_count().await
    }

    /// Send any telegram; returns the reply when one was requested
    pub async fn execute(&self, telegram: Telegram) -> Result<Option<Reply>> {
        if telegram.expects_reply() {
            self.shared.call(telegram).await.map(Some)
        } else {
            self.shared.send_only(&telegram).await.map(|_| None)
        }
    }

    // Programs and sound

    pub async fn start_program(&self, name: &str) -> Result<()> {
        info!("Starting program {}", name);
        self.shared.call(command::start_program(name)).await?;
        Ok(())
    }

    pub async fn stop_program(&self) -> Result<()> {
        self.shared.call(command::stop_program()).await?;
        Ok(())
    }

    /// Tone between 200 and 14000 Hz
    pub async fn play_tone(&self, frequency_hz: u32, duration_ms: u32) -> Result<()> {
        debug!("Tone {} Hz for {} ms", frequency_hz, duration_ms);
        self.shared
            .send_only(&command::play_tone(frequency_hz, duration_ms))
            .await
    }

    pub async fn play_sound_file(&self, name: &str, repeat: bool) -> Result<()> {
        self.shared
            .send_only(&command::play_sound_file(name, repeat))
            .await
    }

    pub async fn stop_sound(&self) -> Result<()> {
        self.shared.send_only(&command::stop_sound()).await
    }

    // Motors

    pub async fn set_output_state(&self, state: OutputStateCommand) -> Result<()> {
        debug!(
            "Output {}: power {} mode 0x{:02x} run state 0x{:02x}",
            state.port, state.power, state.mode, state.run_state
        );
        self.shared.send_only(&state.telegram()).await
    }

    /// Regulated run at `power` percent
    pub async fn set_motor_power(&self, port: OutputPort, power: i32) -> Result<()> {
        self.set_output_state(OutputStateCommand::run(port.index(), power))
            .await
    }

    /// Regulated run that stops after `degrees`
    pub async fn run_motor_for_degrees(
        &self,
        port: OutputPort,
        power: i32,
        degrees: i32,
    ) -> Result<()> {
        self.set_output_state(OutputStateCommand::run_for_degrees(
            port.index(),
            power,
            degrees,
        ))
        .await
    }

    pub async fn stop_motor(&self, port: OutputPort, brake: bool) -> Result<()> {
        self.set_output_state(OutputStateCommand::stop(port.index(), brake))
            .await
    }

    /// Brake every output
    pub async fn stop_all_motors(&self) -> Result<()> {
        for port in OutputPort::ALL {
            self.stop_motor(port, true).await?;
        }
        Ok(())
    }

    pub async fn get_output_state(&self, port: OutputPort) -> Result<OutputState> {
        let reply = self
            .shared
            .call(command::get_output_state(port.index()))
            .await?;
        let state = OutputState::from_reply(&reply)?;
        self.shared.motors.write().await.insert(state.port, state);
        self.shared.emit(HubEvent::MotorState(state));
        Ok(state)
    }

    /// Last state read from `port`
    pub async fn motor_state(&self, port: OutputPort) -> Option<OutputState> {
        self.shared.motors.read().await.get(&port.index()).copied()
    }

    pub async fn reset_motor_position(&self, port: OutputPort, relative: bool) -> Result<()> {
        self.shared
            .send_only(&command::reset_motor_position(port.index(), relative))
            .await
    }

    // Sensors

    /// Configure a sensor port and zero its scaled value
    pub async fn set_input_mode(
        &self,
        port: InputPort,
        sensor_type: u8,
        sensor_mode: u8,
    ) -> Result<()> {
        debug!(
            "Input {}: {} sensor, mode 0x{:02x}",
            port,
            nxt::sensor_type::name(sensor_type),
            sensor_mode
        );
        self.shared
            .send_only(&command::set_input_mode(port.index(), sensor_type, sensor_mode))
            .await?;
        self.reset_input_scaled_value(port).await
    }

    /// Touch sensor in raw mode; works with NXT and EV3 touch sensors alike
    pub async fn setup_touch_sensor(&self, port: InputPort) -> Result<()> {
        self.set_input_mode(port, sensor_type::SWITCH, sensor_mode::RAW)
            .await
    }

    /// Light sensor as a percentage; `active` switches the floodlight on
    pub async fn setup_light_sensor(&self, port: InputPort, active: bool) -> Result<()> {
        let kind = if active {
            sensor_type::LIGHT_ACTIVE
        } else {
            sensor_type::LIGHT_INACTIVE
        };
        self.set_input_mode(port, kind, sensor_mode::PCT_FULL_SCALE)
            .await
    }

    /// Sound sensor as a percentage; `adjusted` selects dBA over dB
    pub async fn setup_sound_sensor(&self, port: InputPort, adjusted: bool) -> Result<()> {
        let kind = if adjusted {
            sensor_type::SOUND_DBA
        } else {
            sensor_type::SOUND_DB
        };
        self.set_input_mode(port, kind, sensor_mode::PCT_FULL_SCALE)
            .await
    }

    pub async fn setup_ultrasonic_sensor(&self, port: InputPort) -> Result<()> {
        self.set_input_mode(port, sensor_type::LOW_SPEED_9V, sensor_mode::RAW)
            .await?;
        tokio::time::sleep(ULTRASONIC_SETTLE).await;
        Ok(())
    }

    pub async fn reset_input_scaled_value(&self, port: InputPort) -> Result<()> {
        self.shared
            .send_only(&command::reset_input_scaled_value(port.index()))
            .await
    }

    pub async fn get_input_values(&self, port: InputPort) -> Result<InputValues> {
        let reply = self
            .shared
            .call(command::get_input_values(port.index()))
            .await?;
        let values = InputValues::from_reply(&reply)?;
        self.shared.sensors.write().await.insert(values.port, values);
        self.shared.emit(HubEvent::SensorValues(values));
        Ok(values)
    }

    /// Last values read from `port`
    pub async fn sensor_values(&self, port: InputPort) -> Option<InputValues> {
        self.shared.sensors.read().await.get(&port.index()).copied()
    }

    // Low-speed (I2C) sensors

    pub async fn ls_get_status(&self, port: InputPort) -> Result<LsStatus> {
        let reply = self
            .shared
            .call(command::ls_get_status(port.index()))
            .await?;
        Ok(LsStatus::from_reply(&reply)?)
    }

    pub async fn ls_write(&self, port: InputPort, tx: &[u8], rx_len: u8) -> Result<()> {
        self.shared
            .send_only(&command::ls_write(port.index(), tx, rx_len))
            .await
    }

    pub async fn ls_read(&self, port: InputPort) -> Result<LsRead> {
        let reply = self.shared.call(command::ls_read(port.index())).await?;
        Ok(LsRead::from_reply(&reply)?)
    }

    /// Distance in cm, or `None` when the sensor saw no echo or never answered
    pub async fn get_ultrasonic_distance(&self, port: InputPort) -> Result<Option<u8>> {
        self.shared
            .send_only(&command::ultrasonic_distance_request(port.index()))
            .await?;

        let mut ready = false;
        for _ in 0..LS_POLL_ATTEMPTS {
            tokio::time::sleep(LS_POLL_DELAY).await;
            if self.ls_get_status(port).await?.bytes_ready() > 0 {
                ready = true;
                break;
            }
        }
        if !ready {
            debug!("Ultrasonic sensor on {} did not answer", port);
            return Ok(None);
        }

        Ok(self.ls_read(port).await?.distance_cm())
    }

    // Brick state

    pub async fn get_battery_level(&self) -> Result<u16> {
        let reply = self.shared.call(command::get_battery_level()).await?;
        Ok(nxt::reply::battery_millivolts(&reply)?)
    }

    /// Reset the sleep timer; returns the configured sleep time in ms
    pub async fn keep_alive(&self) -> Result<u32> {
        let reply = self.shared.call(command::keep_alive()).await?;
        Ok(nxt::reply::keep_alive_sleep_ms(&reply)?)
    }

    pub async fn get_current_program_name(&self) -> Result<String> {
        let reply = self
            .shared
            .call(command::get_current_program_name())
            .await?;
        Ok(nxt::reply::current_program_name(&reply)?)
    }

    pub async fn get_firmware_version(&self) -> Result<FirmwareInfo> {
        let reply = self.shared.call(command::get_firmware_version()).await?;
        Ok(FirmwareInfo::from_reply(&reply)?)
    }

    pub async fn get_device_info(&self) -> Result<DeviceInfo> {
        let reply = self.shared.call(command::get_device_info()).await?;
        Ok(DeviceInfo::from_reply(&reply)?)
    }

    pub async fn set_brick_name(&self, name: &str) -> Result<()> {
        info!("Renaming brick to {}", name);
        self.shared.call(command::set_brick_name(name)).await?;
        Ok(())
    }

    // Mailboxes

    pub async fn message_write(&self, mailbox: u8, text: &str) -> Result<()> {
        self.shared
            .send_only(&command::message_write(mailbox, text))
            .await
    }

    pub async fn message_read(
        &self,
        remote_inbox: u8,
        local_inbox: u8,
        remove: bool,
    ) -> Result<MessageRead> {
        let reply = self
            .shared
            .call(command::message_read(remote_inbox, local_inbox, remove))
            .await?;
        Ok(MessageRead::from_reply(&reply)?)
    }

    // Files and IO map

    pub async fn delete_file(&self, name: &str) -> Result<()> {
        info!("Deleting {}", name);
        self.shared.call(command::delete_file(name)).await?;
        Ok(())
    }

    /// Upload `data` as `filename` in chunks
    pub async fn upload_file(
        &self,
        filename: &str,
        data: &[u8],
        progress: Option<&(dyn Fn(TransferProgress) + Send + Sync)>,
    ) -> Result<TransferSummary> {
        self.shared
            .transfer
            .upload(self.shared.as_ref(), filename, data, progress)
            .await
    }

    pub async fn read_io_map(&self, module: u32, offset: u16, size: u16) -> Result<Vec<u8>> {
        let reply = self
            .shared
            .call(command::read_io_map(module, offset, size))
            .await?;
        Ok(nxt::IoMapRead::from_reply(&reply)?.data)
    }

    /// Returns the byte count the brick reports as written
    pub async fn write_io_map(&self, module: u32, offset: u16, data: &[u8]) -> Result<u16> {
        let reply = self
            .shared
            .call(command::write_io_map(module, offset, data))
            .await?;
        Ok(nxt::IoMapWrite::from_reply(&reply)?.size)
    }

    /// Read the 100x64 screen buffer
    pub async fn read_display(&self) -> Result<ScreenBuffer> {
        let mut buffer = Vec::with_capacity(nxt::DISPLAY_BUFFER_SIZE);
        for offset in (0..nxt::DISPLAY_BUFFER_SIZE).step_by(nxt::DISPLAY_READ_CHUNK) {
            if offset > 0 {
                tokio::time::sleep(DISPLAY_READ_DELAY).await;
            }
            let size = nxt::DISPLAY_READ_CHUNK.min(nxt::DISPLAY_BUFFER_SIZE - offset);
            let data = self
                .read_io_map(
                    nxt::MODULE_DISPLAY,
                    nxt::DISPLAY_OFFSET + offset as u16,
                    size as u16,
                )
                .await?;
            buffer.extend_from_slice(&data);
        }
        Ok(ScreenBuffer::from_bytes(&buffer))
    }

    /// Write `screen` to the LCD
    pub async fn write_display(&self, screen: &ScreenBuffer) -> Result<()> {
        let bytes = screen.as_bytes();
        for (index, chunk) in bytes.chunks(nxt::DISPLAY_WRITE_CHUNK).enumerate() {
            if index > 0 {
                tokio::time::sleep(DISPLAY_WRITE_DELAY).await;
            }
            let offset = nxt::DISPLAY_OFFSET + (index * nxt::DISPLAY_WRITE_CHUNK) as u16;
            self.write_io_map(nxt::MODULE_DISPLAY, offset, chunk).await?;
        }
        Ok(())
    }
}

impl Drop for NxtSession {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.shared.tasks.try_lock()
            && let Some(tasks) = tasks.take()
        {
            tasks.cancel();
        }
    }
}
