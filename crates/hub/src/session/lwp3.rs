//! Powered Up (LWP3) hub session
//!
//! LWP3 is a push protocol: the hub volunteers attach events, sensor values
//! and property updates, and output commands are fire-and-forget. The
//! session therefore has no request correlation, only a reader that folds
//! inbound frames into the [`DeviceRegistry`] and the [`HubStatus`] snapshot.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use common::{EventReceiver, SendRateLimiter, TransportEvent};
use protocol::DeviceType;
use protocol::lwp3::{
    self, FirmwareVersion, HubPropertyUpdate, HubType, Lwp3Message, alert, alert_operation,
    feedback, hub_action_type, hub_property, property_operation,
};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use super::{HubEvent, TaskSet, cancelled, event_channel, run_periodic};
use crate::config::{HubConfig, TimingSettings};
use crate::error::{HubError, Result};
use crate::registry::{
    CommandSender, CommandSink, Device, DeviceRegistry, Reading, Readings, is_builtin_tilt,
};
use crate::transport::{ConnectionState, TransportAdapter};

/// Pause after each property request during initialisation
const PROPERTY_PACING: Duration = Duration::from_millis(100);
/// Pause after each alert subscription during initialisation
const ALERT_PACING: Duration = Duration::from_millis(50);

/// Last known hub state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubStatus {
    pub hub_type: Option<HubType>,
    pub button_pressed: bool,
    /// Percent
    pub battery: Option<u8>,
    pub firmware: Option<FirmwareVersion>,
    /// dBm
    pub rssi: Option<i16>,
    pub low_voltage: bool,
    pub high_current: bool,
    pub over_power: bool,
    pub tilt_x: Option<i32>,
    pub tilt_y: Option<i32>,
    pub tilt_z: Option<i32>,
}

impl HubStatus {
    pub fn name(&self) -> &'static str {
        self.hub_type.unwrap_or(HubType::Unknown).name()
    }

    fn apply_property(&mut self, update: &HubPropertyUpdate) {
        match update {
            HubPropertyUpdate::SystemType(hub_type) => self.hub_type = Some(*hub_type),
            HubPropertyUpdate::Button(pressed) => self.button_pressed = *pressed,
            HubPropertyUpdate::Battery(level) => self.battery = Some(*level),
            HubPropertyUpdate::Rssi(rssi) => self.rssi = Some(*rssi),
            HubPropertyUpdate::FirmwareVersion(version) => self.firmware = Some(*version),
            HubPropertyUpdate::Other { .. } => {}
        }
    }

    fn apply_alert(&mut self, code: u8, active: bool) {
        match code {
            alert::LOW_VOLTAGE => self.low_voltage = active,
            alert::HIGH_CURRENT => self.high_current = active,
            alert::OVER_POWER_CONDITION => self.over_power = active,
            _ => {}
        }
    }

    fn apply_tilt(&mut self, readings: &Readings) {
        for (quantity, reading) in readings {
            let Reading::Int(angle) = reading else {
                continue;
            };
            match *quantity {
                "tiltX" => self.tilt_x = Some(*angle),
                "tiltY" => self.tilt_y = Some(*angle),
                "tiltZ" => self.tilt_z = Some(*angle),
                _ => {}
            }
        }
    }
}

struct Lwp3Shared {
    transport: Arc<dyn TransportAdapter>,
    limiter: SendRateLimiter,
    registry: RwLock<DeviceRegistry>,
    status: RwLock<HubStatus>,
    events: broadcast::Sender<HubEvent>,
    timing: TimingSettings,
    tasks: Mutex<Option<TaskSet>>,
}

#[async_trait]
impl CommandSink for Lwp3Shared {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.send(&frame).await
    }
}

impl Lwp3Shared {
    /// Rate limiting is advisory here: a closed window is noted, not enforced
    async fn send(&self, frame: &[u8]) -> Result<()> {
        if !self.limiter.okay_to_send() {
            trace!("Send rate above {:?} spacing", self.limiter.interval());
        }
        trace!("-> {:02x?}", frame);
        self.transport.send(frame).await
    }

    fn emit(&self, event: HubEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn initialize(&self) -> Result<()> {
        for property in [
            hub_property::SYSTEM_TYPE_ID,
            hub_property::FW_VERSION,
            hub_property::BATTERY_VOLTAGE,
            hub_property::RSSI,
        ] {
            self.send(&lwp3::hub_property_request(
                property,
                property_operation::REQUEST_UPDATE,
            ))
            .await?;
            tokio::time::sleep(PROPERTY_PACING).await;
        }

        for property in [
            hub_property::BUTTON,
            hub_property::BATTERY_VOLTAGE,
            hub_property::RSSI,
        ] {
            self.send(&lwp3::hub_property_request(
                property,
                property_operation::ENABLE_UPDATES,
            ))
            .await?;
            tokio::time::sleep(PROPERTY_PACING).await;
        }

        for code in [
            alert::LOW_VOLTAGE,
            alert::HIGH_CURRENT,
            alert::OVER_POWER_CONDITION,
        ] {
            self.send(&lwp3::alert_request(code, alert_operation::ENABLE_UPDATES))
                .await?;
            tokio::time::sleep(ALERT_PACING).await;
        }

        debug!("Hub initialisation sent");
        Ok(())
    }

    async fn handle_frame(&self, bytes: &[u8]) {
        trace!("<- {:02x?}", bytes);
        let message = match lwp3::decode_message(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed frame: {}", e);
                return;
            }
        };

        match message {
            Lwp3Message::AttachedIo {
                port,
                event,
                device_type,
            } => {
                if event.is_attach() {
                    let mode_frame = self.registry.write().await.attach(port, device_type);
                    self.emit(HubEvent::Attached {
                        port,
                        type_id: device_type,
                    });
                    if let Some(frame) = mode_frame
                        && let Err(e) = self.send(&frame).await
                    {
                        warn!("Mode subscription for port {} failed: {}", port, e);
                    }
                } else {
                    self.registry.write().await.detach(port);
                    self.emit(HubEvent::Detached { port });
                }
            }
            Lwp3Message::PortValue { port, value } => self.handle_port_value(port, &value).await,
            Lwp3Message::HubProperty(update) => {
                debug!("Hub property {:?}", update);
                self.status.write().await.apply_property(&update);
                self.emit(HubEvent::Property(update));
            }
            Lwp3Message::HubAlert { alert, active } => {
                if active {
                    warn!("Hub alert 0x{:02x} raised", alert);
                } else {
                    debug!("Hub alert 0x{:02x} cleared", alert);
                }
                self.status.write().await.apply_alert(alert, active);
                self.emit(HubEvent::Alert { alert, active });
            }
            Lwp3Message::PortFeedback { port, feedback } => {
                log_feedback(port, feedback);
                self.emit(HubEvent::Feedback { port, feedback });
            }
            Lwp3Message::Error { command, code } => {
                error!("Hub rejected command 0x{:02x} with code 0x{:02x}", command, code);
                self.emit(HubEvent::HubError { command, code });
            }
            Lwp3Message::Unhandled { message_type } => {
                trace!("Ignoring message type 0x{:02x}", message_type);
            }
        }
    }

    async fn handle_port_value(&self, port: u8, value: &[u8]) {
        let (readings, builtin_tilt) = {
            let mut registry = self.registry.write().await;
            let readings = registry.apply_port_value(port, value);
            let builtin_tilt = registry
                .device(port)
                .and_then(Device::device_type)
                .is_some_and(is_builtin_tilt);
            (readings, builtin_tilt)
        };

        let readings = match readings {
            Ok(readings) => readings,
            Err(e) => {
                debug!("Bad value on port {}: {}", port, e);
                return;
            }
        };

        if builtin_tilt {
            self.status.write().await.apply_tilt(&readings);
        }
        for (quantity, reading) in readings {
            self.emit(HubEvent::Telemetry {
                port,
                quantity,
                reading,
            });
        }
    }

    /// Drop per-connection state; only the first call has any effect
    async fn teardown(&self, reason: &str) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };
        self.registry.write().await.clear();
        info!("Hub disconnected: {}", reason);
        self.emit(HubEvent::Disconnected {
            reason: reason.to_string(),
        });
        tasks.cancel();
    }
}

fn log_feedback(port: u8, bits: u8) {
    if bits & feedback::DISCARDED != 0 {
        warn!("Port {}: command discarded", port);
    } else if bits & feedback::BUSY_OR_FULL != 0 {
        warn!("Port {}: buffer busy or full", port);
    } else if bits & feedback::COMPLETED != 0 {
        debug!("Port {}: command completed", port);
    } else {
        trace!("Port {}: feedback 0x{:02x}", port, bits);
    }
}

async fn read_loop(
    shared: Weak<Lwp3Shared>,
    events: EventReceiver,
    mut token: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = cancelled(&mut token) => break,
            event = events.recv() => event,
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };

        match event {
            Ok(TransportEvent::Frame(bytes)) => shared.handle_frame(&bytes).await,
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
    debug!("LWP3 reader stopped");
}

/// Session with one Powered Up hub
pub struct Lwp3Session {
    shared: Arc<Lwp3Shared>,
}

impl Lwp3Session {
    pub fn new(transport: Arc<dyn TransportAdapter>, config: &HubConfig) -> Self {
        let limiter = SendRateLimiter::new(config.max_send_rate());
        let timing = config.timing.clone();

        let shared = Arc::new_cyclic(|weak: &Weak<Lwp3Shared>| {
            let sink: Weak<dyn CommandSink> = weak.clone();
            Lwp3Shared {
                transport,
                limiter,
                registry: RwLock::new(DeviceRegistry::new(CommandSender::from_weak(sink))),
                status: RwLock::new(HubStatus::default()),
                events: event_channel(),
                timing,
                tasks: Mutex::new(None),
            }
        });
        Self { shared }
    }

    /// Connect, start the reader, initialise the hub and start the RSSI ping
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        info!("Connecting to Powered Up hub via {}", shared.transport.name());
        shared.transport.connect().await?;
        shared.limiter.reset();

        let mut tasks = TaskSet::new();
        let token = tasks.token();
        tasks.spawn(read_loop(
            Arc::downgrade(shared),
            shared.transport.events(),
            token,
        ));
        if let Some(previous) = shared.tasks.lock().await.replace(tasks) {
            previous.cancel();
        }

        if let Err(e) = shared.initialize().await {
            warn!("Hub initialisation failed: {}", e);
            shared.teardown("initialisation failed").await;
            let _ = shared.transport.disconnect().await;
            return Err(e);
        }

        let weak = Arc::downgrade(shared);
        let ping_interval = shared.timing.ping_interval();
        if let Some(tasks) = shared.tasks.lock().await.as_mut() {
            let token = tasks.token();
            tasks.spawn(run_periodic(ping_interval, token, move || {
                let weak = weak.clone();
                async move {
                    let Some(shared) = weak.upgrade() else {
                        return false;
                    };
                    let ping = lwp3::hub_property_request(
                        hub_property::RSSI,
                        property_operation::REQUEST_UPDATE,
                    );
                    if let Err(e) = shared.send(&ping).await {
                        debug!("RSSI ping failed: {}", e);
                    }
                    true
                }
            }));
        }

        info!("Connected to Powered Up hub");
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

    /// Send a raw LWP3 frame
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        self.shared.send(frame).await
    }

    pub async fn status(&self) -> HubStatus {
        self.shared.status.read().await.clone()
    }

    pub async fn device(&self, port: u8) -> Option<Device> {
        self.shared.registry.read().await.device(port).cloned()
    }

    /// First attached device of `device_type`
    pub async fn device_of_type(&self, device_type: DeviceType) -> Option<Device> {
        let registry = self.shared.registry.read().await;
        registry
            .port_of(device_type)
            .and_then(|port| registry.device(port).cloned())
    }

    /// Snapshot of every attached device, ordered by port
    pub async fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.shared.registry.read().await.devices().cloned().collect();
        devices.sort_by_key(Device::port);
        devices
    }

    /// Subscribe `port` to input `mode` and give the hub time to switch
    pub async fn set_port_mode(&self, port: u8, mode: u8) -> Result<()> {
        let frame = self.shared.registry.write().await.request_mode(port, mode);
        let Some(frame) = frame else {
            return Ok(());
        };
        debug!("Port {}: input mode {}", port, mode);
        self.shared.send(&frame).await?;
        tokio::time::sleep(self.shared.timing.mode_settle()).await;
        Ok(())
    }

    /// Send speed 0 to every attached motor
    pub async fn stop_all_motors(&self) -> Result<()> {
        let motors: Vec<Device> = self
            .shared
            .registry
            .read()
            .await
            .devices()
            .filter(|d| d.is_motor())
            .cloned()
            .collect();

        let mut first_error = None;
        for motor in motors {
            if let Err(e) = motor.stop().await {
                warn!("Stopping port {} failed: {}", motor.port(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Set the status LED through the port holding the hub LED
    pub async fn set_hub_led(&self, rgb: u32) -> Result<()> {
        let led = self
            .device_of_type(DeviceType::HubLed)
            .await
            .ok_or_else(|| HubError::Unsupported("no hub LED attached".to_string()))?;
        led.set_hub_led(rgb).await
    }

    /// Switch the hub off
    pub async fn shutdown(&self) -> Result<()> {
        info!("Switching hub off");
        self.shared
            .send(&lwp3::hub_action(hub_action_type::SWITCH_OFF_HUB))
            .await
    }
}

impl Drop for Lwp3Session {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.shared.tasks.try_lock()
            && let Some(tasks) = tasks.take()
        {
            tasks.cancel();
        }
    }
}
