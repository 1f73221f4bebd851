//! Per-port device lifecycle
//!
//! Devices are created from HUB_ATTACHED_IO frames and removed on detach or
//! when the connection goes away. Each [`Device`] carries a [`CommandSender`],
//! a weak handle back to the owning session, so commands can be issued from
//! a device snapshot without the registry owning the session.

pub mod telemetry;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use protocol::lwp3::{OutputCommand, input_format_setup};
use protocol::{DeviceKind, DeviceType};
use tracing::{debug, trace, warn};

use crate::error::{HubError, Result};
pub use telemetry::{Reading, Readings, decode_port_value};

/// Delta interval for mode subscriptions
const NOTIFY_DELTA: u32 = 1;

/// Where device commands end up
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<()>;
}

/// Non-owning handle to a [`CommandSink`]
#[derive(Clone, Default)]
pub struct CommandSender {
    sink: Option<Weak<dyn CommandSink>>,
}

impl CommandSender {
    pub fn new(sink: &Arc<dyn CommandSink>) -> Self {
        Self {
            sink: Some(Arc::downgrade(sink)),
        }
    }

    /// Handle from an existing weak reference, for sinks built with `Arc::new_cyclic`
    pub fn from_weak(sink: Weak<dyn CommandSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// A handle that is never connected
    pub fn detached() -> Self {
        Self::default()
    }

    pub async fn send(&self, frame: Vec<u8>) -> Result<()> {
        let sink = self
            .sink
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(HubError::NotConnected)?;
        sink.send_frame(frame).await
    }

    async fn output(&self, command: OutputCommand) -> Result<()> {
        self.send(command.encode()?).await
    }
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let live = self.sink.as_ref().is_some_and(|w| w.strong_count() > 0);
        f.debug_struct("CommandSender").field("live", &live).finish()
    }
}

/// A device attached to one port
#[derive(Debug, Clone)]
pub struct Device {
    port: u8,
    type_id: u8,
    device_type: Option<DeviceType>,
    values: HashMap<&'static str, Reading>,
    sender: CommandSender,
}

impl Device {
    fn new(port: u8, type_id: u8, sender: CommandSender) -> Self {
        Self {
            port,
            type_id,
            device_type: DeviceType::from_id(type_id),
            values: HashMap::new(),
            sender,
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn type_id(&self) -> u8 {
        self.type_id
    }

    /// `None` for ids missing from the device table
    pub fn device_type(&self) -> Option<DeviceType> {
        self.device_type
    }

    pub fn kind(&self) -> DeviceKind {
        self.device_type.map_or(DeviceKind::Unknown, |t| t.kind())
    }

    pub fn is_motor(&self) -> bool {
        self.device_type.is_some_and(|t| t.is_motor())
    }

    pub fn has_tacho(&self) -> bool {
        self.device_type.is_some_and(|t| t.has_tacho())
    }

    pub fn name(&self) -> String {
        match self.device_type {
            Some(t) => t.name().to_string(),
            None => format!("Unknown device 0x{:02x}", self.type_id),
        }
    }

    /// Last decoded value of `quantity` ("position", "color", "tiltX", ...)
    pub fn value(&self, quantity: &str) -> Option<Reading> {
        self.values.get(quantity).copied()
    }

    pub fn values(&self) -> &HashMap<&'static str, Reading> {
        &self.values
    }

    fn require_motor(&self, command: &str) -> Result<()> {
        if self.is_motor() {
            return Ok(());
        }
        warn!("{} on port {} is not a motor", command, self.port);
        Err(HubError::Unsupported(format!(
            "{} needs a motor on port {}",
            command, self.port
        )))
    }

    fn require_tacho(&self, command: &str) -> Result<()> {
        if self.has_tacho() {
            return Ok(());
        }
        warn!("{} on port {} needs a tacho motor", command, self.port);
        Err(HubError::Unsupported(format!(
            "{} needs a tacho motor on port {}",
            command, self.port
        )))
    }

    /// Run at `power` percent until told otherwise
    pub async fn start_speed(&self, power: i32) -> Result<()> {
        self.require_motor("start_speed")?;
        debug!("Port {}: start speed {}", self.port, power);
        self.sender
            .output(OutputCommand::start_speed(self.port, power))
            .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.start_speed(0).await
    }

    pub async fn start_speed_for_time(&self, time_ms: u32, power: i32, end: u8) -> Result<()> {
        self.require_motor("start_speed_for_time")?;
        debug!("Port {}: speed {} for {} ms", self.port, power, time_ms);
        self.sender
            .output(OutputCommand::start_speed_for_time(self.port, time_ms, power, end))
            .await
    }

    pub async fn start_speed_for_degrees(&self, degrees: i32, power: i32, end: u8) -> Result<()> {
        self.require_tacho("start_speed_for_degrees")?;
        debug!("Port {}: speed {} for {} degrees", self.port, power, degrees);
        self.sender
            .output(OutputCommand::start_speed_for_degrees(self.port, degrees, power, end))
            .await
    }

    pub async fn goto_absolute_position(&self, position: i32, power: i32, end: u8) -> Result<()> {
        self.require_tacho("goto_absolute_position")?;
        self.sender
            .output(OutputCommand::goto_absolute_position(self.port, position, power, end))
            .await
    }

    pub async fn set_acceleration(&self, time_ms: u32) -> Result<()> {
        self.require_motor("set_acceleration")?;
        self.sender
            .output(OutputCommand::set_acceleration(self.port, time_ms))
            .await
    }

    pub async fn set_deceleration(&self, time_ms: u32) -> Result<()> {
        self.require_motor("set_deceleration")?;
        self.sender
            .output(OutputCommand::set_deceleration(self.port, time_ms))
            .await
    }

    /// Redefine the current encoder position
    pub async fn preset_encoder(&self, position: i32) -> Result<()> {
        self.require_tacho("preset_encoder")?;
        self.sender
            .output(OutputCommand::preset_encoder(self.port, position))
            .await
    }

    /// LED brightness in percent
    pub async fn set_brightness(&self, brightness: u8) -> Result<()> {
        if self.device_type != Some(DeviceType::Light) {
            return Err(HubError::Unsupported(format!(
                "port {} has no LED light",
                self.port
            )));
        }
        self.sender
            .output(OutputCommand::led_brightness(self.port, brightness))
            .await
    }

    /// Set the nine pixels of a 3x3 matrix
    pub async fn set_pixels(&self, pixels: &[u8; 9]) -> Result<()> {
        if self.kind() != DeviceKind::Matrix {
            return Err(HubError::Unsupported(format!(
                "port {} has no light matrix",
                self.port
            )));
        }
        self.sender
            .output(OutputCommand::matrix_pixels(self.port, pixels))
            .await
    }

    /// Set the hub status LED to a 0xRRGGBB color
    pub async fn set_hub_led(&self, rgb: u32) -> Result<()> {
        if self.device_type != Some(DeviceType::HubLed) {
            return Err(HubError::Unsupported(format!(
                "port {} is not the hub LED",
                self.port
            )));
        }
        self.sender
            .output(OutputCommand::hub_led_rgb(self.port, rgb))
            .await
    }
}

/// Devices by port plus the input mode last requested for each port
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<u8, Device>,
    modes: HashMap<u8, u8>,
    sender: CommandSender,
}

impl DeviceRegistry {
    pub fn new(sender: CommandSender) -> Self {
        Self {
            devices: HashMap::new(),
            modes: HashMap::new(),
            sender,
        }
    }

    /// Register a device and return the mode subscription frame to send, if any
    pub fn attach(&mut self, port: u8, type_id: u8) -> Option<Vec<u8>> {
        let device = Device::new(port, type_id, self.sender.clone());

        let Some(device_type) = device.device_type else {
            debug!("Unknown device type 0x{:02x} on port {}", type_id, port);
            self.devices.insert(port, device);
            return None;
        };

        debug!(
            "Attached {} (0x{:02x}) on port {}, kind {:?}",
            device_type, type_id, port, device_type.kind()
        );
        self.devices.insert(port, device);

        device_type
            .default_mode()
            .and_then(|mode| self.request_mode(port, mode))
    }

    /// Forget the device on `port` along with its cached mode
    pub fn detach(&mut self, port: u8) -> Option<Device> {
        self.modes.remove(&port);
        let removed = self.devices.remove(&port);
        if let Some(device) = &removed {
            debug!("Detached {} from port {}", device.name(), port);
        }
        removed
    }

    /// Frame selecting `mode` on `port`, or `None` when it is already active
    pub fn request_mode(&mut self, port: u8, mode: u8) -> Option<Vec<u8>> {
        if self.modes.get(&port) == Some(&mode) {
            trace!("Port {} already in mode {}", port, mode);
            return None;
        }
        self.modes.insert(port, mode);
        Some(input_format_setup(port, mode, NOTIFY_DELTA, true))
    }

    pub fn mode(&self, port: u8) -> Option<u8> {
        self.modes.get(&port).copied()
    }

    /// Decode a PORT_VALUE payload and store the readings on the device
    pub fn apply_port_value(&mut self, port: u8, value: &[u8]) -> Result<Readings> {
        let mode = self.modes.get(&port).copied();
        let Some(device) = self.devices.get_mut(&port) else {
            trace!("Value for empty port {}", port);
            return Ok(Readings::new());
        };
        let (Some(device_type), Some(mode)) = (device.device_type, mode) else {
            return Ok(Readings::new());
        };

        let readings = decode_port_value(device_type, mode, value)?;
        for (quantity, reading) in &readings {
            trace!("Port {} {} = {}", port, quantity, reading);
            device.values.insert(quantity, *reading);
        }
        Ok(readings)
    }

    pub fn device(&self, port: u8) -> Option<&Device> {
        self.devices.get(&port)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Port of the first device of `device_type`
    pub fn port_of(&self, device_type: DeviceType) -> Option<u8> {
        let mut ports: Vec<u8> = self
            .devices
            .values()
            .filter(|d| d.device_type == Some(device_type))
            .map(|d| d.port)
            .collect();
        ports.sort_unstable();
        ports.first().copied()
    }

    /// Ports holding motors, in ascending order
    pub fn motor_ports(&self) -> Vec<u8> {
        let mut ports: Vec<u8> = self
            .devices
            .values()
            .filter(|d| d.is_motor())
            .map(|d| d.port)
            .collect();
        ports.sort_unstable();
        ports
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Drop every device, e.g. on disconnect
    pub fn clear(&mut self) {
        self.devices.clear();
        self.modes.clear();
    }
}

/// Built-in tilt sensors feed the hub status snapshot
pub(crate) fn is_builtin_tilt(device_type: DeviceType) -> bool {
    matches!(
        device_type,
        DeviceType::InternalTilt | DeviceType::TechnicHubTiltSensor
    )
}
