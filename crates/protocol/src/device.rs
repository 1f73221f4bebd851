//! LWP3 device type table
//!
//! Every attachable device is identified by the type id carried in its
//! HUB_ATTACHED_IO frame. The table below is closed: ids missing from it are
//! treated as unknown devices by the registry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lwp3::mode;

/// Broad device family used to dispatch commands and telemetry decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Motor,
    Sensor,
    Led,
    Matrix,
    Unknown,
}

/// Known LWP3 device type ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceType {
    SimpleMediumLinearMotor = 0x01,
    TrainMotor = 0x02,
    Light = 0x08,
    VoltageSensor = 0x14,
    CurrentSensor = 0x15,
    PiezoBuzzer = 0x16,
    HubLed = 0x17,
    ExternalTiltSensor = 0x22,
    MotionSensor = 0x23,
    ColorDistanceSensor = 0x25,
    ExternalMotorTacho = 0x26,
    InternalMotorTacho = 0x27,
    InternalTilt = 0x28,
    DuploTrainBaseMotor = 0x29,
    DuploTrainBaseSpeaker = 0x2a,
    DuploTrainBaseColor = 0x2b,
    DuploTrainBaseSpeedometer = 0x2c,
    ControlPlusLargeMotor = 0x2e,
    ControlPlusXLargeMotor = 0x2f,
    SpikeMediumMotor = 0x30,
    SpikeLargeMotor = 0x31,
    TechnicHubGestureSensor = 0x36,
    RemoteControlButton = 0x37,
    RemoteControlRssi = 0x38,
    TechnicHubAccelerometer = 0x39,
    TechnicHubGyroSensor = 0x3a,
    TechnicHubTiltSensor = 0x3b,
    TechnicHubTemperatureSensor = 0x3c,
    SpikeColorSensor = 0x3d,
    SpikeUltrasonicSensor = 0x3e,
    SpikeForceSensor = 0x3f,
    Spike3x3ColorLightMatrix = 0x40,
    SpikeSmallMotor = 0x41,
    MarioAccelerometer = 0x47,
    MarioBarcodeSensor = 0x49,
    MarioPantsSensor = 0x4a,
    TechnicMediumAngularMotorGrey = 0x4b,
    TechnicLargeAngularMotorGrey = 0x4c,
    MarioGestureSensor = 0x54,
}

/// Names the legacy motor predicates refer to that have no id in the table.
///
/// They are reported as-is and never mapped to a guessed number.
pub const UNDEFINED_IDENTIFIERS: [&str; 4] = [
    "MEDIUM_LINEAR_MOTOR",
    "MOVE_HUB_MEDIUM_LINEAR_MOTOR",
    "TECHNIC_COLOR_SENSOR",
    "TECHNIC_DISTANCE_SENSOR",
];

impl DeviceType {
    pub fn from_id(id: u8) -> Option<Self> {
        use DeviceType::*;
        let device = match id {
            0x01 => SimpleMediumLinearMotor,
            0x02 => TrainMotor,
            0x08 => Light,
            0x14 => VoltageSensor,
            0x15 => CurrentSensor,
            0x16 => PiezoBuzzer,
            0x17 => HubLed,
            0x22 => ExternalTiltSensor,
            0x23 => MotionSensor,
            0x25 => ColorDistanceSensor,
            0x26 => ExternalMotorTacho,
            0x27 => InternalMotorTacho,
            0x28 => InternalTilt,
            0x29 => DuploTrainBaseMotor,
            0x2a => DuploTrainBaseSpeaker,
            0x2b => DuploTrainBaseColor,
            0x2c => DuploTrainBaseSpeedometer,
            0x2e => ControlPlusLargeMotor,
            0x2f => ControlPlusXLargeMotor,
            0x30 => SpikeMediumMotor,
            0x31 => SpikeLargeMotor,
            0x36 => TechnicHubGestureSensor,
            0x37 => RemoteControlButton,
            0x38 => RemoteControlRssi,
            0x39 => TechnicHubAccelerometer,
            0x3a => TechnicHubGyroSensor,
            0x3b => TechnicHubTiltSensor,
            0x3c => TechnicHubTemperatureSensor,
            0x3d => SpikeColorSensor,
            0x3e => SpikeUltrasonicSensor,
            0x3f => SpikeForceSensor,
            0x40 => Spike3x3ColorLightMatrix,
            0x41 => SpikeSmallMotor,
            0x47 => MarioAccelerometer,
            0x49 => MarioBarcodeSensor,
            0x4a => MarioPantsSensor,
            0x4b => TechnicMediumAngularMotorGrey,
            0x4c => TechnicLargeAngularMotorGrey,
            0x54 => MarioGestureSensor,
            _ => return None,
        };
        Some(device)
    }

    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn is_motor(&self) -> bool {
        self.has_tacho()
            || matches!(
                self,
                Self::SimpleMediumLinearMotor | Self::TrainMotor | Self::DuploTrainBaseMotor
            )
    }

    /// Motors with a rotation sensor (position, degree runs, encoder preset)
    pub fn has_tacho(&self) -> bool {
        matches!(
            self,
            Self::ExternalMotorTacho
                | Self::InternalMotorTacho
                | Self::ControlPlusLargeMotor
                | Self::ControlPlusXLargeMotor
                | Self::SpikeMediumMotor
                | Self::SpikeLargeMotor
                | Self::SpikeSmallMotor
                | Self::TechnicMediumAngularMotorGrey
                | Self::TechnicLargeAngularMotorGrey
        )
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            _ if self.is_motor() => DeviceKind::Motor,
            Self::Light | Self::HubLed => DeviceKind::Led,
            Self::Spike3x3ColorLightMatrix => DeviceKind::Matrix,
            Self::PiezoBuzzer | Self::DuploTrainBaseSpeaker => DeviceKind::Unknown,
            _ => DeviceKind::Sensor,
        }
    }

    pub fn is_tilt(&self) -> bool {
        matches!(
            self,
            Self::ExternalTiltSensor | Self::InternalTilt | Self::TechnicHubTiltSensor
        )
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Self::ColorDistanceSensor | Self::SpikeColorSensor)
    }

    /// Input mode requested right after attach; `None` means no subscription
    pub fn default_mode(&self) -> Option<u8> {
        match self {
            _ if self.has_tacho() => Some(mode::MOTOR_POSITION),
            Self::ColorDistanceSensor | Self::SpikeColorSensor => Some(mode::COLOR),
            Self::SpikeUltrasonicSensor => Some(mode::DISTANCE),
            Self::SpikeForceSensor => Some(mode::FORCE),
            _ if self.is_tilt() => Some(mode::TILT_ANGLE),
            Self::MotionSensor => Some(mode::MOTION_DISTANCE),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SimpleMediumLinearMotor => "WeDo 2.0 Medium Motor",
            Self::TrainMotor => "Powered Up Train Motor",
            Self::Light => "Powered Up LED Light",
            Self::VoltageSensor => "Voltage Sensor",
            Self::CurrentSensor => "Current Sensor",
            Self::PiezoBuzzer => "Piezo Buzzer",
            Self::HubLed => "Hub LED",
            Self::ExternalTiltSensor => "WeDo 2.0 Tilt Sensor",
            Self::MotionSensor => "WeDo 2.0 Motion Sensor",
            Self::ColorDistanceSensor => "Boost Color & Distance Sensor",
            Self::ExternalMotorTacho => "Boost External Motor",
            Self::InternalMotorTacho => "Boost Internal Motor",
            Self::InternalTilt => "Boost Internal Tilt Sensor",
            Self::DuploTrainBaseMotor => "Duplo Train Motor",
            Self::DuploTrainBaseSpeaker => "Duplo Train Speaker",
            Self::DuploTrainBaseColor => "Duplo Train Color Sensor",
            Self::DuploTrainBaseSpeedometer => "Duplo Train Speedometer",
            Self::ControlPlusLargeMotor => "Control+ Large Motor",
            Self::ControlPlusXLargeMotor => "Control+ XLarge Motor",
            Self::SpikeMediumMotor => "SPIKE Prime Medium Motor",
            Self::SpikeLargeMotor => "SPIKE Prime Large Motor",
            Self::TechnicHubGestureSensor => "Gesture Sensor",
            Self::RemoteControlButton => "Remote Control Button",
            Self::RemoteControlRssi => "Remote Control RSSI",
            Self::TechnicHubAccelerometer => "Hub Accelerometer",
            Self::TechnicHubGyroSensor => "Hub Gyro Sensor",
            Self::TechnicHubTiltSensor => "Hub Tilt Sensor",
            Self::TechnicHubTemperatureSensor => "Hub Temperature Sensor",
            Self::SpikeColorSensor => "SPIKE Prime Color Sensor",
            Self::SpikeUltrasonicSensor => "SPIKE Prime Distance Sensor",
            Self::SpikeForceSensor => "SPIKE Prime Force Sensor",
            Self::Spike3x3ColorLightMatrix => "SPIKE 3x3 Color Matrix",
            Self::SpikeSmallMotor => "SPIKE Essential Small Motor",
            Self::MarioAccelerometer => "Mario Accelerometer",
            Self::MarioBarcodeSensor => "Mario Barcode Sensor",
            Self::MarioPantsSensor => "Mario Pants Sensor",
            Self::TechnicMediumAngularMotorGrey => "Technic Medium Angular Motor",
            Self::TechnicLargeAngularMotorGrey => "Technic Large Angular Motor",
            Self::MarioGestureSensor => "Mario Gesture Sensor",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
