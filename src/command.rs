//! Typed catalog of configuration commands and their ACK payloads.
//!
//! Command words ride the wire big-endian, matching the datasheet notation
//! (`0xFF00` is sent as `FF 00`). Every value inside a payload is
//! little-endian.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use strum_macros::Display;

use crate::constants::{ALL_GATES, PASSWORD_LEN};
use crate::error::{Error, ProtocolError};
use crate::frame;

/// Serial baud rate selector for [`Command::SetBaudRate`].
///
/// The wire value is an index, not the baud rate itself. Takes effect after
/// a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum BaudRate {
    #[strum(to_string = "9600")]
    B9600 = 0x0001,
    #[strum(to_string = "19200")]
    B19200 = 0x0002,
    #[strum(to_string = "38400")]
    B38400 = 0x0003,
    #[strum(to_string = "57600")]
    B57600 = 0x0004,
    #[strum(to_string = "115200")]
    B115200 = 0x0005,
    #[strum(to_string = "230400")]
    B230400 = 0x0006,
    #[default]
    #[strum(to_string = "256000")]
    B256000 = 0x0007,
    #[strum(to_string = "460800")]
    B460800 = 0x0008,
}

/// Gate width selector. Persists across power cycles, applies after reboot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, Default, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u16)]
pub enum DistanceResolution {
    /// 0.75 m per gate, about 6 m total range.
    #[default]
    #[strum(to_string = "0.75m")]
    Coarse = 0x0000,
    /// 0.2 m per gate, about 1.6 m total range.
    #[strum(to_string = "0.2m")]
    Fine = 0x0001,
}

/// Addresses a single gate or all of them at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSelector {
    Gate(u8),
    All,
}

impl GateSelector {
    /// Wire value of the selector.
    pub fn value(&self) -> u32 {
        match self {
            GateSelector::Gate(index) => u32::from(*index),
            GateSelector::All => ALL_GATES,
        }
    }
}

/// Condition under which the OUT pin follows the light sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum AuxLightMode {
    #[default]
    #[strum(to_string = "off")]
    Off = 0x00,
    #[strum(to_string = "light_below")]
    LightBelow = 0x01,
    #[strum(to_string = "light_above")]
    LightAbove = 0x02,
}

/// Resting level of the OUT pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum OutPinLevel {
    #[default]
    #[strum(to_string = "low")]
    Low = 0x00,
    #[strum(to_string = "high")]
    High = 0x01,
}

/// Light sensor coupling of the OUT pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuxiliaryControl {
    pub mode: AuxLightMode,
    /// Light sensor threshold the mode compares against.
    pub light_threshold: u8,
    pub default_out_level: OutPinLevel,
}

impl AuxiliaryControl {
    /// Decodes the ACK payload of [`Command::GetAuxiliaryControl`].
    pub fn parse(payload: &Bytes) -> Result<Self, Error> {
        let rest = frame::ack_status(payload)?;
        if rest.len() < 4 {
            return Err(ProtocolError::ShortResponse {
                expected: 4,
                actual: rest.len(),
            }
            .into());
        }
        let mode = AuxLightMode::try_from(rest[0]).map_err(|_| {
            ProtocolError::Malformed(format!("unknown auxiliary control mode {:#04x}", rest[0]))
        })?;
        let default_out_level = OutPinLevel::try_from(rest[2]).map_err(|_| {
            ProtocolError::Malformed(format!("unknown OUT pin level {:#04x}", rest[2]))
        })?;
        Ok(Self {
            mode,
            light_threshold: rest[1],
            default_out_level,
        })
    }
}

/// Every configuration command the radar understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Opens a configuration session. Most other commands only work inside
    /// one.
    EnableConfig,
    /// Closes the configuration session.
    EndConfig,
    /// Sets maximum detection gates and the no-one hold duration, in
    /// seconds. Effective immediately and persistent.
    SetDetectionLimits {
        max_moving_gate: u8,
        max_stationary_gate: u8,
        no_one_duration: u16,
    },
    /// Reads gate sensitivities and detection limits.
    ReadParameters,
    EnableEngineeringMode,
    DisableEngineeringMode,
    /// Sets motion and static sensitivity for one gate or all gates.
    SetGateSensitivity {
        gate: GateSelector,
        moving: u8,
        stationary: u8,
    },
    ReadFirmwareVersion,
    /// Applies after reboot.
    SetBaudRate(BaudRate),
    FactoryReset,
    Reboot,
    /// Turns the Bluetooth radio on or off. Applies after reboot.
    SetBluetooth(bool),
    ReadMacAddress,
    /// Authenticates the connection. Must be the first command after
    /// connecting when a password is set.
    SendPassword { password: String },
    /// Stores a new six character ASCII password.
    SetPassword { password: String },
    SetDistanceResolution(DistanceResolution),
    ReadDistanceResolution,
    SetAuxiliaryControl(AuxiliaryControl),
    GetAuxiliaryControl,
    /// Starts background noise calibration running for the given number of
    /// seconds.
    StartAutoThreshold { duration: u16 },
    QueryAutoThreshold,
}

impl Command {
    /// Command word as written on the wire.
    pub fn code(&self) -> u16 {
        match self {
            Command::EnableConfig => 0xFF00,
            Command::EndConfig => 0xFE00,
            Command::SetDetectionLimits { .. } => 0x6000,
            Command::ReadParameters => 0x6100,
            Command::EnableEngineeringMode => 0x6200,
            Command::DisableEngineeringMode => 0x6300,
            Command::SetGateSensitivity { .. } => 0x6400,
            Command::ReadFirmwareVersion => 0xA000,
            Command::SetBaudRate(_) => 0xA100,
            Command::FactoryReset => 0xA200,
            Command::Reboot => 0xA300,
            Command::SetBluetooth(_) => 0xA400,
            Command::ReadMacAddress => 0xA500,
            Command::SendPassword { .. } => 0xA800,
            Command::SetPassword { .. } => 0xA900,
            Command::SetDistanceResolution(_) => 0xAA00,
            Command::ReadDistanceResolution => 0xAB00,
            Command::SetAuxiliaryControl(_) => 0xAD00,
            Command::GetAuxiliaryControl => 0xAE00,
            Command::StartAutoThreshold { .. } => 0x0B00,
            Command::QueryAutoThreshold => 0x1B00,
        }
    }

    /// Encodes the command word plus payload, ready for
    /// [`frame::wrap_command`].
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_u16(self.code());
        match self {
            Command::EnableConfig => buf.put_u16_le(0x0001),
            Command::SetDetectionLimits {
                max_moving_gate,
                max_stationary_gate,
                no_one_duration,
            } => {
                buf.put_u16_le(0x0000);
                buf.put_u32_le(u32::from(*max_moving_gate));
                buf.put_u16_le(0x0001);
                buf.put_u32_le(u32::from(*max_stationary_gate));
                buf.put_u16_le(0x0002);
                buf.put_u32_le(u32::from(*no_one_duration));
            }
            Command::SetGateSensitivity {
                gate,
                moving,
                stationary,
            } => {
                buf.put_u16_le(0x0000);
                buf.put_u32_le(gate.value());
                buf.put_u16_le(0x0001);
                buf.put_u32_le(u32::from(*moving));
                buf.put_u16_le(0x0002);
                buf.put_u32_le(u32::from(*stationary));
            }
            Command::SetBaudRate(rate) => buf.put_u16_le((*rate).into()),
            Command::SetBluetooth(enabled) => buf.put_u16_le(u16::from(*enabled)),
            Command::ReadMacAddress => buf.put_u16_le(0x0001),
            Command::SendPassword { password } | Command::SetPassword { password } => {
                buf.put_slice(password.as_bytes());
            }
            Command::SetDistanceResolution(resolution) => buf.put_u16_le((*resolution).into()),
            Command::SetAuxiliaryControl(control) => {
                buf.put_u8(control.mode as u8);
                buf.put_u8(control.light_threshold);
                buf.put_u8(control.default_out_level as u8);
                buf.put_u8(0x00);
            }
            Command::StartAutoThreshold { duration } => buf.put_u16_le(*duration),
            Command::EndConfig
            | Command::ReadParameters
            | Command::EnableEngineeringMode
            | Command::DisableEngineeringMode
            | Command::ReadFirmwareVersion
            | Command::FactoryReset
            | Command::Reboot
            | Command::ReadDistanceResolution
            | Command::GetAuxiliaryControl
            | Command::QueryAutoThreshold => {}
        }
        buf.freeze()
    }
}

/// Six ASCII characters, per the Bluetooth password rules.
pub(crate) fn validate_password(password: &str) -> Result<(), Error> {
    if password.len() != PASSWORD_LEN || !password.is_ascii() {
        return Err(Error::Operation(format!(
            "bluetooth password must be exactly {PASSWORD_LEN} ASCII characters"
        )));
    }
    Ok(())
}

/// What [`Command::EnableConfig`] reports about the configuration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigSessionInfo {
    pub protocol_version: u16,
    pub buffer_size: u16,
}

impl ConfigSessionInfo {
    pub fn parse(payload: &Bytes) -> Result<Self, Error> {
        let rest = frame::ack_status(payload)?;
        if rest.len() < 4 {
            return Err(ProtocolError::ShortResponse {
                expected: 4,
                actual: rest.len(),
            }
            .into());
        }
        Ok(Self {
            protocol_version: u16::from_le_bytes([rest[0], rest[1]]),
            buffer_size: u16::from_le_bytes([rest[2], rest[3]]),
        })
    }
}

/// Gate sensitivities and detection limits from [`Command::ReadParameters`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarParams {
    pub max_gate: u8,
    pub max_moving_gate: u8,
    pub max_stationary_gate: u8,
    /// Motion sensitivity per gate, gate 0 first.
    pub moving_sensitivity: Vec<u8>,
    /// Static sensitivity per gate, gate 0 first.
    pub stationary_sensitivity: Vec<u8>,
    /// Seconds presence is held after the last detection.
    pub no_one_duration: u16,
}

const PARAMS_HEAD: u8 = 0xAA;

impl RadarParams {
    pub fn parse(payload: &Bytes) -> Result<Self, Error> {
        let rest = frame::ack_status(payload)?;
        if rest.len() < 4 {
            return Err(ProtocolError::ShortResponse {
                expected: 4,
                actual: rest.len(),
            }
            .into());
        }
        if rest[0] != PARAMS_HEAD {
            return Err(ProtocolError::Malformed(format!(
                "missing parameter head marker, got {:#04x}",
                rest[0]
            ))
            .into());
        }
        let max_gate = rest[1];
        let gates = usize::from(max_gate) + 1;
        let expected = 4 + 2 * gates + 2;
        if rest.len() < expected {
            return Err(ProtocolError::ShortResponse {
                expected,
                actual: rest.len(),
            }
            .into());
        }
        let moving_at = 4;
        let stationary_at = moving_at + gates;
        let duration_at = stationary_at + gates;
        Ok(Self {
            max_gate,
            max_moving_gate: rest[2],
            max_stationary_gate: rest[3],
            moving_sensitivity: rest[moving_at..stationary_at].to_vec(),
            stationary_sensitivity: rest[stationary_at..duration_at].to_vec(),
            no_one_duration: u16::from_le_bytes([rest[duration_at], rest[duration_at + 1]]),
        })
    }
}

/// Firmware identification from [`Command::ReadFirmwareVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub firmware_type: u16,
    pub major: u16,
    pub minor: u32,
}

impl FirmwareVersion {
    pub fn parse(payload: &Bytes) -> Result<Self, Error> {
        let rest = frame::ack_status(payload)?;
        if rest.len() < 8 {
            return Err(ProtocolError::ShortResponse {
                expected: 8,
                actual: rest.len(),
            }
            .into());
        }
        Ok(Self {
            firmware_type: u16::from_le_bytes([rest[0], rest[1]]),
            major: u16::from_le_bytes([rest[2], rest[3]]),
            minor: u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]),
        })
    }
}

impl fmt::Display for FirmwareVersion {
    /// Renders the version the way the vendor prints it, e.g. `V1.02.22062416`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "V{:x}.{:02x}.{:08x}",
            self.major >> 8,
            self.major & 0xFF,
            self.minor
        )
    }
}

/// Radio MAC address from [`Command::ReadMacAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn parse(payload: &Bytes) -> Result<Self, Error> {
        let rest = frame::ack_status(payload)?;
        // one fixed type byte, then the six address bytes
        if rest.len() < 7 {
            return Err(ProtocolError::ShortResponse {
                expected: 7,
                actual: rest.len(),
            }
            .into());
        }
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&rest[1..7]);
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// State of a background noise calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive)]
#[repr(u16)]
pub enum AutoThresholdStatus {
    #[strum(to_string = "idle")]
    Idle = 0x0000,
    #[strum(to_string = "in_progress")]
    InProgress = 0x0001,
    #[strum(to_string = "done")]
    Done = 0x0002,
}

impl AutoThresholdStatus {
    pub fn parse(payload: &Bytes) -> Result<Self, Error> {
        let rest = frame::ack_status(payload)?;
        if rest.len() < 2 {
            return Err(ProtocolError::ShortResponse {
                expected: 2,
                actual: rest.len(),
            }
            .into());
        }
        let code = u16::from_le_bytes([rest[0], rest[1]]);
        AutoThresholdStatus::try_from(code).map_err(|_| {
            ProtocolError::Malformed(format!("unknown auto threshold state {code:#06x}")).into()
        })
    }
}
