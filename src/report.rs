//! Parser for the periodic report frames the radar streams while connected.
//!
//! Reports are shaped `F4 F3 F2 F1 | len(u16 LE) | data | F8 F7 F6 F5` where
//! `data` is `type | 0xAA | body | 0x55 0x00`. Type `0x02` is the basic
//! target report, type `0x01` adds per-gate engineering data.

use bytes::Bytes;
use num_enum::FromPrimitive;
use serde::Serialize;
use strum_macros::Display;

use crate::constants::{REPORT_FOOTER, REPORT_HEADER};
use crate::error::ProtocolError;

/// Target state byte of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, FromPrimitive)]
#[repr(u8)]
pub enum TargetStatus {
    #[strum(to_string = "none")]
    NoTarget = 0x00,
    #[strum(to_string = "moving")]
    Moving = 0x01,
    #[strum(to_string = "stationary")]
    Stationary = 0x02,
    #[strum(to_string = "moving_and_stationary")]
    MovingAndStationary = 0x03,
    #[strum(to_string = "unknown({0})")]
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl TargetStatus {
    pub fn moving(&self) -> bool {
        matches!(self, TargetStatus::Moving | TargetStatus::MovingAndStationary)
    }

    pub fn stationary(&self) -> bool {
        matches!(
            self,
            TargetStatus::Stationary | TargetStatus::MovingAndStationary
        )
    }
}

/// One decoded report frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub status: TargetStatus,
    pub moving: bool,
    pub stationary: bool,
    pub presence: bool,
    /// Distance to the moving target in centimeters.
    pub moving_target_distance: u16,
    pub moving_target_energy: u8,
    /// Distance to the stationary target in centimeters.
    pub stationary_target_distance: u16,
    pub stationary_target_energy: u8,
    /// Distance of the last detection in centimeters.
    pub detection_distance: u16,
    /// Present only in engineering mode reports.
    pub engineering: Option<EngineeringData>,
}

/// Per-gate diagnostics appended to engineering mode reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineeringData {
    pub max_moving_gate: u8,
    pub max_stationary_gate: u8,
    /// Motion energy per gate, gate 0 first.
    pub moving_gate_energy: Vec<u8>,
    /// Static energy per gate, gate 0 first.
    pub stationary_gate_energy: Vec<u8>,
    /// Raw reading of the onboard light sensor.
    pub photo_sensor: u8,
    /// Level of the OUT pin.
    pub out_pin: bool,
}

const TYPE_ENGINEERING: u8 = 0x01;
const TYPE_BASIC: u8 = 0x02;
const DATA_MARKER: u8 = 0xAA;
const TAIL: [u8; 2] = [0x55, 0x00];

/// Decodes one report frame.
///
/// Returns `Ok(None)` for frames without the `0xAA` data marker, which the
/// radar emits for frame types this library does not consume.
pub fn parse_report(frame: &Bytes) -> Result<Option<SensorReading>, ProtocolError> {
    let data = report_body(frame)?;
    if data.len() < 2 {
        return Err(ProtocolError::Malformed("truncated report data".into()));
    }
    if data[1] != DATA_MARKER {
        return Ok(None);
    }
    let body = data.slice(2..);
    match data[0] {
        TYPE_BASIC => parse_basic(&body).map(Some),
        TYPE_ENGINEERING => parse_engineering(&body).map(Some),
        other => Err(ProtocolError::Malformed(format!(
            "unknown report type {other:#04x}"
        ))),
    }
}

/// Strips the report header, length and footer, returning the inner data.
fn report_body(frame: &Bytes) -> Result<Bytes, ProtocolError> {
    if !frame.starts_with(&REPORT_HEADER) {
        return Err(ProtocolError::Malformed("missing report header".into()));
    }
    if frame.len() < REPORT_HEADER.len() + 2 {
        return Err(ProtocolError::Malformed("truncated report frame".into()));
    }
    let declared = u16::from_le_bytes([frame[4], frame[5]]) as usize;
    let body_at = REPORT_HEADER.len() + 2;
    let end = body_at + declared;
    if frame.len() < end + REPORT_FOOTER.len() {
        return Err(ProtocolError::Malformed("truncated report frame".into()));
    }
    if frame[end..end + REPORT_FOOTER.len()] != REPORT_FOOTER {
        return Err(ProtocolError::Malformed("missing report footer".into()));
    }
    Ok(frame.slice(body_at..end))
}

fn parse_basic(body: &Bytes) -> Result<SensorReading, ProtocolError> {
    // status + three distance/energy groups + tail
    if body.len() < 9 + TAIL.len() {
        return Err(ProtocolError::Malformed("truncated basic report body".into()));
    }
    check_tail(body)?;
    Ok(reading_from_target_block(body, None))
}

fn parse_engineering(body: &Bytes) -> Result<SensorReading, ProtocolError> {
    if body.len() < 11 {
        return Err(ProtocolError::Malformed(
            "truncated engineering report body".into(),
        ));
    }
    let max_moving_gate = body[9];
    let max_stationary_gate = body[10];
    let moving_count = max_moving_gate as usize + 1;
    let stationary_count = max_stationary_gate as usize + 1;
    // target block + gate counts + energies + photo sensor + OUT pin + tail
    let expected = 11 + moving_count + stationary_count + 2 + TAIL.len();
    if body.len() < expected {
        return Err(ProtocolError::Malformed(format!(
            "engineering report needs {expected} bytes, got {}",
            body.len()
        )));
    }
    check_tail(body)?;

    let moving_at = 11;
    let stationary_at = moving_at + moving_count;
    let extras_at = stationary_at + stationary_count;
    let engineering = EngineeringData {
        max_moving_gate,
        max_stationary_gate,
        moving_gate_energy: body[moving_at..stationary_at].to_vec(),
        stationary_gate_energy: body[stationary_at..extras_at].to_vec(),
        photo_sensor: body[extras_at],
        out_pin: body[extras_at + 1] != 0,
    };
    Ok(reading_from_target_block(body, Some(engineering)))
}

fn reading_from_target_block(body: &Bytes, engineering: Option<EngineeringData>) -> SensorReading {
    let status = TargetStatus::from(body[0]);
    let moving = status.moving();
    let stationary = status.stationary();
    SensorReading {
        status,
        moving,
        stationary,
        presence: moving || stationary,
        moving_target_distance: u16::from_le_bytes([body[1], body[2]]),
        moving_target_energy: body[3],
        stationary_target_distance: u16::from_le_bytes([body[4], body[5]]),
        stationary_target_energy: body[6],
        detection_distance: u16::from_le_bytes([body[7], body[8]]),
        engineering,
    }
}

fn check_tail(body: &Bytes) -> Result<(), ProtocolError> {
    if body[body.len() - TAIL.len()..] != TAIL {
        return Err(ProtocolError::Malformed("missing report tail".into()));
    }
    Ok(())
}
