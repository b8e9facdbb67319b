//! Protocol personality of a radar model.
//!
//! Everything model-specific that is not a typed command lives behind
//! [`ProtocolProfile`]: which characteristics to use, how to tell report
//! frames from ACKs, and which commands to replay after (re)connecting.

use bytes::Bytes;
use uuid::Uuid;

use crate::constants::{NOTIFY_CHARACTERISTIC, WRITE_CHARACTERISTIC};
use crate::error::ProtocolError;
use crate::frame::{self, FrameKind};
use crate::report::{self, SensorReading};

/// One step of the post-connect setup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    /// Send the configured password. Skipped when none is set.
    Authenticate,
    EnableEngineeringMode,
    ReadParameters,
    ReadFirmwareVersion,
    ReadDistanceResolution,
    ReadAuxiliaryControl,
}

/// Model-specific protocol behavior.
pub trait ProtocolProfile: Send + Sync + 'static {
    /// Characteristic commands are written to.
    fn write_characteristic(&self) -> Uuid;

    /// Characteristic notifications arrive on.
    fn notify_characteristic(&self) -> Uuid;

    /// Tells report frames, ACK frames and noise apart.
    fn classify(&self, frame: &[u8]) -> FrameKind;

    /// Decodes a report frame. `Ok(None)` means the frame is valid but
    /// carries nothing this profile consumes.
    fn decode_report(&self, frame: &Bytes) -> Result<Option<SensorReading>, ProtocolError>;

    /// Commands replayed after every successful connect, in order.
    fn connect_sequence(&self) -> &[SetupStep];
}

/// Profile for the LD2410 family (LD2410, LD2410B, LD2410C).
pub struct Ld2410Profile {
    sequence: Vec<SetupStep>,
}

impl Ld2410Profile {
    /// Default setup: authenticate, switch to engineering reports, read the
    /// current gate parameters.
    pub fn new() -> Self {
        Self {
            sequence: vec![
                SetupStep::Authenticate,
                SetupStep::EnableEngineeringMode,
                SetupStep::ReadParameters,
            ],
        }
    }

    /// Profile with a custom setup sequence.
    pub fn with_sequence(sequence: Vec<SetupStep>) -> Self {
        Self { sequence }
    }
}

impl Default for Ld2410Profile {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolProfile for Ld2410Profile {
    fn write_characteristic(&self) -> Uuid {
        WRITE_CHARACTERISTIC
    }

    fn notify_characteristic(&self) -> Uuid {
        NOTIFY_CHARACTERISTIC
    }

    fn classify(&self, frame: &[u8]) -> FrameKind {
        frame::classify(frame)
    }

    fn decode_report(&self, frame: &Bytes) -> Result<Option<SensorReading>, ProtocolError> {
        report::parse_report(frame)
    }

    fn connect_sequence(&self) -> &[SetupStep] {
        &self.sequence
    }
}
