use thiserror::Error;
use uuid::Uuid;

/// The primary error type for the `ld2410-ble` library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device {0} not found. Is the radar powered and in range?")]
    DeviceNotFound(String),

    #[error("Characteristic {0} is missing from the GATT database")]
    CharacteristicMissing(Uuid),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out waiting for a command response")]
    ResponseTimeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Whether a command that failed with this error is worth resending.
    ///
    /// Link-level failures are transient: the device stays reachable and a
    /// fresh connection usually clears them. Protocol and authentication
    /// errors are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CharacteristicMissing(_) | Error::Transport(_) | Error::ResponseTimeout
        )
    }
}

/// Errors from decoding frames received from the radar.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unexpected ACK: expected {expected:#06x}, got {actual:#06x}")]
    UnexpectedAck { expected: u16, actual: u16 },

    #[error("Response too short: expected at least {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),
}
