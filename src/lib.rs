pub mod advertisement;
pub mod command;
pub mod constants;
pub mod device;
pub mod error;
pub mod frame;
pub mod profile;
pub mod registry;
pub mod report;
pub mod state;
pub mod transport;

mod retry;
mod util;

#[cfg(feature = "ble")]
pub mod ble;

// Re-export the device handle and the types its API surfaces
pub use advertisement::{Advertisement, AdvertisedFirmware};
pub use command::{
    AutoThresholdStatus, AuxLightMode, AuxiliaryControl, BaudRate, Command, ConfigSessionInfo,
    DistanceResolution, FirmwareVersion, GateSelector, MacAddress, OutPinLevel, RadarParams,
};
pub use device::{DeviceConfig, LD2410};
pub use error::{Error, ProtocolError};
pub use profile::{Ld2410Profile, ProtocolProfile, SetupStep};
pub use registry::DeviceRegistry;
pub use report::{EngineeringData, SensorReading, TargetStatus};
pub use state::{GateData, SensorSnapshot, SubscriptionToken};
pub use transport::{Transport, TransportSession};
