//! Passive advertisement parsing.
//!
//! LD2410 radars embed their firmware version and build timestamp in
//! manufacturer data, BCD-coded. Nothing here needs a connection.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::constants::{LOCAL_NAME_PREFIX, MANUFACTURER_IDS, MIN_FIRMWARE_DATA_LEN};

/// Firmware record carried in manufacturer data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvertisedFirmware {
    /// Vendor-style version string, e.g. `2.44.24073110`.
    pub version: String,
    pub build_date: DateTime<Utc>,
}

/// One advertisement seen from a radar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advertisement {
    pub address: String,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub firmware: Option<AdvertisedFirmware>,
}

impl Advertisement {
    /// Whether this looks like an LD2410 at all: either the firmware record
    /// parsed or the advertised name carries the family prefix.
    pub fn is_radar(&self) -> bool {
        self.firmware.is_some()
            || self
                .local_name
                .as_deref()
                .is_some_and(|name| name.starts_with(LOCAL_NAME_PREFIX))
    }
}

/// Extracts the firmware record from a manufacturer data map, trying the
/// known manufacturer IDs in preference order.
pub fn parse_manufacturer_data(
    manufacturer_data: &HashMap<u16, Vec<u8>>,
) -> Option<AdvertisedFirmware> {
    MANUFACTURER_IDS
        .iter()
        .find_map(|id| manufacturer_data.get(id).and_then(|data| parse_firmware(data)))
}

/// Decodes one firmware record.
///
/// Layout: minor(BCD), major(binary), then BCD hour, day, month,
/// year-since-2000 and minute. Anything that is not valid BCD or not a real
/// calendar date rejects the record.
pub fn parse_firmware(data: &[u8]) -> Option<AdvertisedFirmware> {
    if data.len() < MIN_FIRMWARE_DATA_LEN {
        return None;
    }
    let minor = bcd(data[0])?;
    let major = data[1];
    let hour = bcd(data[2])?;
    let day = bcd(data[3])?;
    let month = bcd(data[4])?;
    let year = bcd(data[5])?;
    let minute = bcd(data[6])?;
    let build_date = Utc
        .with_ymd_and_hms(
            2000 + i32::from(year),
            u32::from(month),
            u32::from(day),
            u32::from(hour),
            u32::from(minute),
            0,
        )
        .single()?;
    let version = format!("{major}.{minor:02}.{year:02}{month:02}{day:02}{hour:02}");
    Some(AdvertisedFirmware {
        version,
        build_date,
    })
}

fn bcd(byte: u8) -> Option<u8> {
    let high = byte >> 4;
    let low = byte & 0x0F;
    if high > 9 || low > 9 {
        return None;
    }
    Some(high * 10 + low)
}
