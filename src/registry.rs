//! Registry of device handles, keyed by normalized address.
//!
//! Nothing in this crate keeps global state; an application that manages
//! several radars owns a registry and passes it where needed.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::device::LD2410;
use crate::util::lock;

/// Address-keyed collection of device handles.
///
/// Addresses are compared case-insensitively; keys are stored uppercase.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, LD2410>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handle under its own address, returning the handle it
    /// replaced, if any.
    pub fn insert(&self, device: LD2410) -> Option<LD2410> {
        let key = normalize(device.address());
        lock(&self.devices).insert(key, device)
    }

    pub fn get(&self, address: &str) -> Option<LD2410> {
        lock(&self.devices).get(&normalize(address)).cloned()
    }

    /// Returns the handle for `address`, creating it with `make` when
    /// absent.
    pub fn get_or_insert_with(&self, address: &str, make: impl FnOnce() -> LD2410) -> LD2410 {
        lock(&self.devices)
            .entry(normalize(address))
            .or_insert_with(make)
            .clone()
    }

    pub fn remove(&self, address: &str) -> Option<LD2410> {
        lock(&self.devices).remove(&normalize(address))
    }

    pub fn addresses(&self) -> Vec<String> {
        lock(&self.devices).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.devices).is_empty()
    }
}

fn normalize(address: &str) -> String {
    address.to_ascii_uppercase()
}
