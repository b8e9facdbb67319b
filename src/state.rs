//! Merged view of everything the radar has told us so far.
//!
//! Reports, command echoes and advertisements each carry a different slice
//! of the device state. [`SensorSnapshot`] accumulates them: updates only
//! ever touch the fields they actually carry, so a basic report does not
//! erase per-gate data learned from an earlier engineering report.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::command::{AuxiliaryControl, DistanceResolution};
use crate::report::TargetStatus;
use crate::util::lock;

/// Everything known about one gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateData {
    pub moving_energy: Option<u8>,
    pub stationary_energy: Option<u8>,
    pub moving_sensitivity: Option<u8>,
    pub stationary_sensitivity: Option<u8>,
}

/// Accumulated device state. Fields stay `None` until some frame or command
/// has reported them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub status: Option<TargetStatus>,
    pub moving: Option<bool>,
    pub stationary: Option<bool>,
    pub presence: Option<bool>,
    pub moving_target_distance: Option<u16>,
    pub moving_target_energy: Option<u8>,
    pub stationary_target_distance: Option<u16>,
    pub stationary_target_energy: Option<u8>,
    pub detection_distance: Option<u16>,
    pub max_gate: Option<u8>,
    pub max_moving_gate: Option<u8>,
    pub max_stationary_gate: Option<u8>,
    pub no_one_duration: Option<u16>,
    pub photo_sensor: Option<u8>,
    pub out_pin: Option<bool>,
    pub distance_resolution: Option<DistanceResolution>,
    pub auxiliary_control: Option<AuxiliaryControl>,
    pub firmware_version: Option<String>,
    pub firmware_build_date: Option<DateTime<Utc>>,
    pub rssi: Option<i16>,
    /// Per-gate data, keyed by gate index.
    pub gates: BTreeMap<u8, GateData>,
}

impl SensorSnapshot {
    /// Mutable access to one gate, creating it on first touch.
    pub fn gate_mut(&mut self, index: u8) -> &mut GateData {
        self.gates.entry(index).or_default()
    }
}

/// Handle for removing a state subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken(u64);

type Callback = Arc<dyn Fn(&SensorSnapshot) + Send + Sync>;

/// Snapshot storage plus its subscriber list.
#[derive(Default)]
pub(crate) struct StateCache {
    snapshot: Mutex<SensorSnapshot>,
    subscribers: Mutex<Vec<(SubscriptionToken, Callback)>>,
    next_token: AtomicU64,
}

impl StateCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current state, cloned out.
    pub(crate) fn snapshot(&self) -> SensorSnapshot {
        lock(&self.snapshot).clone()
    }

    /// Applies an update and notifies subscribers when it changed anything.
    ///
    /// Callbacks run after every lock is released, so a subscriber may call
    /// back into the cache.
    pub(crate) fn update(&self, apply: impl FnOnce(&mut SensorSnapshot)) -> bool {
        let (changed, snapshot) = {
            let mut guard = lock(&self.snapshot);
            let before = guard.clone();
            apply(&mut guard);
            (*guard != before, guard.clone())
        };
        if changed {
            self.notify(&snapshot);
        }
        changed
    }

    pub(crate) fn subscribe(
        &self,
        callback: impl Fn(&SensorSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((token, Arc::new(callback)));
        token
    }

    pub(crate) fn unsubscribe(&self, token: SubscriptionToken) {
        lock(&self.subscribers).retain(|(candidate, _)| *candidate != token);
    }

    fn notify(&self, snapshot: &SensorSnapshot) {
        let callbacks: Vec<Callback> = lock(&self.subscribers)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(snapshot);
        }
    }
}
