//! BLE transport backed by btleplug.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::advertisement::{Advertisement, parse_manufacturer_data};
use crate::constants::DEFAULT_SCAN_TIMEOUT;
use crate::error::Error;
use crate::transport::{Transport, TransportSession};
use crate::util::lock;

fn ble_error(err: btleplug::Error) -> Error {
    Error::Transport(err.to_string())
}

/// [`Transport`] over the system Bluetooth adapter.
pub struct BleTransport {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BleTransport {
    /// Opens the first Bluetooth adapter on the system.
    pub async fn new() -> Result<Self, Error> {
        let manager = Manager::new().await.map_err(ble_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(ble_error)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Transport("no bluetooth adapter found".into()))?;
        Ok(Self::with_adapter(adapter))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    /// How long [`Transport::connect`] scans for an unknown address before
    /// giving up with [`Error::DeviceNotFound`].
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    /// Scans for `duration` and returns every advertisement that looks like
    /// an LD2410.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, Error> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(ble_error)?;
        tokio::time::sleep(duration).await;
        let peripherals = self.adapter.peripherals().await.map_err(ble_error)?;
        let _ = self.adapter.stop_scan().await;
        let mut found = Vec::new();
        for peripheral in peripherals {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            let advertisement = Advertisement {
                address: peripheral.address().to_string(),
                local_name: properties.local_name,
                rssi: properties.rssi,
                firmware: parse_manufacturer_data(&properties.manufacturer_data),
            };
            if advertisement.is_radar() {
                found.push(advertisement);
            }
        }
        Ok(found)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, Error> {
        // a previous scan may already know the peripheral
        for peripheral in self.adapter.peripherals().await.map_err(ble_error)? {
            if matches_address(&peripheral, address) {
                return Ok(peripheral);
            }
        }
        let mut events = self.adapter.events().await.map_err(ble_error)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(ble_error)?;
        let found = timeout(self.scan_timeout, async {
            while let Some(event) = events.next().await {
                let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event
                else {
                    continue;
                };
                let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                    continue;
                };
                if matches_address(&peripheral, address) {
                    return Some(peripheral);
                }
            }
            None
        })
        .await;
        let _ = self.adapter.stop_scan().await;
        match found {
            Ok(Some(peripheral)) => Ok(peripheral),
            _ => Err(Error::DeviceNotFound(address.to_owned())),
        }
    }
}

fn matches_address(peripheral: &Peripheral, address: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(address)
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&self, address: &str) -> Result<Arc<dyn TransportSession>, Error> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral.connect().await.map_err(ble_error)?;
        Ok(Arc::new(BleSession {
            peripheral,
            write_char: StdMutex::new(None),
            notify_char: StdMutex::new(None),
            connected: Arc::new(AtomicBool::new(true)),
        }))
    }

    async fn clear_cache(&self, address: &str) {
        // btleplug rediscovers services on every connect, nothing persists
        debug!(%address, "gatt cache clear requested");
    }
}

struct BleSession {
    peripheral: Peripheral,
    write_char: StdMutex<Option<Characteristic>>,
    notify_char: StdMutex<Option<Characteristic>>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSession for BleSession {
    async fn resolve_characteristics(&self, write: Uuid, notify: Uuid) -> Result<(), Error> {
        self.peripheral.discover_services().await.map_err(ble_error)?;
        let characteristics = self.peripheral.characteristics();
        let write_char = characteristics
            .iter()
            .find(|c| c.uuid == write)
            .cloned()
            .ok_or(Error::CharacteristicMissing(write))?;
        let notify_char = characteristics
            .iter()
            .find(|c| c.uuid == notify)
            .cloned()
            .ok_or(Error::CharacteristicMissing(notify))?;
        *lock(&self.write_char) = Some(write_char);
        *lock(&self.notify_char) = Some(notify_char);
        Ok(())
    }

    async fn start_notifications(&self) -> Result<mpsc::Receiver<Bytes>, Error> {
        let characteristic = lock(&self.notify_char)
            .clone()
            .ok_or_else(|| Error::Transport("characteristics not resolved".into()))?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(ble_error)?;
        let mut stream = self.peripheral.notifications().await.map_err(ble_error)?;
        let (tx, rx) = mpsc::channel(32);
        let uuid = characteristic.uuid;
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                if tx.send(Bytes::from(notification.value)).await.is_err() {
                    return;
                }
            }
            // stream end means the peripheral is gone
            connected.store(false, Ordering::SeqCst);
        });
        Ok(rx)
    }

    async fn stop_notifications(&self) -> Result<(), Error> {
        let characteristic = lock(&self.notify_char).clone();
        if let Some(characteristic) = characteristic {
            self.peripheral
                .unsubscribe(&characteristic)
                .await
                .map_err(ble_error)?;
        }
        Ok(())
    }

    async fn write(&self, frame: &[u8]) -> Result<(), Error> {
        let characteristic = lock(&self.write_char)
            .clone()
            .ok_or_else(|| Error::Transport("characteristics not resolved".into()))?;
        self.peripheral
            .write(&characteristic, frame, WriteType::WithoutResponse)
            .await
            .map_err(ble_error)
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(err) = self.peripheral.disconnect().await {
            warn!(error = %err, "peripheral disconnect failed");
            return Err(ble_error(err));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
