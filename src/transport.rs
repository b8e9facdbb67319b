//! Link abstraction between the device logic and an actual radio stack.
//!
//! The device layer never talks to a Bluetooth API directly. It drives a
//! [`Transport`] that opens sessions, and a [`TransportSession`] that moves
//! bytes. The `ble` feature provides the real implementation; tests provide
//! scripted ones.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Error;

/// Opens links to radars by address.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connects to the device, returning a live session.
    ///
    /// Fails with [`Error::DeviceNotFound`] when the address is not
    /// reachable, which callers treat as permanent.
    async fn connect(&self, address: &str) -> Result<Arc<dyn TransportSession>, Error>;

    /// Drops any cached GATT data for the address. Called after a session
    /// turned out to be missing expected characteristics.
    async fn clear_cache(&self, address: &str);
}

/// One established link.
#[async_trait]
pub trait TransportSession: Send + Sync + 'static {
    /// Looks up the write and notify characteristics, failing with
    /// [`Error::CharacteristicMissing`] when either is absent.
    async fn resolve_characteristics(&self, write: Uuid, notify: Uuid) -> Result<(), Error>;

    /// Starts listening for notifications.
    ///
    /// The returned channel closes when the link goes away, whatever the
    /// cause. That close is the only disconnect signal the device layer
    /// gets.
    async fn start_notifications(&self) -> Result<mpsc::Receiver<Bytes>, Error>;

    /// Stops notification delivery. Best effort before disconnecting.
    async fn stop_notifications(&self) -> Result<(), Error>;

    /// Writes one frame to the write characteristic.
    async fn write(&self, frame: &[u8]) -> Result<(), Error>;

    /// Tears the link down.
    async fn disconnect(&self) -> Result<(), Error>;

    /// Whether the link is still up, as far as the stack knows.
    fn is_connected(&self) -> bool;
}
