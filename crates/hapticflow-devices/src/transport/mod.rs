/*!
 * Transport boundary for HapticFlow devices.
 *
 * The device layer never talks to a Bluetooth stack directly. Scanning,
 * characteristic resolution and writes go through the traits in this module,
 * which a platform backend implements. [`simulated`] provides an in-memory
 * backend used by tests and demos.
 */
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub mod simulated;

/// Error type for transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A required characteristic is missing on the peripheral
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// A write was rejected
    #[error("Write to {uuid} failed: {reason}")]
    WriteFailed {
        /// Target characteristic
        uuid: Uuid,
        /// Backend failure description
        reason: String,
    },

    /// A read was rejected
    #[error("Read from {uuid} failed: {reason}")]
    ReadFailed {
        /// Source characteristic
        uuid: Uuid,
        /// Backend failure description
        reason: String,
    },

    /// Discovery could not be started or continued
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    /// The link to the peripheral is gone
    #[error("Link to {0} is closed")]
    LinkClosed(String),

    /// A transport step did not finish in time
    #[error("Transport timeout: {0}")]
    Timeout(String),
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Identity a peripheral advertises before it is connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised local name
    pub name: Option<String>,
    /// Platform address, unique per peripheral
    pub address: String,
    /// Advertised service identifiers
    pub services: Vec<Uuid>,
}

/// A GATT characteristic on a connected peripheral
#[async_trait]
pub trait Characteristic: Send + Sync + Debug {
    /// Characteristic identifier
    fn uuid(&self) -> Uuid;

    /// Write bytes, optionally waiting for the peripheral's acknowledgment
    async fn write(&self, data: Bytes, with_response: bool) -> Result<()>;

    /// Read the current value
    async fn read(&self) -> Result<Bytes>;

    /// Receive value notifications
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Bytes>>;
}

/// A discovered peripheral
#[async_trait]
pub trait Peripheral: Send + Sync + Debug {
    /// What the peripheral advertised
    fn advertisement(&self) -> Advertisement;

    /// Resolve characteristics, returned in the order requested
    async fn characteristics(&self, wanted: &[Uuid]) -> Result<Vec<Arc<dyn Characteristic>>>;

    /// Tear down the link
    async fn disconnect(&self) -> Result<()>;

    /// Link state: `true` while connected. The sender side is dropped or set
    /// to `false` when the link is lost.
    fn link_state(&self) -> watch::Receiver<bool>;
}

/// A platform Bluetooth LE adapter
#[async_trait]
pub trait BluetoothAdapter: Send + Sync + Debug {
    /// Start discovery. Peripherals arrive on the returned channel until the
    /// scan stops, at which point the channel closes.
    async fn start_scan(&self) -> Result<mpsc::Receiver<Arc<dyn Peripheral>>>;

    /// Stop discovery
    async fn stop_scan(&self) -> Result<()>;
}

/// Look up the characteristic at `position` of a resolved list
pub fn take_characteristic(
    characteristics: &[Arc<dyn Characteristic>],
    position: usize,
    uuid: Uuid,
) -> Result<Arc<dyn Characteristic>> {
    characteristics
        .get(position)
        .filter(|chr| chr.uuid() == uuid)
        .cloned()
        .ok_or(TransportError::CharacteristicNotFound(uuid))
}
