/*!
 * In-memory transport backend.
 *
 * Simulated peripherals record every write, can be told to fail writes,
 * push notifications, and drop their link. The simulated adapter advertises
 * whatever peripherals were added to it.
 */
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use super::{Advertisement, BluetoothAdapter, Characteristic, Peripheral, Result, TransportError};

/// A characteristic that records writes
#[derive(Debug)]
pub struct SimulatedCharacteristic {
    uuid: Uuid,
    writes: Mutex<Vec<Bytes>>,
    value: Mutex<Bytes>,
    fail_writes: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Bytes>>>,
}

impl SimulatedCharacteristic {
    /// Create a characteristic with an empty value
    pub fn new(uuid: Uuid) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            writes: Mutex::new(Vec::new()),
            value: Mutex::new(Bytes::new()),
            fail_writes: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Every accepted write, oldest first
    pub fn writes(&self) -> Vec<Bytes> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// The most recent accepted write
    pub fn last_write(&self) -> Option<Bytes> {
        self.writes.lock().ok().and_then(|w| w.last().cloned())
    }

    /// Make subsequent writes fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Set the value returned by reads
    pub fn set_value(&self, value: impl Into<Bytes>) {
        if let Ok(mut current) = self.value.lock() {
            *current = value.into();
        }
    }

    /// Push a notification to every subscriber. Returns how many received it.
    pub fn notify(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return 0;
        };
        subscribers.retain(|tx| tx.send(data.clone()).is_ok());
        subscribers.len()
    }
}

#[async_trait]
impl Characteristic for SimulatedCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn write(&self, data: Bytes, _with_response: bool) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed {
                uuid: self.uuid,
                reason: "simulated write failure".to_string(),
            });
        }
        debug!(uuid = %self.uuid, ?data, "Simulated write");
        self.writes
            .lock()
            .map_err(|_| TransportError::WriteFailed {
                uuid: self.uuid,
                reason: "write log poisoned".to_string(),
            })?
            .push(data);
        Ok(())
    }

    async fn read(&self) -> Result<Bytes> {
        self.value
            .lock()
            .map(|v| v.clone())
            .map_err(|_| TransportError::ReadFailed {
                uuid: self.uuid,
                reason: "value poisoned".to_string(),
            })
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| TransportError::ReadFailed {
                uuid: self.uuid,
                reason: "subscriber list poisoned".to_string(),
            })?
            .push(tx);
        Ok(rx)
    }
}

/// A peripheral living in memory
#[derive(Debug)]
pub struct SimulatedPeripheral {
    advertisement: Advertisement,
    characteristics: HashMap<Uuid, Arc<SimulatedCharacteristic>>,
    link: watch::Sender<bool>,
    disconnect_calls: AtomicUsize,
}

impl SimulatedPeripheral {
    /// Create a peripheral advertising `name` and `services`
    pub fn new(name: Option<&str>, address: &str, services: &[Uuid]) -> Self {
        let (link, _) = watch::channel(true);
        Self {
            advertisement: Advertisement {
                name: name.map(str::to_string),
                address: address.to_string(),
                services: services.to_vec(),
            },
            characteristics: HashMap::new(),
            link,
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Add a characteristic
    pub fn with_characteristic(mut self, uuid: Uuid) -> Self {
        self.characteristics
            .insert(uuid, SimulatedCharacteristic::new(uuid));
        self
    }

    /// Add several characteristics
    pub fn with_characteristics(self, uuids: &[Uuid]) -> Self {
        uuids
            .iter()
            .fold(self, |peripheral, uuid| peripheral.with_characteristic(*uuid))
    }

    /// Access a characteristic to inspect writes or inject behavior
    pub fn characteristic(&self, uuid: Uuid) -> Option<Arc<SimulatedCharacteristic>> {
        self.characteristics.get(&uuid).cloned()
    }

    /// Simulate the link dropping out from under the device
    pub fn drop_link(&self) {
        self.link.send_replace(false);
    }

    /// How many times `disconnect` was called
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Peripheral for SimulatedPeripheral {
    fn advertisement(&self) -> Advertisement {
        self.advertisement.clone()
    }

    async fn characteristics(&self, wanted: &[Uuid]) -> Result<Vec<Arc<dyn Characteristic>>> {
        wanted
            .iter()
            .map(|uuid| {
                self.characteristics
                    .get(uuid)
                    .map(|chr| chr.clone() as Arc<dyn Characteristic>)
                    .ok_or(TransportError::CharacteristicNotFound(*uuid))
            })
            .collect()
    }

    async fn disconnect(&self) -> Result<()> {
        // Teardown completes on a later poll, like a real link
        tokio::task::yield_now().await;
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.link.send_replace(false);
        Ok(())
    }

    fn link_state(&self) -> watch::Receiver<bool> {
        self.link.subscribe()
    }
}

/// An adapter advertising a fixed, growable set of peripherals
#[derive(Debug, Default)]
pub struct SimulatedAdapter {
    peripherals: Mutex<Vec<Arc<SimulatedPeripheral>>>,
    scan: Mutex<Option<mpsc::Sender<Arc<dyn Peripheral>>>>,
    scan_starts: AtomicUsize,
    fail_scan: AtomicBool,
}

impl SimulatedAdapter {
    /// Create an adapter with no peripherals in range
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring a peripheral into range. It is advertised immediately if a scan
    /// is running, and at the start of every later scan.
    pub fn add_peripheral(&self, peripheral: Arc<SimulatedPeripheral>) {
        if let Ok(scan) = self.scan.lock() {
            if let Some(tx) = scan.as_ref() {
                let _ = tx.try_send(peripheral.clone() as Arc<dyn Peripheral>);
            }
        }
        if let Ok(mut peripherals) = self.peripherals.lock() {
            peripherals.push(peripheral);
        }
    }

    /// Make subsequent scans fail to start
    pub fn set_fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// How many scans were started
    pub fn scan_starts(&self) -> usize {
        self.scan_starts.load(Ordering::SeqCst)
    }

    /// Whether a scan is running
    pub fn is_scanning(&self) -> bool {
        self.scan.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

#[async_trait]
impl BluetoothAdapter for SimulatedAdapter {
    async fn start_scan(&self) -> Result<mpsc::Receiver<Arc<dyn Peripheral>>> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(TransportError::ScanFailed("simulated adapter is off".to_string()));
        }
        self.scan_starts.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        let peripherals = self
            .peripherals
            .lock()
            .map(|p| p.clone())
            .map_err(|_| TransportError::ScanFailed("peripheral list poisoned".to_string()))?;
        for peripheral in peripherals {
            let _ = tx.try_send(peripheral as Arc<dyn Peripheral>);
        }

        *self
            .scan
            .lock()
            .map_err(|_| TransportError::ScanFailed("scan state poisoned".to_string()))? = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Ok(mut scan) = self.scan.lock() {
            scan.take();
        }
        Ok(())
    }
}
