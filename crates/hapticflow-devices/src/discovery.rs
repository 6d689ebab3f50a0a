/*!
 * Device discovery for HapticFlow.
 *
 * A subtype manager owns the scanning lifecycle of one transport and the
 * descriptors of the devices that can be found on it. Each peripheral the
 * transport reports is matched against the descriptors; a match is connected,
 * wrapped in its protocol adapter, initialized, and announced.
 */
use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use hapticflow_core::{
    config::DeviceConfig,
    event::{EventHub, Subscription},
    logging,
    utils::{spawn_and_log, with_timeout},
};

use crate::device::{Device, DeviceError, Result};
use crate::protocols;
use crate::transport::{
    self, Advertisement, BluetoothAdapter, Characteristic, Peripheral, TransportError,
};

/// Lifecycle events a subtype manager publishes
#[derive(Debug, Clone)]
pub enum SubtypeManagerEvent {
    /// A peripheral was matched, connected and initialized
    DeviceAdded {
        /// The constructed device
        device: Arc<dyn Device>,
        /// Name of the descriptor that matched
        descriptor: &'static str,
    },
    /// The scan cycle ended
    ScanningFinished,
}

/// Transport-specific discovery engine
#[async_trait]
pub trait SubtypeManager: Send + Sync + Debug {
    /// Manager name, for logging
    fn name(&self) -> &'static str;

    /// Begin a scan cycle. Does nothing when a scan is already running.
    async fn start_scanning(&self) -> Result<()>;

    /// End the scan cycle. Matches already in flight may still complete.
    async fn stop_scanning(&self) -> Result<()>;

    /// Whether a scan cycle is running
    fn is_scanning(&self) -> bool;

    /// Subscribe to lifecycle events
    fn subscribe(&self) -> Result<Subscription<SubtypeManagerEvent>>;
}

/// Static identification of a Bluetooth LE device family, plus its factory
#[async_trait]
pub trait BluetoothDescriptor: Send + Sync + Debug {
    /// Descriptor name, also the protocol identifier of the devices it builds
    fn name(&self) -> &'static str;

    /// Advertised names that identify the family exactly
    fn names(&self) -> &[&'static str];

    /// Service set the family advertises
    fn services(&self) -> &[Uuid];

    /// Characteristics the adapter needs, in the order it expects them
    fn characteristics(&self) -> &[Uuid];

    /// Build the protocol adapter for a matched peripheral
    async fn create_device(
        &self,
        peripheral: Arc<dyn Peripheral>,
        characteristics: Vec<Arc<dyn Characteristic>>,
    ) -> transport::Result<Arc<dyn Device>>;
}

/// How strongly a descriptor matched an advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    Service,
    Name,
}

fn match_rank(
    descriptor: &dyn BluetoothDescriptor,
    advertisement: &Advertisement,
) -> Option<MatchRank> {
    if let Some(name) = advertisement.name.as_deref() {
        if descriptor.names().contains(&name) {
            return Some(MatchRank::Name);
        }
    }
    let services = descriptor.services();
    if !services.is_empty()
        && services
            .iter()
            .all(|service| advertisement.services.contains(service))
    {
        return Some(MatchRank::Service);
    }
    None
}

/// Pick the descriptor for an advertisement.
///
/// The strongest rank wins. Several descriptors at the strongest rank are
/// ambiguous and yield `None`, as does no match at all.
pub fn select_descriptor(
    descriptors: &[Arc<dyn BluetoothDescriptor>],
    advertisement: &Advertisement,
) -> Option<Arc<dyn BluetoothDescriptor>> {
    let ranked: Vec<_> = descriptors
        .iter()
        .filter_map(|d| match_rank(d.as_ref(), advertisement).map(|rank| (rank, d)))
        .collect();
    let best = ranked.iter().map(|(rank, _)| *rank).max()?;
    let mut winners = ranked.into_iter().filter(|(rank, _)| *rank == best);
    let (_, winner) = winners.next()?;
    if let Some((_, other)) = winners.next() {
        warn!(
            address = %advertisement.address,
            name = ?advertisement.name,
            first = winner.name(),
            second = other.name(),
            "Peripheral matches several descriptors, ignoring it"
        );
        return None;
    }
    Some(winner.clone())
}

struct ScanCycle {
    generation: u64,
    task: JoinHandle<()>,
}

struct Inner {
    adapter: Arc<dyn BluetoothAdapter>,
    descriptors: RwLock<Vec<Arc<dyn BluetoothDescriptor>>>,
    events: EventHub<SubtypeManagerEvent>,
    scan: AsyncMutex<Option<ScanCycle>>,
    scanning: AtomicBool,
    generation: AtomicU64,
    claimed: Mutex<HashSet<String>>,
    config: DeviceConfig,
}

impl Inner {
    fn descriptors(&self) -> Vec<Arc<dyn BluetoothDescriptor>> {
        self.descriptors
            .read()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Claim an address for the current cycle; false if already claimed
    fn claim(&self, address: &str) -> bool {
        self.claimed
            .lock()
            .map(|mut claimed| claimed.insert(address.to_string()))
            .unwrap_or(false)
    }

    /// Let a later advertisement of `address` be matched again
    fn release(&self, address: &str) {
        if let Ok(mut claimed) = self.claimed.lock() {
            claimed.remove(address);
        }
    }

    /// End the cycle if it is still `generation` (or any cycle for `None`).
    /// Returns the task of the ended cycle.
    async fn finish(&self, generation: Option<u64>) -> Option<JoinHandle<()>> {
        let mut scan = self.scan.lock().await;
        match (scan.as_ref(), generation) {
            (None, _) => return None,
            (Some(cycle), Some(g)) if cycle.generation != g => return None,
            _ => {}
        }
        let cycle = scan.take()?;
        self.scanning.store(false, Ordering::Release);
        drop(scan);

        info!("Scanning finished");
        let _ = self.events.publish(SubtypeManagerEvent::ScanningFinished);
        Some(cycle.task)
    }

    fn handle_peripheral(self: &Arc<Self>, peripheral: Arc<dyn Peripheral>) {
        let advertisement = peripheral.advertisement();
        let Some(descriptor) = select_descriptor(&self.descriptors(), &advertisement) else {
            debug!(
                address = %advertisement.address,
                name = ?advertisement.name,
                "No descriptor matches peripheral"
            );
            return;
        };
        if !self.claim(&advertisement.address) {
            debug!(address = %advertisement.address, "Peripheral already claimed this cycle");
            return;
        }

        info!(
            address = %advertisement.address,
            descriptor = descriptor.name(),
            "Peripheral matched"
        );
        let span = logging::device_span(
            advertisement.name.as_deref().unwrap_or(&advertisement.address),
            descriptor.name(),
        );
        let inner = self.clone();
        let address = advertisement.address;
        spawn_and_log(
            "bluetooth match",
            async move {
                let result = inner.connect(descriptor, peripheral).await;
                if let Err(DeviceError::Transport(_)) = &result {
                    inner.release(&address);
                }
                result
            }
            .instrument(span),
        );
    }

    async fn connect(
        &self,
        descriptor: Arc<dyn BluetoothDescriptor>,
        peripheral: Arc<dyn Peripheral>,
    ) -> Result<()> {
        let resolved = with_timeout(
            self.config.characteristic_timeout(),
            "characteristic resolution",
            peripheral.characteristics(descriptor.characteristics()),
        )
        .await
        .map_err(|e| TransportError::Timeout(e.to_string()))
        .and_then(|characteristics| characteristics);
        let created = match resolved {
            Ok(characteristics) => {
                descriptor
                    .create_device(peripheral.clone(), characteristics)
                    .await
            }
            Err(e) => Err(e),
        };
        let device = match created {
            Ok(device) => device,
            Err(e) => {
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect unmatched peripheral: {}", disconnect_err);
                }
                return Err(e.into());
            }
        };

        let initialized = with_timeout(
            self.config.initialize_timeout(),
            "device initialization",
            device.initialize(),
        )
        .await
        .map_err(DeviceError::from)
        .and_then(|reply| reply);
        if let Err(e) = initialized {
            if let Err(disconnect_err) = device.disconnect().await {
                warn!(device = device.name(), "Failed to disconnect device: {}", disconnect_err);
            }
            return Err(e);
        }

        info!(device = device.name(), "Device ready");
        self.events
            .publish(SubtypeManagerEvent::DeviceAdded {
                device,
                descriptor: descriptor.name(),
            })
            .map_err(DeviceError::from)?;
        Ok(())
    }
}

/// Subtype manager for Bluetooth LE
#[derive(Clone)]
pub struct BluetoothSubtypeManager {
    inner: Arc<Inner>,
}

impl BluetoothSubtypeManager {
    /// Create a manager over `adapter` knowing the built-in device families
    pub fn new(adapter: Arc<dyn BluetoothAdapter>, config: DeviceConfig) -> Self {
        let manager = Self::without_descriptors(adapter, config);
        for descriptor in protocols::builtin_descriptors() {
            manager.add_descriptor(descriptor);
        }
        manager
    }

    /// Create a manager that knows no device families yet
    pub fn without_descriptors(adapter: Arc<dyn BluetoothAdapter>, config: DeviceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                descriptors: RwLock::new(Vec::new()),
                events: EventHub::new("bluetooth"),
                scan: AsyncMutex::new(None),
                scanning: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                claimed: Mutex::new(HashSet::new()),
                config,
            }),
        }
    }

    /// Register a descriptor. It applies to the next peripheral reported,
    /// including during a running scan.
    pub fn add_descriptor(&self, descriptor: Arc<dyn BluetoothDescriptor>) {
        debug!(descriptor = descriptor.name(), "Adding descriptor");
        if let Ok(mut descriptors) = self.inner.descriptors.write() {
            descriptors.push(descriptor);
        }
    }

    /// Names of the registered descriptors
    pub fn descriptor_names(&self) -> Vec<&'static str> {
        self.inner.descriptors().iter().map(|d| d.name()).collect()
    }

    async fn scan_loop(
        inner: Arc<Inner>,
        generation: u64,
        mut peripherals: mpsc::Receiver<Arc<dyn Peripheral>>,
        scan_timeout: Option<Duration>,
    ) {
        let deadline = async {
            match scan_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = peripherals.recv() => match next {
                    Some(peripheral) => inner.handle_peripheral(peripheral),
                    None => {
                        debug!("Adapter ended the scan");
                        break;
                    }
                },
                _ = &mut deadline => {
                    info!("Scan timeout reached");
                    if let Err(e) = inner.adapter.stop_scan().await {
                        warn!("Failed to stop adapter scan: {}", e);
                    }
                    break;
                }
            }
        }
        inner.finish(Some(generation)).await;
    }
}

#[async_trait]
impl SubtypeManager for BluetoothSubtypeManager {
    fn name(&self) -> &'static str {
        "bluetooth"
    }

    async fn start_scanning(&self) -> Result<()> {
        let mut scan = self.inner.scan.lock().await;
        if scan.is_some() {
            debug!("Scan already running");
            return Ok(());
        }

        let peripherals = self.inner.adapter.start_scan().await?;
        if let Ok(mut claimed) = self.inner.claimed.lock() {
            claimed.clear();
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let task = tokio::spawn(
            Self::scan_loop(
                self.inner.clone(),
                generation,
                peripherals,
                self.inner.config.scan_timeout(),
            )
            .instrument(logging::manager_span(self.name())),
        );
        *scan = Some(ScanCycle { generation, task });
        self.inner.scanning.store(true, Ordering::Release);
        info!(generation, "Scanning started");
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<()> {
        let Some(task) = self.inner.finish(None).await else {
            debug!("No scan to stop");
            return Ok(());
        };
        task.abort();
        self.inner.adapter.stop_scan().await?;
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> Result<Subscription<SubtypeManagerEvent>> {
        Ok(self.inner.events.subscribe()?)
    }
}

impl Debug for BluetoothSubtypeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BluetoothSubtypeManager")
            .field("descriptors", &self.descriptor_names())
            .field("scanning", &self.is_scanning())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use hapticflow_core::message::{
        self, Message, MessageAttributes, ProtocolMessage, StopDeviceCmd,
    };

    use crate::device::{DeviceHandle, DispatchTable};
    use crate::protocols::{kiiroo, lovense};
    use crate::transport::simulated::{SimulatedAdapter, SimulatedPeripheral};

    const SHARED_SERVICE: Uuid = Uuid::from_u128(0xfeed);
    const TX: Uuid = Uuid::from_u128(0xfeed_0001);

    #[derive(Debug)]
    struct StubDevice {
        handle: DeviceHandle,
    }

    #[async_trait]
    impl Device for StubDevice {
        fn handle(&self) -> &DeviceHandle {
            &self.handle
        }

        async fn disconnect(&self) -> Result<()> {
            self.handle.mark_disconnected();
            Ok(())
        }
    }

    #[derive(Debug)]
    struct StubDescriptor {
        name: &'static str,
        names: Vec<&'static str>,
        services: Vec<Uuid>,
        characteristics: Vec<Uuid>,
        created: AtomicUsize,
    }

    impl StubDescriptor {
        fn new(name: &'static str, names: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                names,
                services: vec![SHARED_SERVICE],
                characteristics: vec![TX],
                created: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BluetoothDescriptor for StubDescriptor {
        fn name(&self) -> &'static str {
            self.name
        }

        fn names(&self) -> &[&'static str] {
            &self.names
        }

        fn services(&self) -> &[Uuid] {
            &self.services
        }

        fn characteristics(&self) -> &[Uuid] {
            &self.characteristics
        }

        async fn create_device(
            &self,
            _peripheral: Arc<dyn Peripheral>,
            _characteristics: Vec<Arc<dyn Characteristic>>,
        ) -> transport::Result<Arc<dyn Device>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let table = DispatchTable::builder(self.name)
                .on(MessageAttributes::default(), |cmd: StopDeviceCmd| async move {
                    Ok(Message::from(message::Ok::new(cmd.id())))
                })
                .build();
            Ok(Arc::new(StubDevice {
                handle: DeviceHandle::new(self.name, self.name, table),
            }))
        }
    }

    fn advertisement(name: Option<&str>, services: Vec<Uuid>) -> Advertisement {
        Advertisement {
            name: name.map(str::to_string),
            address: "00:00".to_string(),
            services,
        }
    }

    async fn next_added(
        events: &mut Subscription<SubtypeManagerEvent>,
    ) -> (Arc<dyn Device>, &'static str) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event hub closed");
            if let SubtypeManagerEvent::DeviceAdded { device, descriptor } = event {
                return (device, descriptor);
            }
        }
    }

    #[test]
    fn test_name_match_outranks_service_match() {
        let alpha: Arc<dyn BluetoothDescriptor> = StubDescriptor::new("alpha", vec!["Alpha"]);
        let beta: Arc<dyn BluetoothDescriptor> = StubDescriptor::new("beta", vec!["Beta"]);
        let descriptors = vec![alpha, beta];

        let adv = advertisement(Some("Beta"), vec![SHARED_SERVICE]);
        assert_eq!(select_descriptor(&descriptors, &adv).unwrap().name(), "beta");
    }

    #[test]
    fn test_ambiguous_service_match_is_ignored() {
        let alpha: Arc<dyn BluetoothDescriptor> = StubDescriptor::new("alpha", vec!["Alpha"]);
        let beta: Arc<dyn BluetoothDescriptor> = StubDescriptor::new("beta", vec!["Beta"]);
        let descriptors = vec![alpha, beta];

        let adv = advertisement(Some("Gamma"), vec![SHARED_SERVICE]);
        assert!(select_descriptor(&descriptors, &adv).is_none());
    }

    #[test]
    fn test_unknown_peripheral_is_ignored() {
        let alpha: Arc<dyn BluetoothDescriptor> = StubDescriptor::new("alpha", vec!["Alpha"]);
        let adv = advertisement(Some("Gamma"), vec![Uuid::from_u128(1)]);
        assert!(select_descriptor(&[alpha], &adv).is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_disjoint_descriptors_emit_one_device() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let peripheral = Arc::new(
            SimulatedPeripheral::new(Some("LVS-Z001"), "11:22", &[lovense::SERVICE])
                .with_characteristics(&[lovense::TX, lovense::RX]),
        );
        adapter.add_peripheral(peripheral);

        let manager = BluetoothSubtypeManager::without_descriptors(adapter, DeviceConfig::default());
        manager.add_descriptor(Arc::new(lovense::LovenseDescriptor));
        manager.add_descriptor(Arc::new(kiiroo::KiirooDescriptor));
        let mut events = manager.subscribe().unwrap();

        manager.start_scanning().await.unwrap();
        let (device, descriptor) = next_added(&mut events).await;
        assert_eq!(descriptor, "lovense");
        assert_eq!(device.identifier(), "lovense");

        manager.stop_scanning().await.unwrap();
        let mut added = 0;
        while let Some(event) = events.try_recv() {
            if matches!(event, SubtypeManagerEvent::DeviceAdded { .. }) {
                added += 1;
            }
        }
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn test_address_claimed_once_per_cycle() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let descriptor = StubDescriptor::new("alpha", vec!["Alpha"]);
        let manager =
            BluetoothSubtypeManager::without_descriptors(adapter.clone(), DeviceConfig::default());
        manager.add_descriptor(descriptor.clone());
        let mut events = manager.subscribe().unwrap();

        manager.start_scanning().await.unwrap();
        for _ in 0..2 {
            adapter.add_peripheral(Arc::new(
                SimulatedPeripheral::new(Some("Alpha"), "aa:aa", &[]).with_characteristic(TX),
            ));
        }
        next_added(&mut events).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(descriptor.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_characteristic_aborts_only_that_match() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let broken = Arc::new(SimulatedPeripheral::new(Some("Alpha"), "aa:01", &[]));
        let working = Arc::new(
            SimulatedPeripheral::new(Some("Alpha"), "aa:02", &[]).with_characteristic(TX),
        );
        adapter.add_peripheral(broken.clone());
        adapter.add_peripheral(working.clone());

        let descriptor = StubDescriptor::new("alpha", vec!["Alpha"]);
        let manager = BluetoothSubtypeManager::without_descriptors(adapter, DeviceConfig::default());
        manager.add_descriptor(descriptor.clone());
        let mut events = manager.subscribe().unwrap();

        manager.start_scanning().await.unwrap();
        next_added(&mut events).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.is_scanning());
        assert_eq!(descriptor.created.load(Ordering::SeqCst), 1);
        assert_eq!(broken.disconnect_calls(), 1);
        assert_eq!(working.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_match_can_retry_on_next_advertisement() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let descriptor = StubDescriptor::new("alpha", vec!["Alpha"]);
        let manager =
            BluetoothSubtypeManager::without_descriptors(adapter.clone(), DeviceConfig::default());
        manager.add_descriptor(descriptor.clone());
        let mut events = manager.subscribe().unwrap();

        manager.start_scanning().await.unwrap();
        adapter.add_peripheral(Arc::new(SimulatedPeripheral::new(Some("Alpha"), "aa:03", &[])));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(descriptor.created.load(Ordering::SeqCst), 0);

        adapter.add_peripheral(Arc::new(
            SimulatedPeripheral::new(Some("Alpha"), "aa:03", &[]).with_characteristic(TX),
        ));
        next_added(&mut events).await;
        assert_eq!(descriptor.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_descriptor_added_during_scan_applies_to_seen_peripheral() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let manager =
            BluetoothSubtypeManager::without_descriptors(adapter.clone(), DeviceConfig::default());
        let mut events = manager.subscribe().unwrap();
        manager.start_scanning().await.unwrap();

        let advertise = || {
            Arc::new(
                SimulatedPeripheral::new(Some("LVS-Z001"), "bb:01", &[lovense::SERVICE])
                    .with_characteristics(&[lovense::TX, lovense::RX]),
            )
        };
        adapter.add_peripheral(advertise());
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.add_descriptor(Arc::new(lovense::LovenseDescriptor));
        adapter.add_peripheral(advertise());
        let (device, descriptor) = next_added(&mut events).await;
        assert_eq!(descriptor, "lovense");
        assert!(device.is_connected());
    }

    #[tokio::test]
    async fn test_start_twice_is_a_no_op() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let manager =
            BluetoothSubtypeManager::without_descriptors(adapter.clone(), DeviceConfig::default());
        manager.start_scanning().await.unwrap();
        manager.start_scanning().await.unwrap();
        assert_eq!(adapter.scan_starts(), 1);
        assert!(manager.is_scanning());
    }

    #[tokio::test]
    async fn test_stop_emits_scanning_finished_once() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let manager =
            BluetoothSubtypeManager::without_descriptors(adapter.clone(), DeviceConfig::default());
        let mut events = manager.subscribe().unwrap();

        manager.start_scanning().await.unwrap();
        manager.stop_scanning().await.unwrap();
        manager.stop_scanning().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(events.try_recv(), Some(SubtypeManagerEvent::ScanningFinished)));
        assert!(events.try_recv().is_none());
        assert!(!manager.is_scanning());
        assert!(!adapter.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_timeout_stops_scanning() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let config = DeviceConfig {
            scan_timeout_ms: 20,
            ..DeviceConfig::default()
        };
        let manager = BluetoothSubtypeManager::without_descriptors(adapter.clone(), config);
        let mut events = manager.subscribe().unwrap();

        manager.start_scanning().await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(SubtypeManagerEvent::ScanningFinished)));
        assert!(!manager.is_scanning());
        assert!(!adapter.is_scanning());
    }

    #[tokio::test]
    async fn test_failed_adapter_reports_transport_error() {
        let adapter = Arc::new(SimulatedAdapter::new());
        adapter.set_fail_scan(true);
        let manager = BluetoothSubtypeManager::without_descriptors(adapter, DeviceConfig::default());
        let err = manager.start_scanning().await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport(TransportError::ScanFailed(_))));
        assert!(!manager.is_scanning());
    }

    #[test]
    fn test_builtin_descriptors_are_registered() {
        let manager = BluetoothSubtypeManager::new(
            Arc::new(SimulatedAdapter::new()),
            DeviceConfig::default(),
        );
        let names = manager.descriptor_names();
        for name in ["lovense", "fleshlight-launch", "vorze-a10-cyclone", "kiiroo"] {
            assert!(names.contains(&name), "missing {}", name);
        }
    }
}
