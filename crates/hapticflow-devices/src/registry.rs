/*!
 * Device registry for HapticFlow.
 *
 * The registry owns every connected device. It assigns indices to devices
 * announced by subtype managers, routes client commands to them by index,
 * and publishes the outgoing message stream (device added/removed, readings,
 * scanning finished, forwarded logs) a front end relays to the client.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use hapticflow_core::{
    config::SharedConfig,
    error::Error as CoreError,
    event::{EventHub, Subscription},
    logging,
    message::{
        self, DeviceAdded, DeviceList, DeviceMessage, DeviceMessageInfo, DeviceRemoved,
        ErrorClass, Log, LogLevel, Message, MessageType, ProtocolMessage, ScanningFinished,
        ServerInfo, StopDeviceCmd, CURRENT_SCHEMA_VERSION, DEFAULT_MESSAGE_ID,
    },
};

use crate::device::{Device, DeviceError, DeviceEvent, Result};
use crate::discovery::{SubtypeManager, SubtypeManagerEvent};

/// A device together with the index the registry assigned it
#[derive(Debug, Clone)]
pub struct RegisteredDevice {
    index: u32,
    device: Arc<dyn Device>,
}

impl RegisteredDevice {
    /// Registry index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The device
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Device name
    pub fn name(&self) -> &str {
        self.device.name()
    }

    /// Announcement entry listing the commands a client at
    /// `schema_version` can send
    pub fn info(&self, schema_version: u32) -> DeviceMessageInfo {
        let device_messages = self
            .device
            .allowed_message_types()
            .into_iter()
            .filter(|t| t.schema_version() <= schema_version)
            .map(|t| (t, self.device.message_attributes(t)))
            .collect();
        DeviceMessageInfo {
            device_index: self.index,
            device_name: self.device.name().to_string(),
            device_messages,
        }
    }

    /// Route a command to the device.
    ///
    /// A generic command the device only understands in its older shape is
    /// translated first.
    pub async fn dispatch(&self, msg: DeviceMessage) -> Result<Message> {
        let message_type = msg.message_type();
        let allowed = self.device.allowed_message_types();
        if !allowed.contains(&message_type) && self.device.is_connected() {
            if let Some(previous) = message_type.previous().filter(|p| allowed.contains(p)) {
                let translated = msg
                    .downgrade(previous.schema_version())
                    .map_err(DeviceError::Downgrade)?;
                debug!(from = %message_type, to = %previous, "Translated command for device");
                return self.device.dispatch(translated).await;
            }
        }
        self.device.dispatch(msg).await
    }
}

/// Device registry
pub struct DeviceRegistry {
    devices: RwLock<HashMap<u32, RegisteredDevice>>,
    next_index: AtomicU32,
    managers: RwLock<Vec<Arc<dyn SubtypeManager>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    outgoing: EventHub<Message>,
    config: SharedConfig,
    client_version: AtomicU32,
    log_level: Mutex<LogLevel>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new(config: SharedConfig) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            next_index: AtomicU32::new(0),
            managers: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            outgoing: EventHub::new("registry"),
            config,
            client_version: AtomicU32::new(CURRENT_SCHEMA_VERSION),
            log_level: Mutex::new(LogLevel::Off),
        }
    }

    fn write_devices(&self) -> Result<RwLockWriteGuard<'_, HashMap<u32, RegisteredDevice>>> {
        self.devices.write().map_err(|_| {
            CoreError::runtime("Failed to acquire write lock on device registry").into()
        })
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
    }

    fn publish(&self, msg: Message) {
        let _ = self.outgoing.publish(msg);
    }

    /// Forward a log line to the client if its requested level allows it
    fn log_to_client(&self, level: LogLevel, text: String) {
        let allowed = self
            .log_level
            .lock()
            .map(|current| current.allows(level))
            .unwrap_or(false);
        if allowed {
            self.publish(Log::new(level, text).into());
        }
    }

    /// Listen to a subtype manager and register the devices it finds
    pub fn add_subtype_manager(self: &Arc<Self>, manager: Arc<dyn SubtypeManager>) -> Result<()> {
        let mut events = manager.subscribe()?;
        let registry = Arc::downgrade(self);
        let task = tokio::spawn(
            async move {
                while let Some(event) = events.recv().await {
                    let Some(registry) = registry.upgrade() else {
                        break;
                    };
                    match event {
                        SubtypeManagerEvent::DeviceAdded { device, descriptor } => {
                            if let Err(e) = registry.register_device(device) {
                                warn!(descriptor, "Failed to register device: {}", e);
                                registry.log_to_client(
                                    LogLevel::Warn,
                                    format!("Failed to register device: {}", e),
                                );
                            }
                        }
                        SubtypeManagerEvent::ScanningFinished => registry.scanning_finished(),
                    }
                }
            }
            .instrument(logging::manager_span(manager.name())),
        );
        self.track(task);

        self.managers
            .write()
            .map_err(|_| CoreError::runtime("Failed to acquire write lock on subtype managers"))?
            .push(manager);
        Ok(())
    }

    /// Assign an index to a device and announce it
    pub fn register_device(self: &Arc<Self>, device: Arc<dyn Device>) -> Result<RegisteredDevice> {
        let mut events = device.subscribe()?;
        // Any disconnect after this point is queued on `events`
        if !device.is_connected() {
            return Err(DeviceError::Disconnected(device.name().to_string()));
        }

        let registered = RegisteredDevice {
            index: self.next_index.fetch_add(1, Ordering::SeqCst),
            device,
        };
        let index = registered.index;
        {
            let mut devices = self.write_devices()?;
            devices.insert(index, registered.clone());
            let info = registered.info(self.client_version.load(Ordering::Acquire));
            self.publish(DeviceAdded::new(info).into());
        }
        info!(index, device = registered.name(), "Device registered");
        self.log_to_client(
            LogLevel::Info,
            format!("Device {} added at index {}", registered.name(), index),
        );

        let registry: Weak<Self> = Arc::downgrade(self);
        let span = logging::device_span(registered.name(), registered.device.identifier());
        let task = tokio::spawn(
            async move {
                while let Some(event) = events.recv().await {
                    let Some(registry) = registry.upgrade() else {
                        break;
                    };
                    match event {
                        DeviceEvent::Removed => {
                            registry.remove_device(index);
                            break;
                        }
                        DeviceEvent::MessageEmitted(msg) => {
                            registry.publish(msg.with_device_index(index));
                        }
                    }
                }
            }
            .instrument(span),
        );
        self.track(task);

        Ok(registered)
    }

    /// Drop a device and announce its removal. Returns `None` if the index
    /// was not registered.
    pub fn remove_device(&self, index: u32) -> Option<RegisteredDevice> {
        let removed = {
            let mut devices = self.write_devices().ok()?;
            let removed = devices.remove(&index)?;
            self.publish(DeviceRemoved::new(index).into());
            removed
        };
        info!(index, device = removed.name(), "Device removed");
        self.log_to_client(
            LogLevel::Info,
            format!("Device {} removed from index {}", removed.name(), index),
        );
        Some(removed)
    }

    /// Look up a device by index
    pub fn device(&self, index: u32) -> Option<RegisteredDevice> {
        self.devices
            .read()
            .ok()
            .and_then(|devices| devices.get(&index).cloned())
    }

    /// Every registered device, ordered by index
    pub fn devices(&self) -> Vec<RegisteredDevice> {
        let mut devices: Vec<_> = self
            .devices
            .read()
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default();
        devices.sort_by_key(|d| d.index);
        devices
    }

    /// Number of registered devices
    pub fn device_count(&self) -> usize {
        self.devices.read().map(|d| d.len()).unwrap_or(0)
    }

    fn managers(&self) -> Vec<Arc<dyn SubtypeManager>> {
        self.managers
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn scanning_finished(&self) {
        if self.managers().iter().all(|m| !m.is_scanning()) {
            info!("All subtype managers finished scanning");
            self.publish(ScanningFinished::new().into());
        }
    }

    /// Start scanning on every subtype manager
    pub async fn start_scanning(&self) -> Result<()> {
        let managers = self.managers();
        if managers.is_empty() {
            warn!("No subtype managers to scan with");
        }
        for manager in managers {
            manager.start_scanning().await?;
        }
        Ok(())
    }

    /// Stop scanning on every subtype manager
    pub async fn stop_scanning(&self) -> Result<()> {
        let mut first_error = None;
        for manager in self.managers() {
            if let Err(e) = manager.stop_scanning().await {
                warn!(manager = manager.name(), "Failed to stop scanning: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Route a command to the device at its index
    pub async fn dispatch(&self, msg: DeviceMessage) -> Result<Message> {
        let index = msg.device_index();
        let device = self.device(index).ok_or(DeviceError::UnknownDevice(index))?;
        device.dispatch(msg).await
    }

    /// Answer a client message. Failures become `Error` replies.
    pub async fn handle_message(&self, msg: Message) -> Message {
        let id = msg.id();
        let message_type = msg.message_type();
        debug!(%message_type, id, "Handling client message");

        let result: Result<Message> = match msg {
            Message::RequestServerInfo(request) => {
                self.client_version
                    .store(request.message_version(), Ordering::Release);
                info!(
                    client = request.client_name(),
                    version = request.message_version(),
                    "Client handshake"
                );
                let general = &self.config.get().general;
                Ok(ServerInfo::new(
                    general.server_name.clone(),
                    request.message_version(),
                    general.max_ping_time_ms,
                    id,
                )
                .into())
            }
            Message::Ping(_) => Ok(message::Ok::new(id).into()),
            Message::Test(test) => Ok(test.echo().into()),
            Message::RequestDeviceList(_) => {
                let version = self.client_version.load(Ordering::Acquire);
                let infos = self.devices().iter().map(|d| d.info(version)).collect();
                Ok(DeviceList::new(infos, id).into())
            }
            Message::StartScanning(_) => self
                .start_scanning()
                .await
                .map(|_| message::Ok::new(id).into()),
            Message::StopScanning(_) => self
                .stop_scanning()
                .await
                .map(|_| message::Ok::new(id).into()),
            Message::RequestLog(request) => {
                if let Ok(mut level) = self.log_level.lock() {
                    *level = request.log_level();
                }
                Ok(message::Ok::new(id).into())
            }
            Message::Device(cmd) => self.dispatch(cmd).await,
            other => {
                return message::Error::new(
                    format!("{} is not a client request", other.message_type()),
                    ErrorClass::Message,
                    id,
                )
                .into();
            }
        };

        result.unwrap_or_else(|e| {
            warn!(%message_type, id, "Request failed: {}", e);
            message::Error::new(e.to_string(), ErrorClass::Device, id).into()
        })
    }

    /// Send `StopDeviceCmd` to every device that accepts it
    pub async fn stop_all_devices(&self) -> Result<()> {
        let mut first_error = None;
        for device in self.devices() {
            if !device
                .device()
                .allowed_message_types()
                .contains(&MessageType::StopDeviceCmd)
            {
                continue;
            }
            let stop = StopDeviceCmd::new(device.index(), DEFAULT_MESSAGE_ID)?;
            if let Err(e) = device.dispatch(stop.into()).await {
                warn!(index = device.index(), "Failed to stop device: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop scanning, disconnect every device and release the listeners
    pub async fn shutdown(&self) {
        info!("Shutting down device registry");
        if let Err(e) = self.stop_scanning().await {
            warn!("Failed to stop scanning during shutdown: {}", e);
        }
        for device in self.devices() {
            if let Err(e) = device.device().disconnect().await {
                warn!(index = device.index(), "Failed to disconnect device: {}", e);
            }
            self.remove_device(device.index());
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    /// Subscribe to messages bound for the client
    pub fn subscribe(&self) -> Result<Subscription<Message>> {
        Ok(self.outgoing.subscribe()?)
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.device_count())
            .field("managers", &self.managers().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use hapticflow_core::config::Config;
    use hapticflow_core::message::{
        KiirooCmd, MessageAttributes, Ping, RequestDeviceList, RequestLog, RequestServerInfo,
        SingleMotorVibrateCmd, StartScanning, Test, VibrateCmd, VibrateSubcommand,
    };

    use crate::device::{DeviceHandle, DispatchTable};
    use crate::discovery::BluetoothSubtypeManager;
    use crate::protocols::lovense;
    use crate::transport::simulated::{SimulatedAdapter, SimulatedPeripheral};

    #[derive(Debug)]
    struct SingleMotor {
        handle: DeviceHandle,
    }

    #[async_trait]
    impl Device for SingleMotor {
        fn handle(&self) -> &DeviceHandle {
            &self.handle
        }

        async fn disconnect(&self) -> Result<()> {
            self.handle.mark_disconnected();
            Ok(())
        }
    }

    fn single_motor() -> Arc<SingleMotor> {
        let table = DispatchTable::builder("Single")
            .on(MessageAttributes::default(), |cmd: SingleMotorVibrateCmd| async move {
                Ok(Message::from(message::Ok::new(cmd.id())))
            })
            .on(MessageAttributes::default(), |cmd: StopDeviceCmd| async move {
                Ok(Message::from(message::Ok::new(cmd.id())))
            })
            .build();
        Arc::new(SingleMotor {
            handle: DeviceHandle::new("Single", "test", table),
        })
    }

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry::new(SharedConfig::new(Config::default())))
    }

    async fn next_message(outgoing: &mut Subscription<Message>) -> Message {
        tokio::time::timeout(Duration::from_secs(1), outgoing.recv())
            .await
            .expect("timed out waiting for message")
            .expect("registry closed")
    }

    #[tokio::test]
    async fn test_indices_increase() {
        let registry = registry();
        let a = registry.register_device(single_motor()).unwrap();
        let b = registry.register_device(single_motor()).unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(registry.device_count(), 2);
    }

    #[tokio::test]
    async fn test_disconnected_device_is_not_registered() {
        let registry = registry();
        let device = single_motor();
        device.disconnect().await.unwrap();
        assert!(matches!(
            registry.register_device(device),
            Err(DeviceError::Disconnected(_))
        ));
        assert_eq!(registry.device_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_index() {
        let registry = registry();
        let err = registry
            .dispatch(StopDeviceCmd::new(9, 1).unwrap().into())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::UnknownDevice(9)));
    }

    #[tokio::test]
    async fn test_generic_command_is_translated() {
        let registry = registry();
        let index = registry.register_device(single_motor()).unwrap().index();

        let same = vec![
            VibrateSubcommand::new(0, 0.5).unwrap(),
            VibrateSubcommand::new(1, 0.5).unwrap(),
        ];
        let reply = registry
            .dispatch(VibrateCmd::new(index, same, 4).unwrap().into())
            .await
            .unwrap();
        assert_eq!(reply.id(), 4);

        let different = vec![
            VibrateSubcommand::new(0, 0.5).unwrap(),
            VibrateSubcommand::new(1, 0.2).unwrap(),
        ];
        let err = registry
            .dispatch(VibrateCmd::new(index, different, 5).unwrap().into())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Downgrade(_)));
    }

    #[tokio::test]
    async fn test_removal_is_announced() {
        let registry = registry();
        let mut outgoing = registry.subscribe().unwrap();
        let device = single_motor();
        let index = registry.register_device(device.clone()).unwrap().index();
        assert!(matches!(next_message(&mut outgoing).await, Message::DeviceAdded(_)));

        device.disconnect().await.unwrap();
        device.disconnect().await.unwrap();
        match next_message(&mut outgoing).await {
            Message::DeviceRemoved(removed) => assert_eq!(removed.device_index(), index),
            other => panic!("unexpected message: {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(outgoing.try_recv().is_none());
        assert!(registry.device(index).is_none());
    }

    #[tokio::test]
    async fn test_handle_message_replies() {
        let registry = registry();

        let reply = registry
            .handle_message(RequestServerInfo::new("client", 1, 1).unwrap().into())
            .await;
        match reply {
            Message::ServerInfo(info) => {
                assert_eq!(info.server_name(), "hapticflow");
                assert_eq!(info.message_version(), 1);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        assert!(registry.handle_message(Ping::new(2).unwrap().into()).await.is_ok());

        let reply = registry
            .handle_message(Test::new("hello", 3).unwrap().into())
            .await;
        assert!(matches!(reply, Message::Test(t) if t.test_string() == "hello"));

        registry.register_device(single_motor()).unwrap();
        match registry
            .handle_message(RequestDeviceList::new(4).unwrap().into())
            .await
        {
            Message::DeviceList(list) => assert_eq!(list.devices().len(), 1),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failures_become_error_replies() {
        let registry = registry();
        registry.register_device(single_motor()).unwrap();

        match registry
            .handle_message(KiirooCmd::new(0, 2, 5).unwrap().into())
            .await
        {
            Message::Error(err) => {
                assert_eq!(err.error_code(), ErrorClass::Device);
                assert_eq!(err.error_message(), "Single cannot handle message of type KiirooCmd");
                assert_eq!(err.id(), 5);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        match registry
            .handle_message(ScanningFinished::new().into())
            .await
        {
            Message::Error(err) => assert_eq!(err.error_code(), ErrorClass::Message),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_old_client_sees_old_messages_only() {
        let registry = registry();
        registry
            .handle_message(RequestServerInfo::new("old", 0, 1).unwrap().into())
            .await;

        let (_, device) = simulated_lovense("00:01").await;
        let info = registry.register_device(device).unwrap().info(0);
        assert!(info.device_messages.contains_key(&MessageType::SingleMotorVibrateCmd));
        assert!(!info.device_messages.contains_key(&MessageType::VibrateCmd));
    }

    #[tokio::test]
    async fn test_log_forwarding_follows_requested_level() {
        let registry = registry();
        let mut outgoing = registry.subscribe().unwrap();

        registry.register_device(single_motor()).unwrap();
        assert!(matches!(next_message(&mut outgoing).await, Message::DeviceAdded(_)));
        assert!(outgoing.try_recv().is_none());

        registry
            .handle_message(RequestLog::new("Info", 1).unwrap().into())
            .await;
        registry.register_device(single_motor()).unwrap();
        assert!(matches!(next_message(&mut outgoing).await, Message::DeviceAdded(_)));
        match next_message(&mut outgoing).await {
            Message::Log(log) => assert_eq!(log.log_level(), LogLevel::Info),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    async fn simulated_lovense(address: &str) -> (Arc<SimulatedPeripheral>, Arc<dyn Device>) {
        let peripheral = Arc::new(
            SimulatedPeripheral::new(Some("LVS-S001"), address, &[lovense::SERVICE])
                .with_characteristics(&[lovense::TX, lovense::RX]),
        );
        let characteristics = crate::transport::Peripheral::characteristics(
            peripheral.as_ref(),
            &[lovense::TX, lovense::RX],
        )
        .await
        .unwrap();
        let device = lovense::Lovense::connect(peripheral.clone(), characteristics)
            .await
            .unwrap();
        (peripheral, Arc::new(device))
    }

    #[tokio::test]
    async fn test_stop_all_devices() {
        let registry = registry();
        let (first, device) = simulated_lovense("00:0a").await;
        registry.register_device(device).unwrap();
        let (second, device) = simulated_lovense("00:0b").await;
        registry.register_device(device).unwrap();

        registry.stop_all_devices().await.unwrap();
        for peripheral in [first, second] {
            assert_eq!(
                peripheral.characteristic(lovense::TX).unwrap().writes(),
                vec![bytes::Bytes::from_static(b"Vibrate:0;")]
            );
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_scan_to_removal_flow() {
        let adapter = Arc::new(SimulatedAdapter::new());
        let peripheral = Arc::new(
            SimulatedPeripheral::new(Some("LVS-Z001"), "aa:bb", &[lovense::SERVICE])
                .with_characteristics(&[lovense::TX, lovense::RX]),
        );
        adapter.add_peripheral(peripheral.clone());

        let config = SharedConfig::new(Config::default());
        let registry = Arc::new(DeviceRegistry::new(config.clone()));
        let manager = BluetoothSubtypeManager::new(adapter, config.get().devices.clone());
        registry.add_subtype_manager(Arc::new(manager)).unwrap();
        let mut outgoing = registry.subscribe().unwrap();

        let reply = registry
            .handle_message(StartScanning::new(1).unwrap().into())
            .await;
        assert!(reply.is_ok());

        let index = match next_message(&mut outgoing).await {
            Message::DeviceAdded(added) => added.device_index(),
            other => panic!("unexpected message: {:?}", other),
        };

        let reply = registry
            .handle_message(SingleMotorVibrateCmd::new(index, 0.5, 2).unwrap().into())
            .await;
        assert!(reply.is_ok());
        assert_eq!(
            peripheral.characteristic(lovense::TX).unwrap().last_write(),
            Some(bytes::Bytes::from_static(b"Vibrate:10;"))
        );

        peripheral
            .characteristic(lovense::RX)
            .unwrap()
            .notify(bytes::Bytes::from_static(b"OK;"));
        match next_message(&mut outgoing).await {
            Message::RawReading(reading) => assert_eq!(reading.device_index(), index),
            other => panic!("unexpected message: {:?}", other),
        }

        peripheral.drop_link();
        match next_message(&mut outgoing).await {
            Message::DeviceRemoved(removed) => assert_eq!(removed.device_index(), index),
            other => panic!("unexpected message: {:?}", other),
        }
        let err = registry
            .dispatch(SingleMotorVibrateCmd::new(index, 0.5, 3).unwrap().into())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::UnknownDevice(_)));

        registry.shutdown().await;
    }
}
