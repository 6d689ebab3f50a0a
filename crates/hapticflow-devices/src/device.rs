/*!
 * Device handle and core device abstractions.
 *
 * A [`DeviceHandle`] is the per-device state every protocol adapter embeds:
 * its name, an immutable dispatch table from message type to handler, the
 * connection flag, and the device event hub. Adapters implement [`Device`]
 * on top of it.
 */
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use hapticflow_core::{
    error::{Error as CoreError, ValidationError},
    event::{EventHub, Subscription, SubscriptionId},
    message::{
        self, DeviceCommand, DeviceMessage, Message, MessageAttributes, MessageType,
        ProtocolMessage, SYSTEM_MESSAGE_ID,
    },
};

use crate::transport::TransportError;

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device lost its link; every later dispatch fails with this
    #[error("{0} has disconnected and can no longer process messages")]
    Disconnected(String),

    /// The device has no handler for the message type
    #[error("{name} cannot handle message of type {message_type}")]
    UnhandledMessage {
        /// Device name
        name: String,
        /// Rejected message type
        message_type: MessageType,
    },

    /// A generic command addressed a feature the device does not have
    #[error("{name} has {feature_count} feature(s), index {index} is out of range")]
    FeatureOutOfRange {
        /// Device name
        name: String,
        /// Addressed feature
        index: u32,
        /// Features the device has
        feature_count: u32,
    },

    /// No device is registered at the index
    #[error("No device is registered at index {0}")]
    UnknownDevice(u32),

    /// The command could not be translated for the device
    #[error("Downgrade error: {0}")]
    Downgrade(ValidationError),

    /// A message built inside the device layer was rejected
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] ValidationError),

    /// A transport step failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Connection state of a device handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The device accepts commands
    Connected,
    /// The device is gone; terminal
    Disconnected,
}

/// Notifications a device handle publishes
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The device disconnected. Published exactly once per handle.
    Removed,
    /// The device produced an unsolicited message (for example a reading)
    MessageEmitted(Message),
}

/// Boxed async handler invoked for one message type
pub type MessageHandler =
    Arc<dyn Fn(DeviceMessage) -> BoxFuture<'static, Result<Message>> + Send + Sync>;

/// A dispatch table slot
#[derive(Clone)]
pub struct DispatchEntry {
    handler: MessageHandler,
    attributes: MessageAttributes,
}

impl DispatchEntry {
    /// Create a slot from a handler and its capability metadata
    pub fn new(handler: MessageHandler, attributes: MessageAttributes) -> Self {
        Self {
            handler,
            attributes,
        }
    }

    /// Capability metadata of the slot
    pub fn attributes(&self) -> &MessageAttributes {
        &self.attributes
    }
}

impl Debug for DispatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEntry")
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Immutable map from message type to handler. Built once per device.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<MessageType, DispatchEntry>,
}

impl DispatchTable {
    /// Start building a table for the named device
    pub fn builder<S: Into<String>>(device_name: S) -> DispatchTableBuilder {
        DispatchTableBuilder {
            device_name: device_name.into(),
            entries: HashMap::new(),
        }
    }

    /// Look up a slot
    pub fn get(&self, message_type: MessageType) -> Option<&DispatchEntry> {
        self.entries.get(&message_type)
    }

    /// Registered message types, ordered
    pub fn message_types(&self) -> BTreeSet<MessageType> {
        self.entries.keys().copied().collect()
    }

    /// Number of registered message types
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`DispatchTable`]
#[derive(Debug)]
pub struct DispatchTableBuilder {
    device_name: String,
    entries: HashMap<MessageType, DispatchEntry>,
}

impl DispatchTableBuilder {
    /// Register a typed handler. The handler receives the concrete command.
    pub fn on<M, F, Fut>(mut self, attributes: MessageAttributes, handler: F) -> Self
    where
        M: DeviceCommand,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message>> + Send + 'static,
    {
        let device_name = self.device_name.clone();
        let handler: MessageHandler = Arc::new(move |msg: DeviceMessage| match M::try_from(msg) {
            Ok(cmd) => handler(cmd).boxed(),
            Err(other) => future::ready(Err(DeviceError::UnhandledMessage {
                name: device_name.clone(),
                message_type: other.message_type(),
            }))
            .boxed(),
        });
        self.entries
            .insert(M::MESSAGE_TYPE, DispatchEntry::new(handler, attributes));
        self
    }

    /// Register a boxed handler for a message type
    pub fn handler(
        mut self,
        message_type: MessageType,
        attributes: MessageAttributes,
        handler: MessageHandler,
    ) -> Self {
        self.entries
            .insert(message_type, DispatchEntry::new(handler, attributes));
        self
    }

    /// Freeze the table
    pub fn build(self) -> DispatchTable {
        DispatchTable {
            entries: self.entries,
        }
    }
}

/// Per-device state shared by every protocol adapter
pub struct DeviceHandle {
    name: String,
    identifier: String,
    table: DispatchTable,
    connected: AtomicBool,
    dispatch_lock: Mutex<()>,
    events: EventHub<DeviceEvent>,
}

impl DeviceHandle {
    /// Create a connected handle
    pub fn new<N, I>(name: N, identifier: I, table: DispatchTable) -> Self
    where
        N: Into<String>,
        I: Into<String>,
    {
        Self {
            name: name.into(),
            identifier: identifier.into(),
            table,
            connected: AtomicBool::new(true),
            dispatch_lock: Mutex::new(()),
            events: EventHub::new("device"),
        }
    }

    /// Human-readable device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol identifier of the adapter that owns the handle
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether the device still accepts commands
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Message types this device accepts
    pub fn allowed_message_types(&self) -> BTreeSet<MessageType> {
        self.table.message_types()
    }

    /// Attributes registered for a message type, or the defaults
    pub fn message_attributes(&self, message_type: MessageType) -> MessageAttributes {
        self.table
            .get(message_type)
            .map(|entry| entry.attributes.clone())
            .unwrap_or_default()
    }

    /// Every accepted message type with its attributes
    pub fn device_messages(&self) -> BTreeMap<MessageType, MessageAttributes> {
        self.table
            .entries
            .iter()
            .map(|(t, entry)| (*t, entry.attributes.clone()))
            .collect()
    }

    /// Route a command to its handler.
    ///
    /// Fails with [`DeviceError::Disconnected`] once the device is gone and
    /// with [`DeviceError::UnhandledMessage`] for types outside the table.
    /// Dispatches on one handle run one at a time, in arrival order.
    pub async fn dispatch(&self, msg: DeviceMessage) -> Result<Message> {
        if !self.is_connected() {
            return Err(DeviceError::Disconnected(self.name.clone()));
        }
        let message_type = msg.message_type();
        let entry = self
            .table
            .get(message_type)
            .ok_or_else(|| DeviceError::UnhandledMessage {
                name: self.name.clone(),
                message_type,
            })?;

        let _guard = self.dispatch_lock.lock().await;
        // The link may have dropped while this dispatch was queued
        if !self.is_connected() {
            return Err(DeviceError::Disconnected(self.name.clone()));
        }
        trace!(device = %self.name, %message_type, "Dispatching");
        (entry.handler)(msg).await
    }

    /// Record the transition to Disconnected.
    ///
    /// Returns `true` for the single caller that performed the transition;
    /// only that caller publishes [`DeviceEvent::Removed`].
    pub fn mark_disconnected(&self) -> bool {
        let won = self
            .connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            info!(device = %self.name, "Device disconnected");
            let _ = self.events.publish(DeviceEvent::Removed);
        }
        won
    }

    /// Publish an unsolicited message from the device
    pub fn emit_message(&self, msg: Message) {
        debug!(device = %self.name, message_type = %msg.message_type(), "Device emitted message");
        let _ = self.events.publish(DeviceEvent::MessageEmitted(msg));
    }

    /// Subscribe to device events
    pub fn subscribe(&self) -> Result<Subscription<DeviceEvent>> {
        Ok(self.events.subscribe()?)
    }

    /// Register a synchronous event callback
    pub fn subscribe_fn<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        Ok(self.events.subscribe_fn(callback)?)
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        Ok(self.events.unsubscribe(id)?)
    }
}

impl Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name)
            .field("identifier", &self.identifier)
            .field("messages", &self.table.message_types())
            .field("state", &self.connection_state())
            .finish()
    }
}

/// A connected device, as seen by discovery and the registry
#[async_trait]
pub trait Device: Send + Sync + Debug {
    /// The handle the device is built on
    fn handle(&self) -> &DeviceHandle;

    /// Human-readable device name
    fn name(&self) -> &str {
        self.handle().name()
    }

    /// Protocol identifier
    fn identifier(&self) -> &str {
        self.handle().identifier()
    }

    /// Message types this device accepts
    fn allowed_message_types(&self) -> BTreeSet<MessageType> {
        self.handle().allowed_message_types()
    }

    /// Attributes for a message type
    fn message_attributes(&self, message_type: MessageType) -> MessageAttributes {
        self.handle().message_attributes(message_type)
    }

    /// Whether the device still accepts commands
    fn is_connected(&self) -> bool {
        self.handle().is_connected()
    }

    /// Route a command to the device
    async fn dispatch(&self, msg: DeviceMessage) -> Result<Message> {
        self.handle().dispatch(msg).await
    }

    /// One-time setup after construction
    async fn initialize(&self) -> Result<Message> {
        Ok(message::Ok::new(SYSTEM_MESSAGE_ID).into())
    }

    /// Tear the device down. Calling it again is harmless.
    async fn disconnect(&self) -> Result<()>;

    /// Subscribe to device events
    fn subscribe(&self) -> Result<Subscription<DeviceEvent>> {
        self.handle().subscribe()
    }
}
