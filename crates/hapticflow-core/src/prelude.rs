/*!
 * Prelude module for HapticFlow Core.
 *
 * This module re-exports commonly used types from the HapticFlow Core crate
 * to make them easier to import. The `Ok` and `Error` message types are left
 * out so they do not shadow the standard `Result` variants; reach them through
 * [`crate::message`].
 */

// Re-export error types
pub use crate::error::{Error, Result, ValidationError};

// Re-export the message contract
pub use crate::message::{
    DeviceCommand, DeviceMessage, Message, MessageAttributes, MessageType, ProtocolMessage,
    CURRENT_SCHEMA_VERSION, DEFAULT_MESSAGE_ID, SYSTEM_MESSAGE_ID,
};

// Re-export event types
pub use crate::event::{EventHub, Subscription, SubscriptionId};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, SharedConfig};

// Re-export utility functions
pub use crate::utils::{spawn_and_log, with_timeout};

// Re-export logging macros
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
