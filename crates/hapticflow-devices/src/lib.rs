/*!
 * HapticFlow Devices
 *
 * This crate provides device handles with their dispatch tables, the
 * Bluetooth LE subtype manager that discovers devices, the protocol adapters
 * for supported device families, and the registry that ties them together.
 */

#![warn(missing_docs)]

// Re-export core types
pub use hapticflow_core::prelude;

pub mod device;
pub mod discovery;
pub mod protocols;
pub mod registry;
pub mod transport;

// Re-export the device abstractions
pub use device::{
    ConnectionState, Device, DeviceError, DeviceEvent, DeviceHandle, DispatchTable,
    DispatchTableBuilder, Result,
};
pub use discovery::{
    BluetoothDescriptor, BluetoothSubtypeManager, SubtypeManager, SubtypeManagerEvent,
};
pub use registry::{DeviceRegistry, RegisteredDevice};
pub use transport::{BluetoothAdapter, Characteristic, Peripheral, TransportError};

/// HapticFlow devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> std::result::Result<(), hapticflow_core::error::Error> {
    tracing::info!("HapticFlow Devices {} initialized", VERSION);
    Ok(())
}

/// Identifiers of the device families this crate can drive
pub fn available_protocols() -> Vec<&'static str> {
    protocols::builtin_descriptors()
        .iter()
        .map(|descriptor| descriptor.name())
        .collect()
}
