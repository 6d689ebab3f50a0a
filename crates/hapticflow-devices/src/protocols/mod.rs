/*!
 * Device protocol adapters for HapticFlow.
 *
 * Each adapter turns typed commands into the byte encoding of one device
 * family and binds them into a dispatch table. [`BluetoothLink`] is the glue
 * every Bluetooth adapter shares: it ties the device handle to the link state
 * of its peripheral and forwards notifications as readings.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use hapticflow_core::message::{self, Message, RawReading};

use crate::device::{DeviceError, DeviceHandle, Result};
use crate::discovery::BluetoothDescriptor;
use crate::transport::{self, Characteristic, Peripheral};

pub mod fleshlight;
pub mod kiiroo;
pub mod lovense;
pub mod vorze;

pub use fleshlight::{FleshlightLaunch, FleshlightLaunchDescriptor};
pub use kiiroo::{Kiiroo, KiirooDescriptor};
pub use lovense::{Lovense, LovenseDescriptor};
pub use vorze::{VorzeA10Cyclone, VorzeA10CycloneDescriptor};

/// Descriptors for every device family this crate knows
pub fn builtin_descriptors() -> Vec<Arc<dyn BluetoothDescriptor>> {
    vec![
        Arc::new(LovenseDescriptor),
        Arc::new(FleshlightLaunchDescriptor),
        Arc::new(VorzeA10CycloneDescriptor),
        Arc::new(KiirooDescriptor),
    ]
}

/// Connection glue between a device handle and its peripheral
#[derive(Debug)]
pub struct BluetoothLink {
    peripheral: Arc<dyn Peripheral>,
    handle: Arc<DeviceHandle>,
    disconnect_requested: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BluetoothLink {
    /// Bind `handle` to `peripheral`. Losing the link marks the handle
    /// disconnected.
    pub fn new(peripheral: Arc<dyn Peripheral>, handle: Arc<DeviceHandle>) -> Self {
        let mut link_state = peripheral.link_state();
        let watched = handle.clone();
        let watcher = tokio::spawn(async move {
            loop {
                if !*link_state.borrow_and_update() {
                    break;
                }
                if link_state.changed().await.is_err() {
                    break;
                }
            }
            if watched.mark_disconnected() {
                info!(device = watched.name(), "Transport link lost");
            }
        });

        Self {
            peripheral,
            handle,
            disconnect_requested: AtomicBool::new(false),
            tasks: Mutex::new(vec![watcher]),
        }
    }

    /// The device handle bound to this link
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// The peripheral behind this link
    pub fn peripheral(&self) -> &Arc<dyn Peripheral> {
        &self.peripheral
    }

    /// Emit every notification of `characteristic` as a [`RawReading`]
    pub async fn forward_notifications(
        &self,
        characteristic: &Arc<dyn Characteristic>,
        endpoint: &'static str,
    ) -> transport::Result<()> {
        let mut notifications = characteristic.subscribe().await?;
        let handle = self.handle.clone();
        let task = tokio::spawn(async move {
            while let Some(data) = notifications.recv().await {
                handle.emit_message(RawReading::new(endpoint, data.to_vec()).into());
            }
            debug!(device = handle.name(), endpoint, "Notification stream ended");
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
        Ok(())
    }

    /// Disconnect the peripheral. Only the first call reaches the
    /// transport; later and concurrent calls return immediately.
    pub async fn disconnect(&self) -> Result<()> {
        if self.disconnect_requested.swap(true, Ordering::AcqRel) || !self.handle.is_connected() {
            return Ok(());
        }
        let result = self.peripheral.disconnect().await;
        self.handle.mark_disconnected();
        result.map_err(DeviceError::from)
    }
}

impl Drop for BluetoothLink {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Display name for a device of `family` behind `peripheral`
pub(crate) fn device_name(family: &str, peripheral: &dyn Peripheral) -> String {
    let advertisement = peripheral.advertisement();
    format!(
        "{} ({})",
        family,
        advertisement.name.unwrap_or(advertisement.address)
    )
}

/// Write `data` and acknowledge request `id`
pub(crate) async fn write_and_ack(
    characteristic: Arc<dyn Characteristic>,
    data: Vec<u8>,
    with_response: bool,
    id: u32,
) -> Result<Message> {
    characteristic
        .write(Bytes::from(data), with_response)
        .await?;
    Ok(message::Ok::new(id).into())
}

/// Pick the value addressed to feature 0 of a single-feature device
pub(crate) fn single_feature<T>(
    name: &str,
    features: impl IntoIterator<Item = (u32, T)>,
) -> Result<Option<T>> {
    let mut selected = None;
    for (index, value) in features {
        if index != 0 {
            return Err(DeviceError::FeatureOutOfRange {
                name: name.to_string(),
                index,
                feature_count: 1,
            });
        }
        selected = Some(value);
    }
    Ok(selected)
}
