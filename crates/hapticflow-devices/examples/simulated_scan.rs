//! Scan a simulated Bluetooth adapter, drive the Lovense it finds and print
//! every message the registry sends back to the client.
//!
//! Run with `RUST_LOG=debug` for the full discovery trace.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hapticflow_core::config::{ConfigBuilder, SharedConfig};
use hapticflow_core::message::{Message, RequestDeviceList, SingleMotorVibrateCmd};
use hapticflow_devices::protocols::lovense;
use hapticflow_devices::transport::simulated::{SimulatedAdapter, SimulatedPeripheral};
use hapticflow_devices::{BluetoothSubtypeManager, DeviceRegistry};

fn print(msg: &Message) -> Result<()> {
    println!("<- {}", serde_json::to_string(msg)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigBuilder::new()
        .with_environment_prefix("HAPTICFLOW")
        .build()?;
    hapticflow_core::logging::init_with_config(&config.logging)?;
    hapticflow_devices::init()?;

    let adapter = Arc::new(SimulatedAdapter::new());
    let peripheral = Arc::new(
        SimulatedPeripheral::new(Some("LVS-Z001"), "c4:4f:33:00:00:01", &[lovense::SERVICE])
            .with_characteristics(&[lovense::TX, lovense::RX]),
    );
    adapter.add_peripheral(peripheral.clone());

    let manager = Arc::new(BluetoothSubtypeManager::new(
        adapter,
        config.devices.clone(),
    ));
    let registry = Arc::new(DeviceRegistry::new(SharedConfig::new(config)));
    registry.add_subtype_manager(manager)?;

    let mut outgoing = registry.subscribe()?;
    registry.start_scanning().await?;

    let index = loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), outgoing.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("registry closed before a device was found"))?;
        print(&msg)?;
        if let Message::DeviceAdded(added) = &msg {
            break added.device_index();
        }
    };
    registry.stop_scanning().await?;

    let reply = registry
        .handle_message(RequestDeviceList::new(1)?.into())
        .await;
    print(&reply)?;

    let reply = registry
        .handle_message(SingleMotorVibrateCmd::new(index, 0.5, 2)?.into())
        .await;
    print(&reply)?;
    if let Some(tx) = peripheral.characteristic(lovense::TX) {
        if let Some(written) = tx.last_write() {
            println!("   wrote {:?}", String::from_utf8_lossy(&written));
        }
    }

    if let Some(rx) = peripheral.characteristic(lovense::RX) {
        rx.notify(&b"Battery:87;"[..]);
    }
    peripheral.drop_link();

    while let Ok(Some(msg)) =
        tokio::time::timeout(Duration::from_millis(200), outgoing.recv()).await
    {
        print(&msg)?;
    }

    registry.shutdown().await;
    Ok(())
}
