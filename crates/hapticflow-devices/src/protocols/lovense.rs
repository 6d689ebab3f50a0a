/*!
 * Lovense vibrators.
 *
 * Lovense devices take ASCII commands terminated by `;` on a UART-style TX
 * characteristic and answer on RX. Vibration levels run 0 to 20.
 */
use std::sync::Arc;

use async_trait::async_trait;
use uuid::{uuid, Uuid};

use hapticflow_core::message::{
    self, LovenseCmd, MessageAttributes, ProtocolMessage, SingleMotorVibrateCmd, StopDeviceCmd,
    VibrateCmd,
};

use super::{device_name, single_feature, write_and_ack, BluetoothLink};
use crate::device::{Device, DeviceHandle, DispatchTable, Result};
use crate::discovery::BluetoothDescriptor;
use crate::transport::{self, take_characteristic, Characteristic, Peripheral};

/// Protocol identifier
pub const IDENTIFIER: &str = "lovense";
/// UART service
pub const SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");
/// Command characteristic
pub const TX: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");
/// Response characteristic
pub const RX: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

const NAMES: &[&str] = &["LVS-S001", "LVS-Z001"];
const MAX_LEVEL: f64 = 20.0;

/// Wire vibration level for a normalized speed. Fractional levels truncate.
pub fn vibrate_level(speed: f64) -> u8 {
    (speed * MAX_LEVEL) as u8
}

/// ASCII command setting the vibration speed
pub fn vibrate_command(speed: f64) -> Vec<u8> {
    format!("Vibrate:{};", vibrate_level(speed)).into_bytes()
}

/// Descriptor for Lovense devices
#[derive(Debug, Default, Clone, Copy)]
pub struct LovenseDescriptor;

#[async_trait]
impl BluetoothDescriptor for LovenseDescriptor {
    fn name(&self) -> &'static str {
        IDENTIFIER
    }

    fn names(&self) -> &[&'static str] {
        NAMES
    }

    fn services(&self) -> &[Uuid] {
        &[SERVICE]
    }

    fn characteristics(&self) -> &[Uuid] {
        &[TX, RX]
    }

    async fn create_device(
        &self,
        peripheral: Arc<dyn Peripheral>,
        characteristics: Vec<Arc<dyn Characteristic>>,
    ) -> transport::Result<Arc<dyn Device>> {
        Ok(Arc::new(Lovense::connect(peripheral, characteristics).await?))
    }
}

/// A connected Lovense device
#[derive(Debug)]
pub struct Lovense {
    link: BluetoothLink,
}

impl Lovense {
    /// Build the adapter from the resolved `[TX, RX]` characteristics
    pub async fn connect(
        peripheral: Arc<dyn Peripheral>,
        characteristics: Vec<Arc<dyn Characteristic>>,
    ) -> transport::Result<Self> {
        let tx = take_characteristic(&characteristics, 0, TX)?;
        let rx = take_characteristic(&characteristics, 1, RX)?;
        let name = device_name("Lovense", peripheral.as_ref());

        let table = DispatchTable::builder(&name)
            .on(MessageAttributes::default(), {
                let tx = tx.clone();
                move |cmd: SingleMotorVibrateCmd| {
                    write_and_ack(tx.clone(), vibrate_command(cmd.speed()), false, cmd.id())
                }
            })
            .on(MessageAttributes::with_feature_count(1), {
                let tx = tx.clone();
                let name = name.clone();
                move |cmd: VibrateCmd| {
                    let tx = tx.clone();
                    let speed =
                        single_feature(&name, cmd.speeds().iter().map(|s| (s.index(), s.speed())));
                    async move {
                        match speed? {
                            Some(speed) => {
                                write_and_ack(tx, vibrate_command(speed), false, cmd.id()).await
                            }
                            None => Ok(message::Ok::new(cmd.id()).into()),
                        }
                    }
                }
            })
            .on(MessageAttributes::default(), {
                let tx = tx.clone();
                move |cmd: LovenseCmd| {
                    write_and_ack(tx.clone(), cmd.command().as_bytes().to_vec(), false, cmd.id())
                }
            })
            .on(MessageAttributes::default(), move |cmd: StopDeviceCmd| {
                write_and_ack(tx.clone(), vibrate_command(0.0), false, cmd.id())
            })
            .build();

        let handle = Arc::new(DeviceHandle::new(name, IDENTIFIER, table));
        let link = BluetoothLink::new(peripheral, handle);
        link.forward_notifications(&rx, "rx").await?;
        Ok(Self { link })
    }
}

#[async_trait]
impl Device for Lovense {
    fn handle(&self) -> &DeviceHandle {
        self.link.handle()
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.disconnect().await
    }
}
