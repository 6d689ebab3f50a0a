/*!
 * Kiiroo Onyx and Pearl (first generation).
 *
 * Both take a position 0..=4 as ASCII `"{position},\n"`. Position 0 rests
 * the device.
 */
use std::sync::Arc;

use async_trait::async_trait;
use uuid::{uuid, Uuid};

use hapticflow_core::message::{KiirooCmd, MessageAttributes, ProtocolMessage, StopDeviceCmd};

use super::{device_name, write_and_ack, BluetoothLink};
use crate::device::{Device, DeviceHandle, DispatchTable, Result};
use crate::discovery::BluetoothDescriptor;
use crate::transport::{self, take_characteristic, Characteristic, Peripheral};

/// Protocol identifier
pub const IDENTIFIER: &str = "kiiroo";
/// Kiiroo service
pub const SERVICE: Uuid = uuid!("49535343-fe7d-4ae5-8fa9-9fafd205e455");
/// Command characteristic
pub const TX: Uuid = uuid!("49535343-8841-43f4-a8d4-ecbe34729bb3");
/// Sensor characteristic
pub const RX: Uuid = uuid!("49535343-1e4d-4bd9-ba61-23c647249616");

const NAMES: &[&str] = &["ONYX", "PEARL"];

/// ASCII position command
pub fn position_command(position: u8) -> Vec<u8> {
    format!("{},\n", position).into_bytes()
}

/// Descriptor for Kiiroo devices
#[derive(Debug, Default, Clone, Copy)]
pub struct KiirooDescriptor;

#[async_trait]
impl BluetoothDescriptor for KiirooDescriptor {
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
        Ok(Arc::new(Kiiroo::connect(peripheral, characteristics).await?))
    }
}

/// A connected Kiiroo device
#[derive(Debug)]
pub struct Kiiroo {
    link: BluetoothLink,
}

impl Kiiroo {
    /// Build the adapter from the resolved `[TX, RX]` characteristics
    pub async fn connect(
        peripheral: Arc<dyn Peripheral>,
        characteristics: Vec<Arc<dyn Characteristic>>,
    ) -> transport::Result<Self> {
        let tx = take_characteristic(&characteristics, 0, TX)?;
        let rx = take_characteristic(&characteristics, 1, RX)?;
        let name = device_name("Kiiroo", peripheral.as_ref());

        let table = DispatchTable::builder(&name)
            .on(MessageAttributes::default(), {
                let tx = tx.clone();
                move |cmd: KiirooCmd| {
                    write_and_ack(tx.clone(), position_command(cmd.position()), false, cmd.id())
                }
            })
            .on(MessageAttributes::default(), move |cmd: StopDeviceCmd| {
                write_and_ack(tx.clone(), position_command(0), false, cmd.id())
            })
            .build();

        let handle = Arc::new(DeviceHandle::new(name, IDENTIFIER, table));
        let link = BluetoothLink::new(peripheral, handle);
        link.forward_notifications(&rx, "rx").await?;
        Ok(Self { link })
    }
}

#[async_trait]
impl Device for Kiiroo {
    fn handle(&self) -> &DeviceHandle {
        self.link.handle()
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use hapticflow_core::message::{MessageType, SingleMotorVibrateCmd};

    use crate::device::DeviceError;
    use crate::transport::simulated::SimulatedPeripheral;

    async fn onyx() -> (Arc<SimulatedPeripheral>, Kiiroo) {
        let peripheral = Arc::new(
            SimulatedPeripheral::new(Some("ONYX"), "77:88", &[SERVICE])
                .with_characteristics(&[TX, RX]),
        );
        let characteristics = peripheral.characteristics(&[TX, RX]).await.unwrap();
        let device = Kiiroo::connect(peripheral.clone(), characteristics)
            .await
            .unwrap();
        (peripheral, device)
    }

    #[tokio::test]
    async fn test_position_command() {
        let (peripheral, device) = onyx().await;
        device
            .dispatch(KiirooCmd::new(0, 3, 1).unwrap().into())
            .await
            .unwrap();
        assert_eq!(
            peripheral.characteristic(TX).unwrap().last_write(),
            Some(Bytes::from_static(b"3,\n"))
        );
    }

    #[tokio::test]
    async fn test_vibration_is_not_supported() {
        let (_, device) = onyx().await;
        let err = device
            .dispatch(SingleMotorVibrateCmd::new(0, 0.5, 1).unwrap().into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::UnhandledMessage {
                message_type: MessageType::SingleMotorVibrateCmd,
                ..
            }
        ));
        assert!(device.is_connected());
    }

    #[tokio::test]
    async fn test_missing_characteristic_fails_construction() {
        let peripheral = Arc::new(
            SimulatedPeripheral::new(Some("ONYX"), "77:88", &[SERVICE]).with_characteristic(TX),
        );
        let characteristics = peripheral.characteristics(&[TX]).await.unwrap();
        let err = Kiiroo::connect(peripheral, characteristics).await.unwrap_err();
        assert_eq!(err, transport::TransportError::CharacteristicNotFound(RX));
    }
}
