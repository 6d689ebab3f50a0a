/*!
 * Vorze A10 Cyclone rotators.
 */
use std::sync::Arc;

use async_trait::async_trait;
use uuid::{uuid, Uuid};

use hapticflow_core::message::{
    self, MessageAttributes, ProtocolMessage, RotateCmd, StopDeviceCmd, VorzeA10CycloneCmd,
};

use super::{device_name, single_feature, write_and_ack, BluetoothLink};
use crate::device::{Device, DeviceHandle, DispatchTable, Result};
use crate::discovery::BluetoothDescriptor;
use crate::transport::{self, take_characteristic, Characteristic, Peripheral};

/// Protocol identifier
pub const IDENTIFIER: &str = "vorze-a10-cyclone";
/// Vorze service
pub const SERVICE: Uuid = uuid!("40ee1111-63ec-4b7f-8ce7-712efd55b90e");
/// Command characteristic
pub const TX: Uuid = uuid!("40ee2222-63ec-4b7f-8ce7-712efd55b90e");

const NAMES: &[&str] = &["CycSA"];
const DIRECTION_BIT: u8 = 0x80;

/// Three-byte rotation command. The high bit of the last byte selects
/// counter-clockwise rotation.
pub fn rotation_command(speed: u8, clockwise: bool) -> Vec<u8> {
    let direction = if clockwise { 0x00 } else { DIRECTION_BIT };
    vec![0x01, 0x01, direction | speed]
}

/// Descriptor for the Vorze A10 Cyclone
#[derive(Debug, Default, Clone, Copy)]
pub struct VorzeA10CycloneDescriptor;

#[async_trait]
impl BluetoothDescriptor for VorzeA10CycloneDescriptor {
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
        &[TX]
    }

    async fn create_device(
        &self,
        peripheral: Arc<dyn Peripheral>,
        characteristics: Vec<Arc<dyn Characteristic>>,
    ) -> transport::Result<Arc<dyn Device>> {
        Ok(Arc::new(VorzeA10Cyclone::connect(peripheral, characteristics)?))
    }
}

/// A connected Vorze A10 Cyclone
#[derive(Debug)]
pub struct VorzeA10Cyclone {
    link: BluetoothLink,
}

impl VorzeA10Cyclone {
    /// Build the adapter from the resolved `[TX]` characteristic
    pub fn connect(
        peripheral: Arc<dyn Peripheral>,
        characteristics: Vec<Arc<dyn Characteristic>>,
    ) -> transport::Result<Self> {
        let tx = take_characteristic(&characteristics, 0, TX)?;
        let name = device_name("Vorze A10 Cyclone", peripheral.as_ref());

        let table = DispatchTable::builder(&name)
            .on(MessageAttributes::default(), {
                let tx = tx.clone();
                move |cmd: VorzeA10CycloneCmd| {
                    let data = rotation_command(cmd.speed(), cmd.clockwise());
                    write_and_ack(tx.clone(), data, false, cmd.id())
                }
            })
            .on(MessageAttributes::with_feature_count(1), {
                let tx = tx.clone();
                let name = name.clone();
                move |cmd: RotateCmd| {
                    let tx = tx.clone();
                    let rotation = single_feature(
                        &name,
                        cmd.rotations()
                            .iter()
                            .map(|r| (r.index(), (r.speed(), r.clockwise()))),
                    );
                    async move {
                        let Some((speed, clockwise)) = rotation? else {
                            return Ok(message::Ok::new(cmd.id()).into());
                        };
                        let speed = (speed * 99.0).round() as u8;
                        write_and_ack(tx, rotation_command(speed, clockwise), false, cmd.id()).await
                    }
                }
            })
            .on(MessageAttributes::default(), move |cmd: StopDeviceCmd| {
                write_and_ack(tx.clone(), rotation_command(0, true), false, cmd.id())
            })
            .build();

        let handle = Arc::new(DeviceHandle::new(name, IDENTIFIER, table));
        Ok(Self {
            link: BluetoothLink::new(peripheral, handle),
        })
    }
}

#[async_trait]
impl Device for VorzeA10Cyclone {
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
    use hapticflow_core::message::RotationSubcommand;

    use crate::transport::simulated::SimulatedPeripheral;

    async fn cyclone() -> (Arc<SimulatedPeripheral>, VorzeA10Cyclone) {
        let peripheral = Arc::new(
            SimulatedPeripheral::new(Some("CycSA"), "55:66", &[SERVICE]).with_characteristic(TX),
        );
        let characteristics = peripheral.characteristics(&[TX]).await.unwrap();
        let device = VorzeA10Cyclone::connect(peripheral.clone(), characteristics).unwrap();
        (peripheral, device)
    }

    fn last_tx(peripheral: &SimulatedPeripheral) -> Option<Bytes> {
        peripheral.characteristic(TX).unwrap().last_write()
    }

    #[test]
    fn test_rotation_command_direction() {
        assert_eq!(rotation_command(50, true), vec![0x01, 0x01, 50]);
        assert_eq!(rotation_command(50, false), vec![0x01, 0x01, 0x80 | 50]);
    }

    #[tokio::test]
    async fn test_raw_rotation() {
        let (peripheral, device) = cyclone().await;
        device
            .dispatch(VorzeA10CycloneCmd::new(0, 99, false, 1).unwrap().into())
            .await
            .unwrap();
        assert_eq!(
            last_tx(&peripheral),
            Some(Bytes::from(vec![0x01, 0x01, 0x80 | 99]))
        );
    }

    #[tokio::test]
    async fn test_rotate_cmd_scales_speed() {
        let (peripheral, device) = cyclone().await;
        let rotations = vec![RotationSubcommand::new(0, 0.5, true).unwrap()];
        device
            .dispatch(RotateCmd::new(0, rotations, 1).unwrap().into())
            .await
            .unwrap();
        assert_eq!(last_tx(&peripheral), Some(Bytes::from(vec![0x01, 0x01, 50])));
    }

    #[tokio::test]
    async fn test_stop_halts_rotation() {
        let (peripheral, device) = cyclone().await;
        device
            .dispatch(StopDeviceCmd::new(0, 1).unwrap().into())
            .await
            .unwrap();
        assert_eq!(last_tx(&peripheral), Some(Bytes::from(vec![0x01, 0x01, 0x00])));
    }
}
