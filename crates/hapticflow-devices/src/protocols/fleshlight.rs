/*!
 * Fleshlight Launch, firmware 1.2.
 *
 * The Launch takes two-byte `[position, speed]` commands, both 0..=99. It
 * ignores commands until a single zero byte is written to its command
 * characteristic, which `initialize` does.
 */
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::{uuid, Uuid};

use hapticflow_core::message::{
    self, FleshlightLaunchFw12Cmd, LinearCmd, Message, MessageAttributes, ProtocolMessage,
    StopDeviceCmd, SYSTEM_MESSAGE_ID,
};

use super::{device_name, single_feature, write_and_ack, BluetoothLink};
use crate::device::{Device, DeviceHandle, DispatchTable, Result};
use crate::discovery::BluetoothDescriptor;
use crate::transport::{self, take_characteristic, Characteristic, Peripheral};

/// Protocol identifier
pub const IDENTIFIER: &str = "fleshlight-launch";
/// Launch service
pub const SERVICE: Uuid = uuid!("88f80580-0000-01e6-aace-0002a5d5c51b");
/// Motion characteristic
pub const TX: Uuid = uuid!("88f80581-0000-01e6-aace-0002a5d5c51b");
/// Status characteristic
pub const RX: Uuid = uuid!("88f80582-0000-01e6-aace-0002a5d5c51b");
/// Mode characteristic
pub const CMD: Uuid = uuid!("88f80583-0000-01e6-aace-0002a5d5c51b");

const NAMES: &[&str] = &["Launch"];
const MAX_VALUE: f64 = 99.0;

/// Launch speed (0..=99) that covers `travel` position units in `duration_ms`.
///
/// Follows the device's measured response curve,
/// `speed = 25000 * (duration * 90 / travel) ^ -1.05`. No travel means no
/// motion, so the speed is 0.
pub fn launch_speed(travel: u8, duration_ms: u32) -> u8 {
    if travel == 0 {
        return 0;
    }
    let scaled = f64::from(duration_ms.max(1)) * 90.0 / f64::from(travel);
    (25000.0 * scaled.powf(-1.05)).round().clamp(0.0, MAX_VALUE) as u8
}

/// Descriptor for the Fleshlight Launch
#[derive(Debug, Default, Clone, Copy)]
pub struct FleshlightLaunchDescriptor;

#[async_trait]
impl BluetoothDescriptor for FleshlightLaunchDescriptor {
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
        &[TX, RX, CMD]
    }

    async fn create_device(
        &self,
        peripheral: Arc<dyn Peripheral>,
        characteristics: Vec<Arc<dyn Characteristic>>,
    ) -> transport::Result<Arc<dyn Device>> {
        Ok(Arc::new(FleshlightLaunch::connect(peripheral, characteristics)?))
    }
}

/// A connected Fleshlight Launch
#[derive(Debug)]
pub struct FleshlightLaunch {
    link: BluetoothLink,
    cmd: Arc<dyn Characteristic>,
}

impl FleshlightLaunch {
    /// Build the adapter from the resolved `[TX, RX, CMD]` characteristics
    pub fn connect(
        peripheral: Arc<dyn Peripheral>,
        characteristics: Vec<Arc<dyn Characteristic>>,
    ) -> transport::Result<Self> {
        let tx = take_characteristic(&characteristics, 0, TX)?;
        take_characteristic(&characteristics, 1, RX)?;
        let cmd = take_characteristic(&characteristics, 2, CMD)?;
        let name = device_name("Fleshlight Launch", peripheral.as_ref());
        let position = Arc::new(AtomicU8::new(0));

        let table = DispatchTable::builder(&name)
            .on(MessageAttributes::default(), {
                let tx = tx.clone();
                let position = position.clone();
                move |cmd: FleshlightLaunchFw12Cmd| {
                    let tx = tx.clone();
                    let position = position.clone();
                    async move {
                        let data = vec![cmd.position(), cmd.speed()];
                        let reply = write_and_ack(tx, data, true, cmd.id()).await?;
                        position.store(cmd.position(), Ordering::SeqCst);
                        Ok(reply)
                    }
                }
            })
            .on(MessageAttributes::with_feature_count(1), {
                let tx = tx.clone();
                let name = name.clone();
                move |cmd: LinearCmd| {
                    let tx = tx.clone();
                    let vector = single_feature(
                        &name,
                        cmd.vectors()
                            .iter()
                            .map(|v| (v.index(), (v.duration(), v.position()))),
                    );
                    let position = position.clone();
                    async move {
                        let Some((duration, target)) = vector? else {
                            return Ok(message::Ok::new(cmd.id()).into());
                        };
                        let target = (target * MAX_VALUE).round() as u8;
                        // Dispatch is serialized, so nothing moves the position in between
                        let previous = position.load(Ordering::SeqCst);
                        let speed = launch_speed(target.abs_diff(previous), duration);
                        debug!(previous, target, duration, speed, "Linear stroke");
                        let reply = write_and_ack(tx, vec![target, speed], true, cmd.id()).await?;
                        position.store(target, Ordering::SeqCst);
                        Ok(reply)
                    }
                }
            })
            // The Launch stops on its own at the end of a stroke
            .on(MessageAttributes::default(), |cmd: StopDeviceCmd| async move {
                Ok(Message::from(message::Ok::new(cmd.id())))
            })
            .build();

        let handle = Arc::new(DeviceHandle::new(name, IDENTIFIER, table));
        Ok(Self {
            link: BluetoothLink::new(peripheral, handle),
            cmd,
        })
    }
}

#[async_trait]
impl Device for FleshlightLaunch {
    fn handle(&self) -> &DeviceHandle {
        self.link.handle()
    }

    async fn initialize(&self) -> Result<Message> {
        self.cmd.write(Bytes::from_static(&[0x00]), true).await?;
        Ok(message::Ok::new(SYSTEM_MESSAGE_ID).into())
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hapticflow_core::message::VectorSubcommand;

    use crate::device::DeviceError;
    use crate::transport::simulated::SimulatedPeripheral;

    async fn launch() -> (Arc<SimulatedPeripheral>, FleshlightLaunch) {
        let peripheral = Arc::new(
            SimulatedPeripheral::new(Some("Launch"), "33:44", &[SERVICE])
                .with_characteristics(&[TX, RX, CMD]),
        );
        let characteristics = peripheral.characteristics(&[TX, RX, CMD]).await.unwrap();
        let device = FleshlightLaunch::connect(peripheral.clone(), characteristics).unwrap();
        (peripheral, device)
    }

    fn last_tx(peripheral: &SimulatedPeripheral) -> Option<Bytes> {
        peripheral.characteristic(TX).unwrap().last_write()
    }

    #[test]
    fn test_launch_speed_curve() {
        assert_eq!(launch_speed(0, 500), 0);
        assert_eq!(launch_speed(99, 1000), 20);
        assert_eq!(launch_speed(99, 200), 99);
        assert!(launch_speed(50, 500) > launch_speed(50, 1500));
    }

    #[tokio::test]
    async fn test_initialize_writes_handshake() {
        let (peripheral, device) = launch().await;
        let reply = device.initialize().await.unwrap();
        assert!(reply.is_ok());
        assert_eq!(
            peripheral.characteristic(CMD).unwrap().writes(),
            vec![Bytes::from_static(&[0x00])]
        );
    }

    #[tokio::test]
    async fn test_raw_position_command() {
        let (peripheral, device) = launch().await;
        device
            .dispatch(FleshlightLaunchFw12Cmd::new(0, 50, 99, 1).unwrap().into())
            .await
            .unwrap();
        assert_eq!(last_tx(&peripheral), Some(Bytes::from_static(&[99, 50])));
    }

    #[tokio::test]
    async fn test_linear_cmd_derives_speed_from_travel() {
        let (peripheral, device) = launch().await;
        let vectors = vec![VectorSubcommand::new(0, 1000, 1.0).unwrap()];
        device
            .dispatch(LinearCmd::new(0, vectors, 1).unwrap().into())
            .await
            .unwrap();
        assert_eq!(last_tx(&peripheral), Some(Bytes::from_static(&[99, 20])));

        // Same position again: no travel
        let vectors = vec![VectorSubcommand::new(0, 1000, 1.0).unwrap()];
        device
            .dispatch(LinearCmd::new(0, vectors, 2).unwrap().into())
            .await
            .unwrap();
        assert_eq!(last_tx(&peripheral), Some(Bytes::from_static(&[99, 0])));
    }

    #[tokio::test]
    async fn test_failed_stroke_keeps_previous_position() {
        let (peripheral, device) = launch().await;
        let tx = peripheral.characteristic(TX).unwrap();

        tx.set_fail_writes(true);
        let vectors = vec![VectorSubcommand::new(0, 1000, 1.0).unwrap()];
        let err = device
            .dispatch(LinearCmd::new(0, vectors, 1).unwrap().into())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Transport(_)));

        tx.set_fail_writes(false);
        let vectors = vec![VectorSubcommand::new(0, 1000, 1.0).unwrap()];
        device
            .dispatch(LinearCmd::new(0, vectors, 2).unwrap().into())
            .await
            .unwrap();
        assert_eq!(tx.writes(), vec![Bytes::from_static(&[99, 20])]);
    }

    #[tokio::test]
    async fn test_stop_writes_nothing() {
        let (peripheral, device) = launch().await;
        let reply = device
            .dispatch(StopDeviceCmd::new(0, 4).unwrap().into())
            .await
            .unwrap();
        assert_eq!(reply.id(), 4);
        assert!(last_tx(&peripheral).is_none());
    }
}
