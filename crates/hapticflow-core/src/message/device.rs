/*!
 * Device messages: commands addressed to a device index, and readings
 * produced by devices.
 */
use std::collections::HashSet;

use serde::Serialize;

use super::{
    check_max, check_request_id, check_unit, Message, MessageType, ProtocolMessage,
    SYSTEM_MESSAGE_ID,
};
use crate::error::ValidationError;

/// Raw position/speed command for the Fleshlight Launch (firmware 1.2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FleshlightLaunchFw12Cmd {
    id: u32,
    device_index: u32,
    speed: u8,
    position: u8,
}

impl FleshlightLaunchFw12Cmd {
    /// Build the command. Speed and position are both limited to 0..=99.
    pub fn new(
        device_index: u32,
        speed: u32,
        position: u32,
        id: u32,
    ) -> Result<Self, ValidationError> {
        const NAME: &str = "FleshlightLaunchFW12Cmd";
        Ok(Self {
            id: check_request_id(NAME, id)?,
            device_index,
            speed: check_max(NAME, "Speed", speed, 99, "0..=99")?,
            position: check_max(NAME, "Position", position, 99, "0..=99")?,
        })
    }

    /// Stroke speed, 0..=99
    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// Target position, 0..=99
    pub fn position(&self) -> u8 {
        self.position
    }
}

/// Raw command string for Lovense devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LovenseCmd {
    id: u32,
    device_index: u32,
    command: String,
}

impl LovenseCmd {
    /// Build the command. The string is sent to the device verbatim.
    pub fn new<S: Into<String>>(
        device_index: u32,
        command: S,
        id: u32,
    ) -> Result<Self, ValidationError> {
        let command = command.into();
        if command.is_empty() {
            return Err(ValidationError::Empty {
                message: "LovenseCmd",
                field: "Command",
            });
        }
        Ok(Self {
            id: check_request_id("LovenseCmd", id)?,
            device_index,
            command,
        })
    }

    /// The raw command text
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Raw position command for Kiiroo devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KiirooCmd {
    id: u32,
    device_index: u32,
    position: u8,
}

impl KiirooCmd {
    /// Build the command. Position is limited to 0..=4.
    pub fn new(device_index: u32, position: u32, id: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            id: check_request_id("KiirooCmd", id)?,
            device_index,
            position: check_max("KiirooCmd", "Position", position, 4, "0..=4")?,
        })
    }

    /// Target position, 0..=4
    pub fn position(&self) -> u8 {
        self.position
    }
}

/// Single speed vibration command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SingleMotorVibrateCmd {
    id: u32,
    device_index: u32,
    speed: f64,
}

impl SingleMotorVibrateCmd {
    /// Build the command. Speed is limited to [0, 1].
    pub fn new(device_index: u32, speed: f64, id: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            id: check_request_id("SingleMotorVibrateCmd", id)?,
            device_index,
            speed: check_unit("SingleMotorVibrateCmd", "Speed", speed)?,
        })
    }

    /// Vibration speed, [0, 1]
    pub fn speed(&self) -> f64 {
        self.speed
    }
}

/// Raw rotation command for the Vorze A10 Cyclone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VorzeA10CycloneCmd {
    id: u32,
    device_index: u32,
    speed: u8,
    clockwise: bool,
}

impl VorzeA10CycloneCmd {
    /// Build the command. Speed is limited to 0..=99.
    pub fn new(
        device_index: u32,
        speed: u32,
        clockwise: bool,
        id: u32,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id: check_request_id("VorzeA10CycloneCmd", id)?,
            device_index,
            speed: check_max("VorzeA10CycloneCmd", "Speed", speed, 99, "0..=99")?,
            clockwise,
        })
    }

    /// Rotation speed, 0..=99
    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// Rotation direction
    pub fn clockwise(&self) -> bool {
        self.clockwise
    }
}

/// Stop all output of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopDeviceCmd {
    id: u32,
    device_index: u32,
}

impl StopDeviceCmd {
    /// Build the command
    pub fn new(device_index: u32, id: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            id: check_request_id("StopDeviceCmd", id)?,
            device_index,
        })
    }
}

/// Speed for one vibration motor
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VibrateSubcommand {
    index: u32,
    speed: f64,
}

impl VibrateSubcommand {
    /// Speed for motor `index`, limited to [0, 1]
    pub fn new(index: u32, speed: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            index,
            speed: check_unit("VibrateCmd", "Speed", speed)?,
        })
    }

    /// Motor index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Motor speed
    pub fn speed(&self) -> f64 {
        self.speed
    }
}

/// Generic per-motor vibration command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VibrateCmd {
    id: u32,
    device_index: u32,
    speeds: Vec<VibrateSubcommand>,
}

impl VibrateCmd {
    /// Build the command from one subcommand per addressed motor
    pub fn new(
        device_index: u32,
        speeds: Vec<VibrateSubcommand>,
        id: u32,
    ) -> Result<Self, ValidationError> {
        check_features("VibrateCmd", "Speeds", speeds.iter().map(|s| s.index))?;
        Ok(Self {
            id: check_request_id("VibrateCmd", id)?,
            device_index,
            speeds,
        })
    }

    /// Per-motor speeds
    pub fn speeds(&self) -> &[VibrateSubcommand] {
        &self.speeds
    }
}

/// Move one linear axis to a position over a duration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VectorSubcommand {
    index: u32,
    duration: u32,
    position: f64,
}

impl VectorSubcommand {
    /// Move axis `index` to `position` ([0, 1]) over `duration` milliseconds
    pub fn new(index: u32, duration: u32, position: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            index,
            duration,
            position: check_unit("LinearCmd", "Position", position)?,
        })
    }

    /// Axis index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Movement duration in milliseconds
    pub fn duration(&self) -> u32 {
        self.duration
    }

    /// Target position
    pub fn position(&self) -> f64 {
        self.position
    }
}

/// Generic linear motion command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinearCmd {
    id: u32,
    device_index: u32,
    vectors: Vec<VectorSubcommand>,
}

impl LinearCmd {
    /// Build the command from one subcommand per addressed axis
    pub fn new(
        device_index: u32,
        vectors: Vec<VectorSubcommand>,
        id: u32,
    ) -> Result<Self, ValidationError> {
        check_features("LinearCmd", "Vectors", vectors.iter().map(|v| v.index))?;
        Ok(Self {
            id: check_request_id("LinearCmd", id)?,
            device_index,
            vectors,
        })
    }

    /// Per-axis movements
    pub fn vectors(&self) -> &[VectorSubcommand] {
        &self.vectors
    }
}

/// Speed and direction for one rotator
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RotationSubcommand {
    index: u32,
    speed: f64,
    clockwise: bool,
}

impl RotationSubcommand {
    /// Rotation for rotator `index`, speed limited to [0, 1]
    pub fn new(index: u32, speed: f64, clockwise: bool) -> Result<Self, ValidationError> {
        Ok(Self {
            index,
            speed: check_unit("RotateCmd", "Speed", speed)?,
            clockwise,
        })
    }

    /// Rotator index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Rotation speed
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Rotation direction
    pub fn clockwise(&self) -> bool {
        self.clockwise
    }
}

/// Generic rotation command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RotateCmd {
    id: u32,
    device_index: u32,
    rotations: Vec<RotationSubcommand>,
}

impl RotateCmd {
    /// Build the command from one subcommand per addressed rotator
    pub fn new(
        device_index: u32,
        rotations: Vec<RotationSubcommand>,
        id: u32,
    ) -> Result<Self, ValidationError> {
        check_features("RotateCmd", "Rotations", rotations.iter().map(|r| r.index))?;
        Ok(Self {
            id: check_request_id("RotateCmd", id)?,
            device_index,
            rotations,
        })
    }

    /// Per-rotator commands
    pub fn rotations(&self) -> &[RotationSubcommand] {
        &self.rotations
    }
}

/// Unsolicited data read from a device endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawReading {
    id: u32,
    device_index: u32,
    endpoint: String,
    data: Vec<u8>,
}

impl RawReading {
    /// Build a reading. The device index is filled in by the device owner
    /// through [`RawReading::for_device`].
    pub fn new<S: Into<String>>(endpoint: S, data: Vec<u8>) -> Self {
        Self {
            id: SYSTEM_MESSAGE_ID,
            device_index: 0,
            endpoint: endpoint.into(),
            data,
        }
    }

    /// The same reading attributed to `device_index`
    pub fn for_device(mut self, device_index: u32) -> Self {
        self.device_index = device_index;
        self
    }

    /// Index of the device that produced the reading
    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    /// Endpoint the data arrived on
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Raw bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl_protocol_message!(
    FleshlightLaunchFw12Cmd,
    LovenseCmd,
    KiirooCmd,
    SingleMotorVibrateCmd,
    VorzeA10CycloneCmd,
    StopDeviceCmd,
    VibrateCmd,
    LinearCmd,
    RotateCmd,
    RawReading,
);

fn check_features(
    message: &'static str,
    field: &'static str,
    indices: impl Iterator<Item = u32>,
) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    let mut count = 0usize;
    for index in indices {
        count += 1;
        if !seen.insert(index) {
            return Err(ValidationError::Invalid {
                message,
                field,
                reason: format!("feature index {} is addressed twice", index),
            });
        }
    }
    if count == 0 {
        return Err(ValidationError::Empty { message, field });
    }
    Ok(())
}

/// A concrete command type that can be unwrapped from a [`DeviceMessage`]
pub trait DeviceCommand:
    ProtocolMessage + TryFrom<DeviceMessage, Error = DeviceMessage> + Send + 'static
{
    /// The variant this command type travels as
    const MESSAGE_TYPE: MessageType;
}

/// A command addressed to a device index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeviceMessage {
    /// See [`FleshlightLaunchFw12Cmd`]
    #[serde(rename = "FleshlightLaunchFW12Cmd")]
    FleshlightLaunchFw12Cmd(FleshlightLaunchFw12Cmd),
    /// See [`LovenseCmd`]
    LovenseCmd(LovenseCmd),
    /// See [`KiirooCmd`]
    KiirooCmd(KiirooCmd),
    /// See [`SingleMotorVibrateCmd`]
    SingleMotorVibrateCmd(SingleMotorVibrateCmd),
    /// See [`VorzeA10CycloneCmd`]
    VorzeA10CycloneCmd(VorzeA10CycloneCmd),
    /// See [`StopDeviceCmd`]
    StopDeviceCmd(StopDeviceCmd),
    /// See [`VibrateCmd`]
    VibrateCmd(VibrateCmd),
    /// See [`LinearCmd`]
    LinearCmd(LinearCmd),
    /// See [`RotateCmd`]
    RotateCmd(RotateCmd),
}

macro_rules! device_message_variants {
    ($($ty:ident),+ $(,)?) => {
        impl ProtocolMessage for DeviceMessage {
            fn id(&self) -> u32 {
                match self {
                    $(DeviceMessage::$ty(msg) => msg.id(),)+
                }
            }

            fn message_type(&self) -> MessageType {
                match self {
                    $(DeviceMessage::$ty(msg) => msg.message_type(),)+
                }
            }
        }

        impl DeviceMessage {
            /// Index of the device the command is addressed to
            pub fn device_index(&self) -> u32 {
                match self {
                    $(DeviceMessage::$ty(msg) => msg.device_index,)+
                }
            }
        }

        $(
            impl From<$ty> for DeviceMessage {
                fn from(msg: $ty) -> Self {
                    DeviceMessage::$ty(msg)
                }
            }

            impl From<$ty> for Message {
                fn from(msg: $ty) -> Self {
                    Message::Device(DeviceMessage::$ty(msg))
                }
            }

            impl TryFrom<DeviceMessage> for $ty {
                type Error = DeviceMessage;

                fn try_from(msg: DeviceMessage) -> Result<Self, DeviceMessage> {
                    match msg {
                        DeviceMessage::$ty(cmd) => Ok(cmd),
                        other => Err(other),
                    }
                }
            }

            impl DeviceCommand for $ty {
                const MESSAGE_TYPE: MessageType = MessageType::$ty;
            }
        )+
    };
}

device_message_variants!(
    FleshlightLaunchFw12Cmd,
    LovenseCmd,
    KiirooCmd,
    SingleMotorVibrateCmd,
    VorzeA10CycloneCmd,
    StopDeviceCmd,
    VibrateCmd,
    LinearCmd,
    RotateCmd,
);

impl DeviceMessage {
    /// Re-encode the command in the newest shape a peer speaking
    /// `peer_schema_version` understands.
    ///
    /// Generic commands translate to their predecessor only when the older
    /// shape can carry the same meaning: a `VibrateCmd` whose motors all
    /// share one speed, or a single-rotator `RotateCmd`. `LinearCmd` needs
    /// the previous stroke position to derive a speed and is never translated.
    pub fn downgrade(&self, peer_schema_version: u32) -> Result<DeviceMessage, ValidationError> {
        let message_type = self.message_type();
        let no_downgrade = || ValidationError::NoDowngrade {
            message: message_type.name(),
            version: peer_schema_version,
        };

        let target = message_type
            .downgrade_for(peer_schema_version)
            .ok_or_else(no_downgrade)?;
        if target == message_type {
            return Ok(self.clone());
        }

        match self {
            DeviceMessage::VibrateCmd(cmd) => {
                let speed = cmd.speeds[0].speed;
                if cmd.speeds.iter().any(|s| s.speed != speed) {
                    return Err(no_downgrade());
                }
                Ok(SingleMotorVibrateCmd::new(cmd.device_index, speed, cmd.id)?.into())
            }
            DeviceMessage::RotateCmd(cmd) if cmd.rotations.len() == 1 => {
                let rotation = cmd.rotations[0];
                let speed = (rotation.speed * 99.0).round() as u32;
                Ok(VorzeA10CycloneCmd::new(cmd.device_index, speed, rotation.clockwise, cmd.id)?
                    .into())
            }
            _ => Err(no_downgrade()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_bounds() {
        assert!(FleshlightLaunchFw12Cmd::new(0, 99, 99, 1).is_ok());
        let err = FleshlightLaunchFw12Cmd::new(0, 50, 100, 1).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange { field: "Position", .. }
        ));
        assert!(FleshlightLaunchFw12Cmd::new(0, 100, 50, 1).is_err());
    }

    #[test]
    fn test_kiiroo_bounds() {
        assert_eq!(KiirooCmd::new(1, 4, 1).unwrap().position(), 4);
        assert!(KiirooCmd::new(1, 5, 1).is_err());
    }

    #[test]
    fn test_speed_bounds() {
        assert!(SingleMotorVibrateCmd::new(0, 0.0, 1).is_ok());
        assert!(SingleMotorVibrateCmd::new(0, 1.0, 1).is_ok());
        assert!(SingleMotorVibrateCmd::new(0, 1.01, 1).is_err());
        assert!(SingleMotorVibrateCmd::new(0, -0.5, 1).is_err());
        assert!(VibrateSubcommand::new(0, 1.5).is_err());
        assert!(RotationSubcommand::new(0, f64::NAN, true).is_err());
        assert!(VectorSubcommand::new(0, 500, 2.0).is_err());
    }

    #[test]
    fn test_generic_commands_need_unique_features() {
        let a = VibrateSubcommand::new(0, 0.5).unwrap();
        let b = VibrateSubcommand::new(0, 0.7).unwrap();
        assert!(matches!(
            VibrateCmd::new(0, vec![a, b], 1),
            Err(ValidationError::Invalid { .. })
        ));
        assert!(matches!(
            VibrateCmd::new(0, Vec::new(), 1),
            Err(ValidationError::Empty { .. })
        ));
    }

    #[test]
    fn test_lovense_cmd_rejects_empty() {
        assert!(LovenseCmd::new(0, "", 1).is_err());
        assert_eq!(LovenseCmd::new(0, "Battery;", 1).unwrap().command(), "Battery;");
    }

    #[test]
    fn test_unwrap_concrete_command() {
        let msg = DeviceMessage::from(StopDeviceCmd::new(1, 3).unwrap());
        assert_eq!(StopDeviceCmd::MESSAGE_TYPE, MessageType::StopDeviceCmd);
        assert!(VibrateCmd::try_from(msg.clone()).is_err());
        assert_eq!(StopDeviceCmd::try_from(msg).unwrap().id(), 3);
    }

    #[test]
    fn test_device_message_identity() {
        let msg: DeviceMessage = KiirooCmd::new(6, 2, 9).unwrap().into();
        assert_eq!(msg.device_index(), 6);
        assert_eq!(msg.id(), 9);
        assert_eq!(msg.message_type(), MessageType::KiirooCmd);
    }

    #[test]
    fn test_command_converts_into_client_message() {
        let msg: Message = SingleMotorVibrateCmd::new(2, 0.25, 4).unwrap().into();
        match &msg {
            Message::Device(DeviceMessage::SingleMotorVibrateCmd(cmd)) => {
                assert_eq!(cmd.speed(), 0.25);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(msg.id(), 4);
        assert_eq!(msg.message_type(), MessageType::SingleMotorVibrateCmd);
    }

    #[test]
    fn test_downgrade_vibrate() {
        let speeds = vec![
            VibrateSubcommand::new(0, 0.5).unwrap(),
            VibrateSubcommand::new(1, 0.5).unwrap(),
        ];
        let msg: DeviceMessage = VibrateCmd::new(2, speeds, 4).unwrap().into();

        let downgraded = msg.downgrade(0).unwrap();
        assert_eq!(
            downgraded,
            DeviceMessage::from(SingleMotorVibrateCmd::new(2, 0.5, 4).unwrap())
        );
        assert_eq!(msg.downgrade(1).unwrap(), msg);
    }

    #[test]
    fn test_downgrade_vibrate_with_mixed_speeds_fails() {
        let speeds = vec![
            VibrateSubcommand::new(0, 0.2).unwrap(),
            VibrateSubcommand::new(1, 0.9).unwrap(),
        ];
        let msg: DeviceMessage = VibrateCmd::new(2, speeds, 4).unwrap().into();
        assert!(matches!(
            msg.downgrade(0),
            Err(ValidationError::NoDowngrade { version: 0, .. })
        ));
    }

    #[test]
    fn test_downgrade_rotate_and_linear() {
        let rotation = RotationSubcommand::new(0, 0.5, false).unwrap();
        let msg: DeviceMessage = RotateCmd::new(1, vec![rotation], 3).unwrap().into();
        assert_eq!(
            msg.downgrade(0).unwrap(),
            DeviceMessage::from(VorzeA10CycloneCmd::new(1, 50, false, 3).unwrap())
        );

        let vector = VectorSubcommand::new(0, 300, 0.8).unwrap();
        let msg: DeviceMessage = LinearCmd::new(1, vec![vector], 3).unwrap().into();
        assert!(msg.downgrade(0).is_err());
    }

    #[test]
    fn test_raw_reading_index_stamping() {
        let reading = RawReading::new("rx", vec![1, 2, 3]).for_device(5);
        assert_eq!(reading.device_index(), 5);
        assert_eq!(reading.id(), SYSTEM_MESSAGE_ID);
        assert_eq!(reading.data(), &[1, 2, 3]);
    }
}
