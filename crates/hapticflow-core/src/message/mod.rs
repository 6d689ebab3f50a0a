/*!
 * Versioned message contract for HapticFlow.
 *
 * Every message variant is identified by a [`MessageType`], which statically
 * declares the schema version the shape was introduced in and the older
 * variant it supersedes, if any. Messages are immutable values: bounded fields
 * are checked once at construction and a [`ValidationError`] is returned for
 * anything out of range.
 *
 * Schema versions:
 *
 * * Version 0: the original vocabulary, including the raw per-device commands.
 * * Version 1: generic `VibrateCmd`/`LinearCmd`/`RotateCmd`, message
 *   attributes, and device readings.
 */
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub use device::{
    DeviceCommand, DeviceMessage, FleshlightLaunchFw12Cmd, KiirooCmd, LinearCmd, LovenseCmd,
    RawReading, RotateCmd, RotationSubcommand, SingleMotorVibrateCmd, StopDeviceCmd,
    VectorSubcommand, VibrateCmd, VibrateSubcommand, VorzeA10CycloneCmd,
};
pub use system::{
    DeviceAdded, DeviceList, DeviceMessageInfo, DeviceRemoved, Error, ErrorClass, Log, LogLevel,
    Ok, Ping, RequestDeviceList, RequestLog, RequestServerInfo, ScanningFinished, ServerInfo,
    StartScanning, StopScanning, Test,
};

/// The newest schema version this crate speaks
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Identifier carried by server-originated and unsolicited messages
pub const SYSTEM_MESSAGE_ID: u32 = 0;

/// Identifier used when a client does not supply one
pub const DEFAULT_MESSAGE_ID: u32 = 1;

/// Identity of a message variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    /// Generic success acknowledgment
    Ok,
    /// Generic failure report
    Error,
    /// Client keep-alive
    Ping,
    /// Echo test message
    Test,
    /// Client handshake
    RequestServerInfo,
    /// Server handshake reply
    ServerInfo,
    /// Request for the connected device list
    RequestDeviceList,
    /// Connected device list
    DeviceList,
    /// A device was connected
    DeviceAdded,
    /// A device was removed
    DeviceRemoved,
    /// Begin device discovery
    StartScanning,
    /// End device discovery
    StopScanning,
    /// Discovery has ended
    ScanningFinished,
    /// Request for server log forwarding
    RequestLog,
    /// Forwarded server log line
    Log,
    /// Raw position/speed command for the Fleshlight Launch (firmware 1.2)
    #[serde(rename = "FleshlightLaunchFW12Cmd")]
    FleshlightLaunchFw12Cmd,
    /// Raw command string for Lovense devices
    LovenseCmd,
    /// Raw position command for Kiiroo devices
    KiirooCmd,
    /// Single speed vibration command
    SingleMotorVibrateCmd,
    /// Raw rotation command for the Vorze A10 Cyclone
    VorzeA10CycloneCmd,
    /// Stop all device output
    StopDeviceCmd,
    /// Generic per-motor vibration command
    VibrateCmd,
    /// Generic linear motion command
    LinearCmd,
    /// Generic rotation command
    RotateCmd,
    /// Unsolicited data read from a device
    RawReading,
}

impl MessageType {
    /// Every message variant, oldest schema first
    pub const ALL: [MessageType; 25] = [
        MessageType::Ok,
        MessageType::Error,
        MessageType::Ping,
        MessageType::Test,
        MessageType::RequestServerInfo,
        MessageType::ServerInfo,
        MessageType::RequestDeviceList,
        MessageType::DeviceList,
        MessageType::DeviceAdded,
        MessageType::DeviceRemoved,
        MessageType::StartScanning,
        MessageType::StopScanning,
        MessageType::ScanningFinished,
        MessageType::RequestLog,
        MessageType::Log,
        MessageType::FleshlightLaunchFw12Cmd,
        MessageType::LovenseCmd,
        MessageType::KiirooCmd,
        MessageType::SingleMotorVibrateCmd,
        MessageType::VorzeA10CycloneCmd,
        MessageType::StopDeviceCmd,
        MessageType::VibrateCmd,
        MessageType::LinearCmd,
        MessageType::RotateCmd,
        MessageType::RawReading,
    ];

    /// Wire name of the variant
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Ok => "Ok",
            MessageType::Error => "Error",
            MessageType::Ping => "Ping",
            MessageType::Test => "Test",
            MessageType::RequestServerInfo => "RequestServerInfo",
            MessageType::ServerInfo => "ServerInfo",
            MessageType::RequestDeviceList => "RequestDeviceList",
            MessageType::DeviceList => "DeviceList",
            MessageType::DeviceAdded => "DeviceAdded",
            MessageType::DeviceRemoved => "DeviceRemoved",
            MessageType::StartScanning => "StartScanning",
            MessageType::StopScanning => "StopScanning",
            MessageType::ScanningFinished => "ScanningFinished",
            MessageType::RequestLog => "RequestLog",
            MessageType::Log => "Log",
            MessageType::FleshlightLaunchFw12Cmd => "FleshlightLaunchFW12Cmd",
            MessageType::LovenseCmd => "LovenseCmd",
            MessageType::KiirooCmd => "KiirooCmd",
            MessageType::SingleMotorVibrateCmd => "SingleMotorVibrateCmd",
            MessageType::VorzeA10CycloneCmd => "VorzeA10CycloneCmd",
            MessageType::StopDeviceCmd => "StopDeviceCmd",
            MessageType::VibrateCmd => "VibrateCmd",
            MessageType::LinearCmd => "LinearCmd",
            MessageType::RotateCmd => "RotateCmd",
            MessageType::RawReading => "RawReading",
        }
    }

    /// Schema version the variant was introduced in
    pub fn schema_version(self) -> u32 {
        match self {
            MessageType::VibrateCmd
            | MessageType::LinearCmd
            | MessageType::RotateCmd
            | MessageType::RawReading => 1,
            _ => 0,
        }
    }

    /// The older variant this one supersedes, used for downgrades
    pub fn previous(self) -> Option<MessageType> {
        match self {
            MessageType::VibrateCmd => Some(MessageType::SingleMotorVibrateCmd),
            MessageType::LinearCmd => Some(MessageType::FleshlightLaunchFw12Cmd),
            MessageType::RotateCmd => Some(MessageType::VorzeA10CycloneCmd),
            _ => None,
        }
    }

    /// Walk the downgrade chain to the newest variant a peer speaking
    /// `peer_schema_version` understands.
    pub fn downgrade_for(self, peer_schema_version: u32) -> Option<MessageType> {
        let mut current = Some(self);
        while let Some(message_type) = current {
            if message_type.schema_version() <= peer_schema_version {
                return Some(message_type);
            }
            current = message_type.previous();
        }
        None
    }

    /// Whether only the server may send this variant
    pub fn is_outgoing_only(self) -> bool {
        matches!(
            self,
            MessageType::Ok
                | MessageType::Error
                | MessageType::ServerInfo
                | MessageType::DeviceList
                | MessageType::DeviceAdded
                | MessageType::DeviceRemoved
                | MessageType::ScanningFinished
                | MessageType::Log
                | MessageType::RawReading
        )
    }

    /// Whether the variant is a command addressed to a device index
    pub fn is_device_message(self) -> bool {
        matches!(
            self,
            MessageType::FleshlightLaunchFw12Cmd
                | MessageType::LovenseCmd
                | MessageType::KiirooCmd
                | MessageType::SingleMotorVibrateCmd
                | MessageType::VorzeA10CycloneCmd
                | MessageType::StopDeviceCmd
                | MessageType::VibrateCmd
                | MessageType::LinearCmd
                | MessageType::RotateCmd
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Common view over every message value
pub trait ProtocolMessage {
    /// The message id
    fn id(&self) -> u32;

    /// The variant identity
    fn message_type(&self) -> MessageType;

    /// Schema version of the variant
    fn schema_version(&self) -> u32 {
        self.message_type().schema_version()
    }

    /// The variant this one superseded, if any
    fn previous_type(&self) -> Option<MessageType> {
        self.message_type().previous()
    }
}

/// Capability metadata attached to a supported message on a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageAttributes {
    /// Number of independently addressable features (motors, axes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<u32>,
}

impl MessageAttributes {
    /// Attributes declaring a feature count
    pub fn with_feature_count(feature_count: u32) -> Self {
        Self {
            feature_count: Some(feature_count),
        }
    }
}

/// Implements [`ProtocolMessage`] for a struct with an `id` field.
macro_rules! impl_protocol_message {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl $crate::message::ProtocolMessage for $ty {
                fn id(&self) -> u32 {
                    self.id
                }

                fn message_type(&self) -> $crate::message::MessageType {
                    $crate::message::MessageType::$ty
                }
            }
        )+
    };
}

pub mod device;
pub mod system;

/// Any message of the protocol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Message {
    /// See [`Ok`]
    Ok(Ok),
    /// See [`Error`]
    Error(Error),
    /// See [`Ping`]
    Ping(Ping),
    /// See [`Test`]
    Test(Test),
    /// See [`RequestServerInfo`]
    RequestServerInfo(RequestServerInfo),
    /// See [`ServerInfo`]
    ServerInfo(ServerInfo),
    /// See [`RequestDeviceList`]
    RequestDeviceList(RequestDeviceList),
    /// See [`DeviceList`]
    DeviceList(DeviceList),
    /// See [`DeviceAdded`]
    DeviceAdded(DeviceAdded),
    /// See [`DeviceRemoved`]
    DeviceRemoved(DeviceRemoved),
    /// See [`StartScanning`]
    StartScanning(StartScanning),
    /// See [`StopScanning`]
    StopScanning(StopScanning),
    /// See [`ScanningFinished`]
    ScanningFinished(ScanningFinished),
    /// See [`RequestLog`]
    RequestLog(RequestLog),
    /// See [`Log`]
    Log(Log),
    /// See [`RawReading`]
    RawReading(RawReading),
    /// A command addressed to a device
    #[serde(untagged)]
    Device(DeviceMessage),
}

macro_rules! message_variants {
    ($($ty:ident),+ $(,)?) => {
        impl ProtocolMessage for Message {
            fn id(&self) -> u32 {
                match self {
                    $(Message::$ty(msg) => msg.id(),)+
                    Message::Device(msg) => msg.id(),
                }
            }

            fn message_type(&self) -> MessageType {
                match self {
                    $(Message::$ty(msg) => msg.message_type(),)+
                    Message::Device(msg) => msg.message_type(),
                }
            }
        }

        $(
            impl From<$ty> for Message {
                fn from(msg: $ty) -> Self {
                    Message::$ty(msg)
                }
            }
        )+
    };
}

message_variants!(
    Ok,
    Error,
    Ping,
    Test,
    RequestServerInfo,
    ServerInfo,
    RequestDeviceList,
    DeviceList,
    DeviceAdded,
    DeviceRemoved,
    StartScanning,
    StopScanning,
    ScanningFinished,
    RequestLog,
    Log,
    RawReading,
);

impl From<DeviceMessage> for Message {
    fn from(msg: DeviceMessage) -> Self {
        Message::Device(msg)
    }
}

impl Message {
    /// Stamp a device index onto device-scoped outgoing messages.
    ///
    /// Devices produce readings before they know their registry index; the
    /// owner fills it in on the way out. Other messages pass through.
    pub fn with_device_index(self, device_index: u32) -> Self {
        match self {
            Message::RawReading(reading) => Message::RawReading(reading.for_device(device_index)),
            other => other,
        }
    }

    /// Whether this is an [`Ok`] acknowledgment
    pub fn is_ok(&self) -> bool {
        matches!(self, Message::Ok(_))
    }
}

pub(crate) fn check_request_id(message: &'static str, id: u32) -> Result<u32, ValidationError> {
    if id == SYSTEM_MESSAGE_ID {
        return Err(ValidationError::ReservedId(message));
    }
    Ok(id)
}

pub(crate) fn check_unit(
    message: &'static str,
    field: &'static str,
    value: f64,
) -> Result<f64, ValidationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::OutOfRange {
            message,
            field,
            value: value.to_string(),
            range: "[0, 1]",
        });
    }
    Ok(value)
}

pub(crate) fn check_max(
    message: &'static str,
    field: &'static str,
    value: u32,
    max: u8,
    range: &'static str,
) -> Result<u8, ValidationError> {
    if value > u32::from(max) {
        return Err(ValidationError::OutOfRange {
            message,
            field,
            value: value.to_string(),
            range,
        });
    }
    Ok(value as u8)
}
