/*!
 * System messages: handshake, acknowledgments, discovery control and
 * device lifecycle announcements.
 */
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    check_request_id, MessageAttributes, MessageType, CURRENT_SCHEMA_VERSION, SYSTEM_MESSAGE_ID,
};
use crate::error::ValidationError;

/// Generic success acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ok {
    id: u32,
}

impl Ok {
    /// Acknowledge the message with the given id
    pub fn new(id: u32) -> Self {
        Self { id }
    }
}

/// Category of a reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Unclassified failure
    #[serde(rename = "ERROR_UNKNOWN")]
    Unknown,
    /// Handshake failure
    #[serde(rename = "ERROR_INIT")]
    Init,
    /// Ping deadline missed
    #[serde(rename = "ERROR_PING")]
    Ping,
    /// Malformed or unexpected message
    #[serde(rename = "ERROR_MSG")]
    Message,
    /// Device-side failure
    #[serde(rename = "ERROR_DEVICE")]
    Device,
}

/// Generic failure report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Error {
    id: u32,
    error_message: String,
    error_code: ErrorClass,
}

impl Error {
    /// Report a failure answering the message with the given id
    pub fn new<S: Into<String>>(error_message: S, error_code: ErrorClass, id: u32) -> Self {
        Self {
            id,
            error_message: error_message.into(),
            error_code,
        }
    }

    /// Human-readable failure text
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Failure category
    pub fn error_code(&self) -> ErrorClass {
        self.error_code
    }
}

/// Client keep-alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ping {
    id: u32,
}

impl Ping {
    /// Build a ping request
    pub fn new(id: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            id: check_request_id("Ping", id)?,
        })
    }
}

/// Echo test message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Test {
    id: u32,
    test_string: String,
}

impl Test {
    /// Build a test message. The string `"Error"` is reserved to exercise the
    /// validation path and is always rejected.
    pub fn new<S: Into<String>>(test_string: S, id: u32) -> Result<Self, ValidationError> {
        let test_string = test_string.into();
        if test_string == "Error" {
            return Err(ValidationError::Invalid {
                message: "Test",
                field: "TestString",
                reason: "got an Error message".to_string(),
            });
        }
        Ok(Self {
            id: check_request_id("Test", id)?,
            test_string,
        })
    }

    /// The echoed string
    pub fn test_string(&self) -> &str {
        &self.test_string
    }

    /// The echo reply, carrying the same string and id
    pub fn echo(&self) -> Self {
        self.clone()
    }
}

/// Client handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestServerInfo {
    id: u32,
    client_name: String,
    message_version: u32,
}

impl RequestServerInfo {
    /// Build a handshake for a client speaking `message_version`
    pub fn new<S: Into<String>>(
        client_name: S,
        message_version: u32,
        id: u32,
    ) -> Result<Self, ValidationError> {
        if message_version > CURRENT_SCHEMA_VERSION {
            return Err(ValidationError::OutOfRange {
                message: "RequestServerInfo",
                field: "MessageVersion",
                value: message_version.to_string(),
                range: "0..=1",
            });
        }
        Ok(Self {
            id: check_request_id("RequestServerInfo", id)?,
            client_name: client_name.into(),
            message_version,
        })
    }

    /// Name the client announced
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Schema version the client speaks
    pub fn message_version(&self) -> u32 {
        self.message_version
    }
}

/// Server handshake reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    id: u32,
    server_name: String,
    message_version: u32,
    max_ping_time: u32,
    major_version: u32,
    minor_version: u32,
    build_version: u32,
}

impl ServerInfo {
    /// Build a handshake reply. The version triple is this crate's version.
    pub fn new<S: Into<String>>(
        server_name: S,
        message_version: u32,
        max_ping_time: u32,
        id: u32,
    ) -> Self {
        Self {
            id,
            server_name: server_name.into(),
            message_version,
            max_ping_time,
            major_version: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor_version: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            build_version: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        }
    }

    /// Server name
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Negotiated schema version
    pub fn message_version(&self) -> u32 {
        self.message_version
    }

    /// Ping deadline in milliseconds, 0 when disabled
    pub fn max_ping_time(&self) -> u32 {
        self.max_ping_time
    }
}

/// Request for the connected device list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestDeviceList {
    id: u32,
}

impl RequestDeviceList {
    /// Build a device list request
    pub fn new(id: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            id: check_request_id("RequestDeviceList", id)?,
        })
    }
}

/// One entry of a [`DeviceList`] or [`DeviceAdded`] announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMessageInfo {
    /// Registry index of the device
    pub device_index: u32,
    /// Human-readable device name
    pub device_name: String,
    /// Supported commands with their attributes
    pub device_messages: BTreeMap<MessageType, MessageAttributes>,
}

/// Connected device list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceList {
    id: u32,
    devices: Vec<DeviceMessageInfo>,
}

impl DeviceList {
    /// Answer a device list request
    pub fn new(devices: Vec<DeviceMessageInfo>, id: u32) -> Self {
        Self { id, devices }
    }

    /// Listed devices
    pub fn devices(&self) -> &[DeviceMessageInfo] {
        &self.devices
    }
}

/// A device was connected and registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceAdded {
    id: u32,
    #[serde(flatten)]
    info: DeviceMessageInfo,
}

impl DeviceAdded {
    /// Announce a newly registered device
    pub fn new(info: DeviceMessageInfo) -> Self {
        Self {
            id: SYSTEM_MESSAGE_ID,
            info,
        }
    }

    /// Registry index of the device
    pub fn device_index(&self) -> u32 {
        self.info.device_index
    }

    /// Device description
    pub fn info(&self) -> &DeviceMessageInfo {
        &self.info
    }
}

/// A device was disconnected and dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceRemoved {
    id: u32,
    device_index: u32,
}

impl DeviceRemoved {
    /// Announce removal of the device at `device_index`
    pub fn new(device_index: u32) -> Self {
        Self {
            id: SYSTEM_MESSAGE_ID,
            device_index,
        }
    }

    /// Registry index of the removed device
    pub fn device_index(&self) -> u32 {
        self.device_index
    }
}

/// Begin device discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartScanning {
    id: u32,
}

impl StartScanning {
    /// Build a scan request
    pub fn new(id: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            id: check_request_id("StartScanning", id)?,
        })
    }
}

/// End device discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopScanning {
    id: u32,
}

impl StopScanning {
    /// Build a stop-scan request
    pub fn new(id: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            id: check_request_id("StopScanning", id)?,
        })
    }
}

/// Discovery has ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanningFinished {
    id: u32,
}

impl ScanningFinished {
    /// Announce the end of a scan
    pub fn new() -> Self {
        Self {
            id: SYSTEM_MESSAGE_ID,
        }
    }
}

impl Default for ScanningFinished {
    fn default() -> Self {
        Self::new()
    }
}

/// Log forwarding level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Forward nothing
    Off,
    /// Unrecoverable failures
    Fatal,
    /// Failures
    Error,
    /// Warnings
    Warn,
    /// Informational lines
    Info,
    /// Debugging lines
    Debug,
    /// Everything
    Trace,
}

impl LogLevel {
    /// Wire name of the level
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "Off",
            LogLevel::Fatal => "Fatal",
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }

    /// Whether a line at `level` passes a filter set to `self`
    pub fn allows(&self, level: LogLevel) -> bool {
        *self != LogLevel::Off && level != LogLevel::Off && level <= *self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Off" => Ok(LogLevel::Off),
            "Fatal" => Ok(LogLevel::Fatal),
            "Error" => Ok(LogLevel::Error),
            "Warn" => Ok(LogLevel::Warn),
            "Info" => Ok(LogLevel::Info),
            "Debug" => Ok(LogLevel::Debug),
            "Trace" => Ok(LogLevel::Trace),
            other => Err(ValidationError::Invalid {
                message: "RequestLog",
                field: "LogLevel",
                reason: format!("log level {} is not valid", other),
            }),
        }
    }
}

/// Request for server log forwarding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestLog {
    id: u32,
    log_level: LogLevel,
}

impl RequestLog {
    /// Build a log request from the wire level name
    pub fn new(log_level: &str, id: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            log_level: log_level.parse()?,
            id: check_request_id("RequestLog", id)?,
        })
    }

    /// Requested level
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }
}

/// Forwarded server log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Log {
    id: u32,
    log_level: LogLevel,
    log_message: String,
}

impl Log {
    /// Build a forwarded log line
    pub fn new<S: Into<String>>(log_level: LogLevel, log_message: S) -> Self {
        Self {
            id: SYSTEM_MESSAGE_ID,
            log_level,
            log_message: log_message.into(),
        }
    }

    /// Level of the line
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Text of the line
    pub fn log_message(&self) -> &str {
        &self.log_message
    }
}

impl_protocol_message!(
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
);
