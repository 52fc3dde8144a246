//! RPC controller wire messages
//!
//! Requests and responses are single-line JSON objects. Every response
//! echoes the request id and carries a status; `error` responses include
//! the controller's error class and number.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Controller operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Select the boot mode
    BootModeSelect,
    /// Query system state
    SystemStatus,
    /// Enable auxiliary power
    AuxiliaryEnable,
    /// Reset alarms and the NC kernel
    SystemReset,
    /// Select the process (operating) mode
    ProcessModeSelect,
    /// Read a run of words
    ReadWords,
    /// Write a run of words
    WriteWords,
    /// Read a run of doubles
    ReadDoubles,
    /// Write a run of doubles
    WriteDoubles,
    /// Set or clear one bit
    WriteBit,
    /// Store a part program
    ProgramUpload,
    /// Make a stored program the active one
    ProgramSelect,
}

impl Method {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::BootModeSelect => "boot_mode.select",
            Method::SystemStatus => "system.status",
            Method::AuxiliaryEnable => "auxiliary.enable",
            Method::SystemReset => "system.reset",
            Method::ProcessModeSelect => "process_mode.select",
            Method::ReadWords => "memory.read_words",
            Method::WriteWords => "memory.write_words",
            Method::ReadDoubles => "memory.read_doubles",
            Method::WriteDoubles => "memory.write_doubles",
            Method::WriteBit => "memory.write_bit",
            Method::ProgramUpload => "program.upload",
            Method::ProgramSelect => "program.select",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id
    pub id: u64,
    /// Operation name
    pub method: String,
    /// Operation parameters
    #[serde(default)]
    pub params: Json,
}

impl Request {
    /// Build a request
    pub fn new(id: u64, method: Method, params: Json) -> Self {
        Self {
            id,
            method: method.as_str().to_string(),
            params,
        }
    }
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Completed
    Ok,
    /// Rejected; see the error payload
    Error,
    /// Controller is busy and did not run the request
    Busy,
}

/// Controller error payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error class
    #[serde(default)]
    pub class: u16,
    /// Error number within its class
    #[serde(default)]
    pub number: u16,
    /// Description
    #[serde(default)]
    pub message: String,
}

impl RpcError {
    /// Combined code as class * 1000 + number
    pub fn code(&self) -> i64 {
        i64::from(self.class) * 1000 + i64::from(self.number)
    }
}

/// One response line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id of the request
    pub id: u64,
    /// Outcome
    pub status: Status,
    /// Error details for `error` responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Result payload
    #[serde(default)]
    pub result: Json,
}

impl Response {
    /// Successful response
    pub fn ok(id: u64, result: Json) -> Self {
        Self {
            id,
            status: Status::Ok,
            error: None,
            result,
        }
    }

    /// Error response
    pub fn error(id: u64, class: u16, number: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            status: Status::Error,
            error: Some(RpcError {
                class,
                number,
                message: message.into(),
            }),
            result: Json::Null,
        }
    }
}

/// Controller system state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    /// Booting; not accepting motion or memory access yet
    Booting,
    /// Fully up
    Up,
    /// Faulted; needs a fresh bring-up
    Fault,
}

/// Result of [`Method::SystemStatus`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Current state
    pub state: SystemState,
    /// Selected boot mode
    #[serde(default)]
    pub boot_mode: Option<u16>,
    /// Firmware version string
    #[serde(default)]
    pub version: Option<String>,
}
