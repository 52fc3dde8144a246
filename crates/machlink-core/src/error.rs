//! Error handling for machlink
//!
//! Provides error types for all layers of the bridge:
//! - Connection errors (transport faults: refused, timeout, lost)
//! - Protocol errors (status/error-code rejections on a completed exchange)
//! - Store errors (variable store construction, always fatal)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents transport faults between the bridge and the machine.
/// Adapters convert these into absent values at their boundary.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// No open session/transport
    #[error("Not connected")]
    NotConnected,

    /// Remote refused the connection
    #[error("Connection refused by {endpoint}: {reason}")]
    Refused {
        /// The endpoint that refused the connection.
        endpoint: String,
        /// The reason reported by the OS or the remote.
        reason: String,
    },

    /// Call did not complete in time
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Connection dropped mid-exchange
    #[error("Connection lost: {reason}")]
    Lost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {reason}")]
    Http {
        /// The reason for the HTTP error.
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {reason}")]
    Io {
        /// The reason for the I/O error.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => ConnectionError::Refused {
                endpoint: "unknown".to_string(),
                reason: err.to_string(),
            },
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => ConnectionError::Lost {
                reason: err.to_string(),
            },
            _ => ConnectionError::Io {
                reason: err.to_string(),
            },
        }
    }
}

/// Protocol error type
///
/// The exchange completed but the machine rejected it or answered with
/// something that could not be understood.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Non-zero status with a backend-specific error code
    #[error("{operation} rejected with code {code}: {message}")]
    Rejected {
        /// The operation that was rejected.
        operation: String,
        /// The backend error code.
        code: i64,
        /// Human readable description.
        message: String,
    },

    /// Response could not be decoded
    #[error("Malformed response to {operation}: {reason}")]
    MalformedResponse {
        /// The operation whose response was malformed.
        operation: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Value has the wrong kind for the address
    #[error("Unexpected value for {address}: expected {expected}")]
    UnexpectedValue {
        /// The address that was accessed.
        address: String,
        /// The expected value kind.
        expected: String,
    },

    /// Address cannot be written through this backend
    #[error("Address {address} is not writable")]
    NotWritable {
        /// The address that was written.
        address: String,
    },
}

impl ProtocolError {
    /// Backend error code, if this is a rejection
    pub fn code(&self) -> Option<i64> {
        match self {
            ProtocolError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Store construction error
///
/// A store that fails to build is fatal: downstream logic assumes every
/// declared variable exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Two variables registered under one name
    #[error("Duplicate variable name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// Two array slots share one unit
    #[error("Duplicate unit '{unit}' in array {array}")]
    DuplicateUnit {
        /// The array name.
        array: String,
        /// The duplicated unit.
        unit: String,
    },

    /// More custom units than array slots
    #[error("Array {array} has {units} units for {size} slots")]
    TooManyUnits {
        /// The array name.
        array: String,
        /// Number of custom units given.
        units: usize,
        /// Number of slots.
        size: usize,
    },

    /// Arrays need at least one slot
    #[error("Array {array} must have at least one slot")]
    EmptyArray {
        /// The array name.
        array: String,
    },

    /// Laying out an array ran off the end of the address space
    #[error("Address overflow laying out {array} at slot {index}")]
    AddressOverflow {
        /// The array name.
        array: String,
        /// The slot that could not be addressed.
        index: usize,
    },

    /// A looked-up variable does not exist
    #[error("Unknown variable: {name}")]
    UnknownVariable {
        /// The name that was looked up.
        name: String,
    },
}

/// Main error type for machlink
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Connection(ConnectionError::Timeout { .. }))
    }

    /// Check if this is a transport fault
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a protocol rejection
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if this is a store error
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
