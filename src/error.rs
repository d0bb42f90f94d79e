//! Core error types and result handling
//!
//! One error enum covers the whole pipeline: user-input validation, TCP
//! transport, MBAP framing, Modbus exception replies, response validation,
//! and the registry's not-found/conflict cases. Every kind keeps enough
//! structure for callers to branch on (the relay-count probe needs to tell
//! Illegal Data Address apart from everything else).

use thiserror::Error;

/// Result type used throughout the crate.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Errors produced by the protocol engine, the executor, and the registry.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Malformed user input (missing address, bad relay index, bad JSON).
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// TCP connect failed or was refused.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Read/write failure on an established connection.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// MBAP header disagrees with the bytes that follow it.
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// The device answered with a Modbus exception reply.
    #[error("{}, function=0x{function:02X}, code=0x{code:02X}", exception_message(*code))]
    Exception { function: u8, code: u8 },

    /// A Write Single Coil reply differed from the request echo.
    #[error("echo mismatch: {}", mismatches.join("; "))]
    EchoMismatch { mismatches: Vec<String> },

    /// A reply failed shape validation (transaction ID, function code, length).
    #[error("invalid response: {}", problems.join("; "))]
    InvalidResponse { problems: Vec<String> },

    /// Slug not in the registry and no matching file on disk.
    #[error("program '{slug}' not found")]
    NotFound { slug: String },

    /// Attempt to load a slug that already exists in the registry.
    #[error("program '{slug}' already exists")]
    Conflict { slug: String },

    /// The operation exceeded its deadline.
    #[error("timed out after {timeout_ms}ms: {message}")]
    Timeout { message: String, timeout_ms: u64 },

    /// Cooperative cancellation surfaced at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// An error annotated with where in a larger operation it occurred
    /// (loop/group/command position, discovery pass).
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<RelayError>,
    },
}

impl RelayError {
    /// Create a validation error.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        RelayError::Validation {
            message: message.into(),
        }
    }

    /// Create a connection error.
    pub fn connection<S: Into<String>>(message: S) -> Self {
        RelayError::Connection {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport<S: Into<String>>(message: S) -> Self {
        RelayError::Transport {
            message: message.into(),
        }
    }

    /// Create a framing error.
    pub fn frame<S: Into<String>>(message: S) -> Self {
        RelayError::Frame {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout<S: Into<String>>(message: S, timeout_ms: u64) -> Self {
        RelayError::Timeout {
            message: message.into(),
            timeout_ms,
        }
    }

    /// Wrap an error with positional context.
    pub fn context<S: Into<String>>(context: S, source: RelayError) -> Self {
        RelayError::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True if this is a Modbus exception with code 0x02 (Illegal Data
    /// Address). The relay-count probe steers its binary search on it.
    pub fn is_illegal_data_address(&self) -> bool {
        match self {
            RelayError::Exception { code, .. } => {
                *code == crate::constants::EXCEPTION_ILLEGAL_DATA_ADDRESS
            }
            RelayError::Context { source, .. } => source.is_illegal_data_address(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Transport {
            message: err.to_string(),
        }
    }
}

/// Human-readable meaning of a Modbus exception code, with the remediation
/// hints relay board vendors tend to bury in their manuals.
pub fn exception_message(code: u8) -> String {
    match code {
        0x01 => "Illegal Function (unsupported operation for this device)".to_string(),
        0x02 => "Illegal Data Address (invalid relay number)".to_string(),
        0x03 => "Illegal Data Value (invalid command)".to_string(),
        0x04 => "Slave Device Failure (device error, try again or reboot)".to_string(),
        0x05 => "Acknowledge (command accepted, still processing)".to_string(),
        0x06 => "Slave Device Busy (try again shortly)".to_string(),
        0x08 => "Memory Parity Error (internal memory/firmware issue)".to_string(),
        0x0A => "Gateway Path Unavailable (network route failed)".to_string(),
        0x0B => "Gateway Target Device Failed to Respond".to_string(),
        other => format!("Unknown error code 0x{other:02X}"),
    }
}
