//! Error types and result definitions for the rustkasa crate.
//! Covers the transport failure taxonomy and conversion from standard IO/JSON errors.

use thiserror::Error;

/// Represents all possible errors that can occur when communicating with a Kasa device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KasaError {
    /// TCP connection could not be established (refused, unroutable, or connect timeout)
    #[error("Connection to {0} failed: {1}")]
    ConnectFailed(String, String),

    /// Fewer than 4 length-header bytes arrived before the stream ended or timed out
    #[error("Short header: response ended before the 4-byte length prefix")]
    ShortHeader,

    /// The stream stalled or ended before the full response body arrived
    #[error("Short body: expected {expected} bytes, received {received}")]
    ShortBody { expected: usize, received: usize },

    /// Standard IO error (write failure, connection reset, etc.)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// The device returned a nonzero error code for a command
    #[error("Device rejected command (err_code {0})")]
    DeviceRejected(String),

    /// The device session is disabled; no network I/O was attempted
    #[error("Device is disabled")]
    Disabled,

    /// Device ID already exists in manager
    #[error("Device ID '{0}' already exists")]
    DuplicateDevice(String),

    /// Device ID not found in manager
    #[error("Device ID '{0}' not found")]
    DeviceNotFound(String),
}

/// A specialized Result type for Kasa operations.
pub type Result<T> = std::result::Result<T, KasaError>;

impl From<std::io::Error> for KasaError {
    fn from(err: std::io::Error) -> Self {
        KasaError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for KasaError {
    fn from(err: serde_json::Error) -> Self {
        KasaError::Json(err.to_string())
    }
}

impl KasaError {
    /// True for wire-level failures where the next scheduled poll is the retry path.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            KasaError::ConnectFailed(_, _)
                | KasaError::ShortHeader
                | KasaError::ShortBody { .. }
                | KasaError::Io(_)
        )
    }
}
