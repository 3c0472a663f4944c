//! Fleet client error types.

use thiserror::Error;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to devices.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection failed or was lost mid-call.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for connect or for a response.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The device sent something that is not a valid response.
    #[error("Invalid response: {0}")]
    Decode(String),

    /// No device with this name in the roster.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device is known but has no live connection.
    #[error("Device not connected: {0}")]
    NotConnected(String),

    /// The device answered with an error status.
    #[error("Device rejected command: {0}")]
    Rejected(String),

    /// Device address could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Local file I/O (e.g. saving a downloaded recording).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether this error means the connection is gone and must be re-established.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Connection(_) | ClientError::Timeout(_) | ClientError::Decode(_)
        )
    }
}
