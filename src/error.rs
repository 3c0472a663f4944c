//! Custom error types for the application.
//!
//! This module defines the primary error type, `SentryError`, for the device side of the
//! system. Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the kinds of errors that can occur, from configuration issues to camera and
//! recording failures.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically related to file parsing or
//!   type mismatches in the configuration sources.
//! - **`Configuration`**: Semantic errors in the configuration that pass parsing but are
//!   logically incorrect (e.g. zero workers). Caught during the validation step.
//! - **`Io`**: Wraps standard `std::io::Error`, covering file and socket I/O issues.
//! - **`Hardware`**: Camera or actuator failures. A camera that cannot be opened at start
//!   is the only failure escalated out of the capture loop.
//! - **`Detection`**: The external detector failed or speaks an unsupported label schema.
//! - **`Recording`**: The recording writer could not be opened or written.
//! - **`Protocol`**: A wire-level framing or decoding failure (see [`ProtocolError`]).
//!
//! Fleet-side call failures use their own type, [`crate::fleet::ClientError`].

use crate::network::protocol::ProtocolError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SentryError>;

/// Errors surfaced by the device daemon and the controller binary.
#[derive(Error, Debug)]
pub enum SentryError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<figment::Error> for SentryError {
    fn from(value: figment::Error) -> Self {
        SentryError::Config(Box::new(value))
    }
}

impl SentryError {
    /// Whether the component that raised this error may keep running.
    ///
    /// Only hardware failures at start-up and configuration problems are fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SentryError::Config(_) | SentryError::Configuration(_) | SentryError::Hardware(_)
        )
    }
}
