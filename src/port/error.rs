//! Transport error types.
//!
//! Kept separate from engine-level errors so transports stay independent of
//! the command machinery.

use thiserror::Error;

/// Errors that can occur while talking to the link.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port configuration failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The link is gone; nothing can be written until it is reopened.
    #[error("Link disconnected")]
    Disconnected,

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout(duration)
    }

    /// Whether the error means the link itself is gone rather than a single
    /// write failing.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Disconnected | Self::NotFound(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::PermissionDenied
            ),
            Self::Serial(e) => e.kind() == serialport::ErrorKind::NoDevice,
            Self::Config(_) | Self::Timeout(_) => false,
        }
    }
}
