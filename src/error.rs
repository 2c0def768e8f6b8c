use crate::command::CommandError;
use crate::port::PortError;
use crate::queue::QueueError;
use thiserror::Error;

/// A specialized `Result` type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned synchronously by the command engine.
///
/// Everything that happens after a command was accepted (matches, timeouts,
/// overflow, send failures) is reported as an
/// [`EngineEvent`](crate::engine::EngineEvent) instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The command or its arguments are invalid.
    #[error("Malformed command: {0}")]
    MalformedCommand(#[from] CommandError),

    /// The send queue is at capacity; the command was not admitted.
    #[error("Send queue is full ({capacity} commands waiting)")]
    SendQueueFull { capacity: usize },

    /// The link is down; nothing can be submitted until it is reconnected.
    #[error("Link is disconnected")]
    Disconnected,

    /// Raw writes are only available in bypass mode.
    #[error("Raw writes require bypass mode")]
    NotInBypass,

    /// A direct write to the transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] PortError),
}

impl From<QueueError> for EngineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::CapacityExceeded { capacity } => Self::SendQueueFull { capacity },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::SendQueueFull { capacity: 150 };
        assert_eq!(err.to_string(), "Send queue is full (150 commands waiting)");

        let err = EngineError::from(CommandError::ZeroByteCount);
        assert!(err.to_string().starts_with("Malformed command:"));
    }

    #[test]
    fn test_from_queue_error() {
        let err = EngineError::from(QueueError::CapacityExceeded { capacity: 3 });
        assert!(matches!(err, EngineError::SendQueueFull { capacity: 3 }));
    }
}
