//! Command definition errors.

use super::OperationMode;
use thiserror::Error;

/// Errors raised while building a command or binding arguments to it.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The response pattern is not a valid regular expression.
    #[error("Invalid response pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The response pattern accepts the empty string, so it would match
    /// before any byte arrives.
    #[error("Response pattern '{0}' matches the empty string")]
    EmptyPatternMatch(String),

    /// An expected-responses matcher was declared without any candidate.
    #[error("Expected responses set is empty")]
    EmptyExpectedResponses,

    /// One of the expected responses is an empty byte sequence.
    #[error("Expected response #{0} is empty")]
    EmptyExpectedResponse(usize),

    /// A fixed byte count matcher was declared with a count of zero.
    #[error("Fixed byte count must be greater than zero")]
    ZeroByteCount,

    /// The command waits for a response but has no way to recognise it.
    #[error("Command '{name}' uses {mode} mode but has no response matcher")]
    MissingMatcher { name: String, mode: OperationMode },

    /// No command with this name is registered in the catalog.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The payload template references an argument that was not supplied.
    #[error("Command '{name}' needs {required} argument(s), got {provided}")]
    MissingArgument {
        name: String,
        required: usize,
        provided: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CommandError::ZeroByteCount.to_string(),
            "Fixed byte count must be greater than zero"
        );

        let err = CommandError::EmptyPatternMatch("a*".to_string());
        assert_eq!(
            err.to_string(),
            "Response pattern 'a*' matches the empty string"
        );

        let err = CommandError::MissingMatcher {
            name: "READ".to_string(),
            mode: OperationMode::Blocking,
        };
        assert_eq!(
            err.to_string(),
            "Command 'READ' uses blocking mode but has no response matcher"
        );

        let err = CommandError::MissingArgument {
            name: "SET".to_string(),
            required: 2,
            provided: 1,
        };
        assert_eq!(err.to_string(), "Command 'SET' needs 2 argument(s), got 1");
    }
}
