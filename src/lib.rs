//! Serial Command Port Library
//!
//! A command/response engine for devices that talk over a serial byte
//! stream. Commands are queued and transmitted according to their operation
//! mode, received bytes are accumulated in a bounded buffer and attributed to
//! the oldest outstanding command whose matcher succeeds, and spontaneous
//! device messages are recognised when no command claims the bytes.
//!
//! # Modules
//!
//! - `command`: Command definitions, argument binding and the named catalog
//! - `matcher`: Pattern, expected-response and fixed-byte-count matching
//! - `messages`: Spontaneous device message recognition
//! - `buffer`: Bounded response buffer
//! - `queue`: Send queue and sent registry
//! - `engine`: The operation-mode state machine
//! - `service`: Tokio task owning the engine, with an async handle
//! - `port`: Transport abstraction (serial port and mock)
//! - `config`: Configuration management with TOML support
//! - `error`: Engine error type

pub mod buffer;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod messages;
pub mod port;
pub mod queue;
pub mod service;

// Re-export commonly used types for convenience
pub use command::{
    Command, CommandArg, CommandCatalog, CommandError, CommandId, MatchSpec, OperationMode,
};
pub use engine::{CommandEngine, EngineEvent, EngineSnapshot, EngineState, OutstandingCommand};
pub use error::{EngineError, EngineResult};
pub use messages::DeviceMessageSet;
pub use port::{MockTransport, PortConfiguration, PortError, SerialTransport, Transport};
pub use service::{EngineHandle, EngineService, ServiceError, ServiceResult};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
