//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::buffer::DEFAULT_RESPONSE_BUFFER_CAPACITY;
use crate::command::{Command, CommandError, MatchSpec, OperationMode};
use crate::messages::DeviceMessageSet;
use crate::port::PortConfiguration;
use crate::queue::DEFAULT_SEND_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine capacities
    pub engine: EngineConfig,
    /// Serial port configuration
    pub serial: SerialConfig,
    /// Spontaneous messages the device may emit
    pub device_messages: DeviceMessagesConfig,
    /// Named commands, keyed by name
    pub commands: BTreeMap<String, CommandDef>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.send_queue_capacity == 0 {
            return Err(ConfigError::validation(
                "engine.send_queue_capacity",
                "must be greater than zero",
            ));
        }
        if self.engine.response_buffer_capacity == 0 {
            return Err(ConfigError::validation(
                "engine.response_buffer_capacity",
                "must be greater than zero",
            ));
        }
        if self.engine.channel_capacity == 0 {
            return Err(ConfigError::validation(
                "engine.channel_capacity",
                "must be greater than zero",
            ));
        }
        if self.serial.line.baud_rate == 0 {
            return Err(ConfigError::validation("serial.baud_rate", "must be greater than zero"));
        }
        for (name, def) in &self.commands {
            if let Some(stop) = &def.stop_command {
                if !self.commands.contains_key(stop) {
                    return Err(ConfigError::validation(
                        format!("commands.{name}.stop_command"),
                        format!("unknown command '{stop}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Device message set described by `[device_messages]`.
    pub fn device_message_set(&self) -> DeviceMessageSet {
        self.device_messages.to_set()
    }
}

/// Engine configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of commands waiting to be written
    pub send_queue_capacity: usize,
    /// Maximum number of received bytes kept while looking for responses
    pub response_buffer_capacity: usize,
    /// Bound of the request and event channels of the engine service
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            response_buffer_capacity: DEFAULT_RESPONSE_BUFFER_CAPACITY,
            channel_capacity: 256,
        }
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name or path; commands that need a link fail without one
    pub port: Option<String>,
    /// Line settings, inlined in the same table
    #[serde(flatten)]
    pub line: PortConfiguration,
}

/// A `{ message, translation }` entry of `[device_messages]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMessageDef {
    pub message: String,
    #[serde(default)]
    pub translation: String,
}

/// Device message configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMessagesConfig {
    /// Stripped from messages when they are displayed
    pub terminator: String,
    pub messages: Vec<DeviceMessageDef>,
}

impl Default for DeviceMessagesConfig {
    fn default() -> Self {
        Self {
            terminator: "\r\n".to_string(),
            messages: Vec::new(),
        }
    }
}

impl DeviceMessagesConfig {
    pub fn to_set(&self) -> DeviceMessageSet {
        let mut set = DeviceMessageSet::new().with_terminator(self.terminator.as_bytes());
        for def in &self.messages {
            set.insert(def.message.as_bytes(), def.translation.clone());
        }
        set
    }
}

/// A `[commands.<name>]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDef {
    /// Payload template; `{0}`, `{1}`, ... are replaced by arguments
    pub payload: String,
    #[serde(default = "default_mode")]
    pub mode: OperationMode,
    /// Response timeout for blocking and pull commands
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Name of the command that ends a push stream
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub response: Option<ResponseDef>,
}

fn default_mode() -> OperationMode {
    OperationMode::Blocking
}

impl CommandDef {
    /// Build and validate the command registered as `name`.
    pub fn build(&self, name: &str) -> Result<Command, CommandError> {
        let spec = self.response.as_ref().map(ResponseDef::to_spec).transpose()?;
        let mut command = Command::new(name, self.payload.clone(), self.mode, spec)?;
        if let Some(ms) = self.timeout_ms {
            command = command.with_timeout(Duration::from_millis(ms));
        }
        if let Some(stop) = &self.stop_command {
            command = command.with_stop_command(stop.clone());
        }
        Ok(command)
    }
}

/// Response matcher of a command, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseDef {
    /// Regular expression over the received bytes
    Pattern { regex: String },
    /// Any of the listed responses
    Expected { responses: Vec<String> },
    /// A fixed number of bytes
    Bytes { count: usize },
}

impl ResponseDef {
    pub fn to_spec(&self) -> Result<MatchSpec, CommandError> {
        match self {
            Self::Pattern { regex } => MatchSpec::pattern(regex),
            Self::Expected { responses } => {
                MatchSpec::expected_responses(responses.iter().map(String::as_bytes))
            }
            Self::Bytes { count } => MatchSpec::fixed_byte_count(*count),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Parity;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.send_queue_capacity, 150);
        assert_eq!(config.engine.response_buffer_capacity, 15_000);
        assert_eq!(config.serial.line.baud_rate, 9600);
        assert!(config.commands.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[serial]"));
        assert!(toml_str.contains("baud_rate"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [engine]
            send_queue_capacity = 10

            [serial]
            port = "/dev/ttyUSB0"
            baud_rate = 115200
            parity = "odd"

            [device_messages]
            messages = [
                { message = "ALARM\r\n", translation = "Alarm raised" },
                { message = "READY\r\n" },
            ]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.send_queue_capacity, 10);
        // Defaults should still work
        assert_eq!(config.engine.response_buffer_capacity, 15_000);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.serial.line.baud_rate, 115200);
        assert_eq!(config.serial.line.parity, Parity::Odd);

        let set = config.device_message_set();
        assert_eq!(set.len(), 2);
        assert_eq!(set.translation(b"READY\r\n").as_deref(), Some("READY"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.engine.response_buffer_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("engine.response_buffer_capacity"));
    }

    #[test]
    fn test_validate_rejects_unknown_stop_command() {
        let config: Config = toml::from_str(
            r#"
            [commands.START]
            payload = "GO\n"
            mode = "push_flux"
            stop_command = "HALT"
            response = { type = "bytes", count = 2 }
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_command_def_build() {
        let def = CommandDef {
            payload: "V?\n".to_string(),
            mode: OperationMode::PullFlux,
            timeout_ms: Some(500),
            stop_command: None,
            response: Some(ResponseDef::Expected {
                responses: vec!["V=1\n".to_string(), "V=0\n".to_string()],
            }),
        };
        let command = def.build("VERSION").unwrap();
        assert_eq!(command.name(), "VERSION");
        assert_eq!(command.timer_duration(), Some(Duration::from_millis(500)));
        assert_eq!(command.match_spec().map(MatchSpec::kind), Some("expected"));
    }
}
