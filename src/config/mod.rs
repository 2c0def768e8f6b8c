//! Configuration module for serial-command.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_COMMAND_CONFIG` environment variable (explicit path)
//! 2. `./serial-command.toml` (current directory)
//! 3. `serial-command.toml` in the platform config directory
//!    (`~/.config/serial-command/` on Linux)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is: `SERIAL_COMMAND_<SECTION>_<KEY>`
//!
//! Examples:
//! - `SERIAL_COMMAND_SERIAL_PORT=/dev/ttyUSB0`
//! - `SERIAL_COMMAND_SERIAL_BAUD_RATE=115200`
//! - `SERIAL_COMMAND_LOGGING_FORMAT=json`
//!
//! # Example
//!
//! ```toml
//! [engine]
//! send_queue_capacity = 150
//! response_buffer_capacity = 15000
//!
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [device_messages]
//! terminator = "\r\n"
//! messages = [{ message = "ALARM\r\n", translation = "Device alarm" }]
//!
//! [commands.VERSION]
//! payload = "VER?\r\n"
//! mode = "blocking"
//! timeout_ms = 500
//! response = { type = "pattern", regex = "VER [0-9.]+\r\n" }
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{
    CommandDef, Config, DeviceMessageDef, DeviceMessagesConfig, EngineConfig, LogFormat,
    LoggingConfig, ResponseDef, SerialConfig,
};
