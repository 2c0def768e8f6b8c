//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_COMMAND";

/// Config file name
const CONFIG_FILE_NAME: &str = "serial-command.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_COMMAND_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_COMMAND_CONFIG` environment variable (explicit path)
    /// 2. `./serial-command.toml` (current directory)
    /// 3. `serial-command.toml` in the platform config directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override values from the file. The result is
    /// validated before it is returned.
    pub fn load() -> ConfigResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(ConfigError::NotFound(path));
            }
        }

        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            tracing::debug!(path = %path.display(), "Loading configuration");
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        if let Err(e) = apply_env_overrides(&mut config) {
            tracing::warn!(error = %e, "Ignoring invalid environment override");
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    if let Some(app_config) = get_default_config_path() {
        if app_config.exists() {
            return Some(app_config);
        }
    }

    // 4. No config file found - will use defaults
    None
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

fn env_var(key: &str) -> Option<(String, String)> {
    let var = format!("{ENV_PREFIX}_{key}");
    std::env::var(&var).ok().map(|val| (var, val))
}

fn parse_env<T: FromStr>(var: &str, val: &str, what: &str) -> ConfigResult<T> {
    val.trim()
        .parse()
        .map_err(|_| ConfigError::env_parse(var, format!("Invalid {what}: '{val}'")))
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_COMMAND_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_COMMAND_SERIAL_PORT=/dev/ttyACM0`
/// - `SERIAL_COMMAND_SERIAL_BAUD_RATE=115200`
/// - `SERIAL_COMMAND_ENGINE_SEND_QUEUE_CAPACITY=32`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Engine overrides
    if let Some((var, val)) = env_var("ENGINE_SEND_QUEUE_CAPACITY") {
        config.engine.send_queue_capacity = parse_env(&var, &val, "capacity")?;
    }
    if let Some((var, val)) = env_var("ENGINE_RESPONSE_BUFFER_CAPACITY") {
        config.engine.response_buffer_capacity = parse_env(&var, &val, "capacity")?;
    }
    if let Some((var, val)) = env_var("ENGINE_CHANNEL_CAPACITY") {
        config.engine.channel_capacity = parse_env(&var, &val, "capacity")?;
    }

    // Serial overrides
    if let Some((_, val)) = env_var("SERIAL_PORT") {
        config.serial.port = Some(val);
    }
    if let Some((var, val)) = env_var("SERIAL_BAUD_RATE") {
        config.serial.line.baud_rate = parse_env(&var, &val, "baud rate")?;
    }
    if let Some((var, val)) = env_var("SERIAL_TIMEOUT_MS") {
        let ms: u64 = parse_env(&var, &val, "timeout")?;
        config.serial.line.timeout = std::time::Duration::from_millis(ms);
    }

    // Logging overrides
    if let Some((_, val)) = env_var("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    if let Some((var, val)) = env_var("LOGGING_FORMAT") {
        config.logging.format = match val.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => return Err(ConfigError::env_parse(var, format!("Unknown log format '{val}'"))),
        };
    }

    Ok(())
}

/// Get the default config directory for creating new config files.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-command").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().engine.send_queue_capacity, 150);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("SERIAL_COMMAND_SERIAL_BAUD_RATE", "57600");
        env::set_var("SERIAL_COMMAND_SERIAL_PORT", "COM9");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.line.baud_rate, 57600);
        assert_eq!(loader.config().serial.port.as_deref(), Some("COM9"));

        // Clean up
        env::remove_var("SERIAL_COMMAND_SERIAL_BAUD_RATE");
        env::remove_var("SERIAL_COMMAND_SERIAL_PORT");
    }

    #[test]
    #[serial]
    fn test_invalid_env_override() {
        env::set_var("SERIAL_COMMAND_ENGINE_SEND_QUEUE_CAPACITY", "lots");
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config).unwrap_err();
        env::remove_var("SERIAL_COMMAND_ENGINE_SEND_QUEUE_CAPACITY");

        assert!(matches!(err, ConfigError::EnvParseError { .. }));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [engine]
            response_buffer_capacity = 64

            [commands.PING]
            payload = "PING\r\n"
            response = {{ type = "expected", responses = ["PONG\r\n"] }}
            "#
        )
        .unwrap();

        let loader = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(loader.config().engine.response_buffer_capacity, 64);
        assert!(loader.config().commands.contains_key("PING"));
        assert_eq!(loader.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    #[serial]
    fn test_load_from_missing_file() {
        let err = ConfigLoader::load_from("/nonexistent/serial-command.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    #[serial]
    fn test_explicit_path_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nformat = \"json\"").unwrap();
        env::set_var(CONFIG_PATH_ENV, file.path());

        let result = ConfigLoader::load();
        env::remove_var(CONFIG_PATH_ENV);

        let loader = result.unwrap();
        assert_eq!(loader.config().logging.format, LogFormat::Json);
    }
}
