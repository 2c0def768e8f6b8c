//! Serial port transport.
//!
//! Wraps the `serialport` crate. Writes go through [`Transport`]; reads run
//! on a dedicated thread started with [`SerialTransport::spawn_reader`] that
//! forwards every chunk it receives as a [`LinkEvent`].

use super::error::PortError;
use super::traits::{PortConfiguration, Transport};
use std::io::{Read, Write};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Size of a single read from the port.
const READ_CHUNK: usize = 1024;

/// What the reader thread observed on the link.
#[derive(Debug)]
pub enum LinkEvent {
    /// Bytes received, in arrival order.
    Data(Vec<u8>),
    /// The link failed; the reader thread has stopped.
    Disconnected(PortError),
}

/// Transport writing to a serial port opened through `serialport`.
pub struct SerialTransport {
    /// The underlying serial port implementation.
    port: Box<dyn serialport::SerialPort>,
    /// The port name/path for identification.
    name: String,
}

impl SerialTransport {
    /// Open a serial port with the given configuration.
    ///
    /// # Example
    /// ```no_run
    /// use serial_command_port::port::{PortConfiguration, SerialTransport};
    ///
    /// let port = SerialTransport::open("/dev/ttyUSB0", PortConfiguration::default())?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(port_name: &str, config: PortConfiguration) -> Result<Self, PortError> {
        let port = serialport::new(port_name, config.baud_rate)
            .data_bits(config.data_bits.into())
            .flow_control(config.flow_control.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(config.timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => PortError::not_found(port_name),
                serialport::ErrorKind::InvalidInput => PortError::config(e.to_string()),
                _ => PortError::Serial(e),
            })?;

        tracing::info!(port = %port_name, baud_rate = config.baud_rate, "Opened serial port");
        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }

    /// Start a thread reading from a clone of the port handle.
    ///
    /// Read timeouts are expected and ignored. Any other read error is
    /// reported once as [`LinkEvent::Disconnected`] and ends the thread, as
    /// does the receiving side of `events` being dropped.
    pub fn spawn_reader(
        &self,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<JoinHandle<()>, PortError> {
        let mut reader = self.port.try_clone()?;
        let name = self.name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("serial-reader-{name}"))
            .spawn(move || {
                let mut chunk = [0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => continue,
                        Ok(n) => {
                            tracing::trace!(port = %name, bytes = n, "Read chunk");
                            if events.blocking_send(LinkEvent::Data(chunk[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            tracing::warn!(port = %name, error = %e, "Serial read failed");
                            let _ = events.blocking_send(LinkEvent::Disconnected(PortError::Io(e)));
                            break;
                        }
                    }
                }
                tracing::debug!(port = %name, "Reader thread stopped");
            })?;

        Ok(handle)
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("baud_rate", &self.port.baud_rate().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_not_found_error() {
        let result = SerialTransport::open("/dev/nonexistent_port_12345", PortConfiguration::default());

        match result {
            Err(PortError::NotFound(name)) => assert!(name.contains("nonexistent")),
            Err(other) => assert!(!other.to_string().is_empty()),
            Ok(port) => panic!("Expected an error, opened {:?}", port),
        }
    }

    #[cfg(feature = "hardware-tests")]
    #[test]
    fn test_open_hardware_port() {
        let Ok(name) = std::env::var("SERIAL_COMMAND_TEST_PORT") else {
            return;
        };
        let mut port = SerialTransport::open(&name, PortConfiguration::default()).unwrap();
        assert_eq!(port.name(), name);
        port.send(b"\r\n").unwrap();
    }
}
