//! In-memory transport for testing.
//!
//! Provides a `MockTransport` that records every write without requiring
//! actual hardware. Clones share their state, so a test can hand one clone
//! to the engine and inspect the traffic through another.

use super::error::PortError;
use super::traits::Transport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Inner state of the mock transport, shared between clones.
#[derive(Debug, Default)]
struct MockTransportState {
    /// Log of all payloads written to the link.
    write_log: Vec<Vec<u8>>,
    /// Expected write operations (for verification).
    expected_writes: VecDeque<Vec<u8>>,
    /// Errors returned by upcoming writes, oldest first.
    failures: VecDeque<PortError>,
}

/// Mock transport implementation for testing.
///
/// # Example
/// ```
/// use serial_command_port::port::{MockTransport, Transport};
///
/// let mock = MockTransport::new("MOCK0");
/// let mut link = mock.clone();
///
/// link.send(b"PING\r\n").unwrap();
///
/// assert_eq!(mock.get_write_log(), vec![b"PING\r\n".to_vec()]);
/// ```
#[derive(Clone)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    /// Create a new mock transport with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockTransportState::default())),
        }
    }

    /// Expect a specific write operation.
    ///
    /// Use `verify_expectations()` to check that all expected writes occurred.
    pub fn expect_write(&self, data: &[u8]) {
        self.state.lock().expected_writes.push_back(data.to_vec());
    }

    /// Verify that all expected writes have occurred in order.
    pub fn verify_expectations(&self) -> Result<(), String> {
        let state = self.state.lock();
        if !state.expected_writes.is_empty() {
            return Err(format!(
                "Expected {} more write(s), but none occurred",
                state.expected_writes.len()
            ));
        }
        Ok(())
    }

    /// Make the next write fail with `error`. Queued failures are consumed
    /// one per write.
    pub fn fail_next_send(&self, error: PortError) {
        self.state.lock().failures.push_back(error);
    }

    /// Get a copy of all data written to the link.
    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Writes rendered as lossy text, convenient for assertions.
    pub fn written_text(&self) -> Vec<String> {
        self.state
            .lock()
            .write_log
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Clear the write log.
    pub fn clear_write_log(&self) {
        self.state.lock().write_log.clear();
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().write_log.len()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), PortError> {
        let mut state = self.state.lock();

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        if let Some(expected) = state.expected_writes.pop_front() {
            if expected != data {
                return Err(PortError::config(format!(
                    "Expected write: {:?}, got: {:?}",
                    expected, data
                )));
            }
        }

        state.write_log.push(data.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("name", &self.name)
            .field("writes", &self.write_count())
            .finish()
    }
}
