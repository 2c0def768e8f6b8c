//! Bounded accumulator for received bytes.

use thiserror::Error;

/// Default retained byte count before the buffer is considered overflowed.
pub const DEFAULT_RESPONSE_BUFFER_CAPACITY: usize = 15_000;

/// Raised when an append would take the buffer past its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Response buffer overflow: {attempted} bytes exceed capacity of {capacity}")]
pub struct BufferOverflow {
    /// Length the buffer would have reached.
    pub attempted: usize,
    pub capacity: usize,
}

/// Append-only byte accumulator trimmed from the front as responses are
/// consumed. Its length never exceeds `capacity`.
#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ResponseBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }

    /// Append `bytes` to the tail.
    ///
    /// On overflow the buffer is cleared entirely, the incoming bytes are
    /// dropped with it and the overflow is reported. Partial frames cannot be
    /// trusted after that point, so matching restarts from an empty buffer.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferOverflow> {
        let attempted = self.data.len() + bytes.len();
        if attempted > self.capacity {
            self.data.clear();
            return Err(BufferOverflow {
                attempted,
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Remove bytes `[0, end_index]` inclusive. Indices past the end clear
    /// the buffer.
    pub fn consume_through(&mut self, end_index: usize) {
        let end = end_index.saturating_add(1).min(self.data.len());
        self.data.drain(..end);
    }

    pub fn as_view(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_BUFFER_CAPACITY)
    }
}
