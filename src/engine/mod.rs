//! The command engine.
//!
//! [`CommandEngine`] ties the send queue, the response buffer, the matcher
//! and the device message recognizer together. It is a synchronous state
//! machine: every call runs to completion, collects the resulting
//! [`EngineEvent`]s and returns. It never reads from the link and owns no
//! thread or timer of its own; received bytes, link loss and timer expiry are
//! pushed in by the owner (see [`crate::service`]).
//!
//! # Example
//!
//! ```
//! use serial_command_port::command::{Command, MatchSpec, OperationMode};
//! use serial_command_port::config::EngineConfig;
//! use serial_command_port::engine::{CommandEngine, EngineEvent};
//! use serial_command_port::messages::DeviceMessageSet;
//! use serial_command_port::port::MockTransport;
//! use std::sync::Arc;
//!
//! let link = MockTransport::new("MOCK0");
//! let mut engine = CommandEngine::new(
//!     Box::new(link.clone()),
//!     &EngineConfig::default(),
//!     DeviceMessageSet::new(),
//! );
//!
//! let ping = Arc::new(Command::new(
//!     "PING",
//!     "PING\r\n",
//!     OperationMode::Blocking,
//!     Some(MatchSpec::expected_responses(["PONG\r\n"]).unwrap()),
//! ).unwrap());
//!
//! let id = engine.submit(ping, vec![]).unwrap();
//! assert_eq!(link.written_text(), vec!["PING\r\n"]);
//!
//! engine.bytes_received(b"PONG\r\n");
//! let matched = engine
//!     .take_events()
//!     .into_iter()
//!     .any(|e| matches!(e, EngineEvent::ResponseMatched { id: m, .. } if m == id));
//! assert!(matched);
//! ```

mod event;

pub use event::EngineEvent;

use crate::buffer::ResponseBuffer;
use crate::command::{Command, CommandArg, CommandId, OperationMode, PendingCommand, SentCommand};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::matcher::find_match;
use crate::messages::DeviceMessageSet;
use crate::port::{PortError, Transport};
use crate::queue::CommandQueue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Connection-level state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Queued commands are transmitted as they become eligible.
    Idle,
    /// A Blocking command is outstanding; nothing else is transmitted.
    AwaitingBlockingResponse,
    /// The link is gone; submissions are rejected until reconnected.
    Disconnected,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::AwaitingBlockingResponse => "awaiting_blocking_response",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Read-only view of the engine for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub bypass: bool,
    pub link: String,
    pub queued: usize,
    pub sent: usize,
    pub buffered_bytes: usize,
    /// Sent commands still awaiting a response, oldest first.
    pub outstanding: Vec<OutstandingCommand>,
}

/// A sent command as reported by [`EngineSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutstandingCommand {
    pub id: CommandId,
    pub command: String,
    pub mode: OperationMode,
    pub sent_at: DateTime<Utc>,
}

/// Command/response state machine over a byte-stream transport.
pub struct CommandEngine {
    transport: Box<dyn Transport>,
    queue: CommandQueue,
    buffer: ResponseBuffer,
    messages: DeviceMessageSet,
    disconnected: bool,
    bypass: bool,
    next_id: u64,
    events: Vec<EngineEvent>,
}

impl CommandEngine {
    pub fn new(
        transport: Box<dyn Transport>,
        config: &EngineConfig,
        messages: DeviceMessageSet,
    ) -> Self {
        Self {
            transport,
            queue: CommandQueue::new(config.send_queue_capacity),
            buffer: ResponseBuffer::new(config.response_buffer_capacity),
            messages,
            disconnected: false,
            bypass: false,
            next_id: 1,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        if self.disconnected {
            EngineState::Disconnected
        } else if self.queue.blocking_outstanding() {
            EngineState::AwaitingBlockingResponse
        } else {
            EngineState::Idle
        }
    }

    pub fn is_bypass(&self) -> bool {
        self.bypass
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn buffer(&self) -> &ResponseBuffer {
        &self.buffer
    }

    pub fn device_messages(&self) -> &DeviceMessageSet {
        &self.messages
    }

    /// Drain the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Validate `command` with `args`, queue it and transmit whatever is
    /// eligible.
    ///
    /// In bypass mode the payload is written immediately instead and no
    /// outcome will ever be reported for it.
    pub fn submit(
        &mut self,
        command: Arc<Command>,
        args: Vec<CommandArg>,
    ) -> EngineResult<CommandId> {
        if self.disconnected {
            return Err(EngineError::Disconnected);
        }
        command.validate()?;
        command.check_args(&args)?;

        let id = self.allocate_id();
        let pending = PendingCommand::new(id, command, args);

        if self.bypass {
            let payload = pending.encode()?;
            tracing::debug!(command = %pending.name(), %id, "Bypass write");
            self.write(&payload)?;
            return Ok(id);
        }

        if let Err(err) = self.queue.enqueue(pending) {
            tracing::warn!(error = %err, "Rejecting submission");
            self.events.push(EngineEvent::SendQueueTooLarge {
                capacity: self.queue.capacity(),
            });
            return Err(err.into());
        }
        tracing::trace!(%id, queued = self.queue.to_send_len(), "Command queued");

        self.dispatch();
        Ok(id)
    }

    /// Feed bytes read from the link.
    pub fn bytes_received(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.disconnected {
            tracing::debug!(len = bytes.len(), "Ignoring bytes received while disconnected");
            return;
        }
        if self.bypass {
            self.events.push(EngineEvent::RawData {
                bytes: bytes.to_vec(),
            });
            return;
        }

        if let Err(overflow) = self.buffer.append(bytes) {
            tracing::warn!(
                attempted = overflow.attempted,
                capacity = overflow.capacity,
                "Response buffer overflow, cleared"
            );
            self.events.push(EngineEvent::ResponsesBufferTooLarge {
                attempted: overflow.attempted,
                capacity: overflow.capacity,
            });
            return;
        }

        while self.analyze() {}
    }

    /// One analysis pass: attribute the buffer to the oldest sent command
    /// whose matcher succeeds, or failing that to a device message.
    /// Returns whether anything was consumed.
    fn analyze(&mut self) -> bool {
        let view = self.buffer.as_view();
        if view.is_empty() {
            return false;
        }

        let matched = self.queue.sent().find_map(|sent| {
            let spec = sent.command().match_spec()?;
            find_match(view, spec).map(|m| (sent.id(), m))
        });

        if let Some((id, m)) = matched {
            self.buffer.consume_through(m.span.end - 1);
            self.resolve_match(id, m.bytes);
            return true;
        }

        if let Some(found) = self.messages.find_message(view) {
            self.buffer.consume_through(found.span.end - 1);
            tracing::debug!(translation = %found.translation, "Device message received");
            self.events.push(EngineEvent::MessageReceived {
                message: found.message,
                translation: found.translation,
            });
            return true;
        }

        false
    }

    fn resolve_match(&mut self, id: CommandId, response: Vec<u8>) {
        let Some(sent) = self.queue.get_sent(id) else {
            return;
        };
        let command = sent.name().to_string();
        let args = sent.args().to_vec();
        let mode = sent.mode();

        // PushFlux entries stay registered
        self.queue.remove_matched(id);
        tracing::debug!(%command, %id, len = response.len(), "Response matched");
        self.events.push(EngineEvent::ResponseMatched {
            id,
            command,
            args,
            response,
        });

        if mode == OperationMode::Blocking {
            self.dispatch();
        }
    }

    /// Fire the timer of the sent command `id`. Unknown, already resolved
    /// and timer-less commands are ignored.
    pub fn on_timer(&mut self, id: CommandId) {
        let armed = self
            .queue
            .get_sent(id)
            .is_some_and(|sent| sent.deadline().is_some());
        if !armed {
            return;
        }
        let Some(sent) = self.queue.remove_sent(id) else {
            return;
        };

        tracing::warn!(command = %sent.name(), %id, "Command timed out");
        self.events.push(EngineEvent::CommandTimedOut {
            id,
            command: sent.name().to_string(),
            args: sent.args().to_vec(),
        });
        self.dispatch();
    }

    /// Fire every timer due at `now`, earliest deadline first.
    pub fn poll_timeouts(&mut self, now: Instant) {
        for id in self.queue.expired(now) {
            self.on_timer(id);
        }
    }

    /// Earliest armed timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// The link dropped: discard every queued and sent command and the
    /// buffered bytes. Reported once.
    pub fn on_disconnected(&mut self) {
        if self.disconnected {
            return;
        }
        let (to_send, sent) = self.queue.clear_all();
        self.buffer.clear();
        self.disconnected = true;
        tracing::warn!(
            link = %self.transport.name(),
            dropped_queued = to_send.len(),
            dropped_sent = sent.len(),
            "Link disconnected"
        );
        self.events.push(EngineEvent::Disconnected);
    }

    /// Resume on a new transport with empty state. Commands dropped by the
    /// disconnect are not replayed.
    pub fn reconnect(&mut self, transport: Box<dyn Transport>) {
        let (to_send, sent) = self.queue.clear_all();
        self.cancel_all(to_send, sent);
        self.buffer.clear();
        self.transport = transport;
        self.disconnected = false;
        tracing::info!(link = %self.transport.name(), "Link reconnected");
    }

    /// Enable or disable bypass mode. Any change clears the response buffer.
    pub fn set_bypass_mode(&mut self, enabled: bool) {
        if self.bypass == enabled {
            return;
        }
        self.bypass = enabled;
        self.buffer.clear();
        tracing::info!(enabled, "Bypass mode changed");
        self.events.push(EngineEvent::BypassModeChanged { enabled });
        if !enabled {
            self.dispatch();
        }
    }

    pub fn set_device_messages(&mut self, messages: DeviceMessageSet) {
        tracing::debug!(count = messages.len(), "Device messages configured");
        self.messages = messages;
    }

    /// Cancel the most recently sent command.
    pub fn remove_last_sent(&mut self) -> Option<CommandId> {
        let sent = self.queue.remove_last_sent()?;
        let id = sent.id();
        self.cancel_all(Vec::new(), vec![sent]);
        self.dispatch();
        Some(id)
    }

    /// Cancel the command at the head of the send queue.
    pub fn remove_first_to_send(&mut self) -> Option<CommandId> {
        let pending = self.queue.remove_first_to_send()?;
        let id = pending.id();
        self.cancel_all(vec![pending], Vec::new());
        self.dispatch();
        Some(id)
    }

    /// Drop every queued and sent command and the buffered bytes.
    pub fn clear_all(&mut self) {
        let (to_send, sent) = self.queue.clear_all();
        self.cancel_all(to_send, sent);
        self.buffer.clear();
    }

    /// Write raw bytes to the link. Only allowed in bypass mode.
    pub fn send_raw(&mut self, bytes: &[u8]) -> EngineResult<()> {
        if self.disconnected {
            return Err(EngineError::Disconnected);
        }
        if !self.bypass {
            return Err(EngineError::NotInBypass);
        }
        self.write(bytes)?;
        Ok(())
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state(),
            bypass: self.bypass,
            link: self.transport.name().to_string(),
            queued: self.queue.to_send_len(),
            sent: self.queue.sent_len(),
            buffered_bytes: self.buffer.len(),
            outstanding: self
                .queue
                .sent()
                .map(|s| OutstandingCommand {
                    id: s.id(),
                    command: s.name().to_string(),
                    mode: s.mode(),
                    sent_at: s.sent_at(),
                })
                .collect(),
        }
    }

    /// Write to the transport. A write error showing the link itself is
    /// gone also takes the engine to Disconnected.
    fn write(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        let result = self.transport.send(bytes);
        if let Err(err) = &result {
            if err.is_fatal() {
                self.on_disconnected();
            }
        }
        result
    }

    fn allocate_id(&mut self) -> CommandId {
        let id = CommandId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn cancel_all(&mut self, to_send: Vec<PendingCommand>, sent: Vec<SentCommand>) {
        let cancelled = to_send
            .iter()
            .map(|p| (p.id(), p.name()))
            .chain(sent.iter().map(|s| (s.id(), s.name())));
        for (id, name) in cancelled {
            tracing::debug!(command = %name, %id, "Command cancelled");
            self.events.push(EngineEvent::CommandCancelled {
                id,
                command: name.to_string(),
            });
        }
    }

    /// Transmit queued commands until the queue is empty, its head must
    /// wait, or a Blocking command is outstanding.
    fn dispatch(&mut self) {
        if self.disconnected || self.bypass {
            return;
        }
        loop {
            if self.queue.blocking_outstanding() {
                break;
            }
            let Some(sent) = self.queue.try_transmit_next(Instant::now()) else {
                break;
            };
            let id = sent.id();
            let name = sent.name().to_string();

            let written = match sent.pending().encode() {
                Ok(payload) => self.transport.send(&payload).map_err(EngineError::from),
                Err(e) => Err(EngineError::from(e)),
            };
            if let Err(err) = written {
                tracing::warn!(command = %name, %id, error = %err, "Failed to send command");
                self.events.push(EngineEvent::SendFailed {
                    id,
                    command: name,
                    error: err.to_string(),
                });
                // Reported after SendFailed so waiters see the write error
                if matches!(&err, EngineError::Transport(port) if port.is_fatal()) {
                    self.on_disconnected();
                    break;
                }
                continue;
            }

            tracing::debug!(command = %name, %id, mode = %sent.mode(), "Command sent");
            self.events.push(EngineEvent::CommandSent {
                id,
                command: name.clone(),
            });

            for stopped in self.queue.stop_push_streams(&name) {
                tracing::debug!(command = %stopped.name(), id = %stopped.id(), "Push stream stopped");
                self.events.push(EngineEvent::StreamStopped {
                    id: stopped.id(),
                    command: stopped.name().to_string(),
                });
            }

            self.queue.register_sent(sent);
        }
    }
}

impl fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEngine")
            .field("transport", &self.transport)
            .field("state", &self.state())
            .field("bypass", &self.bypass)
            .field("queued", &self.queue.to_send_len())
            .field("sent", &self.queue.sent_len())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
