//! Outcomes reported by the engine.

use crate::command::{CommandArg, CommandId};
use serde::Serialize;
use std::fmt;

/// Something the application should hear about.
///
/// Events are produced while the engine handles a call and collected until
/// [`CommandEngine::take_events`](super::CommandEngine::take_events).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A response was attributed to a sent command.
    ResponseMatched {
        id: CommandId,
        command: String,
        args: Vec<CommandArg>,
        response: Vec<u8>,
    },
    /// A known spontaneous device message was recognised.
    MessageReceived { message: Vec<u8>, translation: String },
    /// A Blocking or PullFlux command got no response in time.
    CommandTimedOut {
        id: CommandId,
        command: String,
        args: Vec<CommandArg>,
    },
    /// The response buffer overflowed and was cleared.
    ResponsesBufferTooLarge { attempted: usize, capacity: usize },
    /// A submission was rejected because the send queue is full.
    SendQueueTooLarge { capacity: usize },
    /// A command was written to the link.
    CommandSent { id: CommandId, command: String },
    /// Writing a command failed; the command was dropped.
    SendFailed {
        id: CommandId,
        command: String,
        error: String,
    },
    /// A PushFlux command was removed because its stop command was sent.
    StreamStopped { id: CommandId, command: String },
    /// A queued or sent command was removed on request.
    CommandCancelled { id: CommandId, command: String },
    /// Bytes received while bypass mode is active.
    RawData { bytes: Vec<u8> },
    BypassModeChanged { enabled: bool },
    /// The link dropped; every queued and sent command was discarded.
    Disconnected,
}

impl EngineEvent {
    /// Id of the command this event is about, if any.
    pub fn command_id(&self) -> Option<CommandId> {
        match self {
            Self::ResponseMatched { id, .. }
            | Self::CommandTimedOut { id, .. }
            | Self::CommandSent { id, .. }
            | Self::SendFailed { id, .. }
            | Self::StreamStopped { id, .. }
            | Self::CommandCancelled { id, .. } => Some(*id),
            Self::MessageReceived { .. }
            | Self::ResponsesBufferTooLarge { .. }
            | Self::SendQueueTooLarge { .. }
            | Self::RawData { .. }
            | Self::BypassModeChanged { .. }
            | Self::Disconnected => None,
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResponseMatched {
                id,
                command,
                response,
                ..
            } => write!(
                f,
                "{command} {id} -> {}",
                String::from_utf8_lossy(response).escape_debug()
            ),
            Self::MessageReceived { translation, .. } => write!(f, "device: {translation}"),
            Self::CommandTimedOut { id, command, .. } => write!(f, "{command} {id} timed out"),
            Self::ResponsesBufferTooLarge {
                attempted,
                capacity,
            } => write!(f, "response buffer overflow ({attempted} > {capacity} bytes)"),
            Self::SendQueueTooLarge { capacity } => {
                write!(f, "send queue full ({capacity} commands)")
            }
            Self::CommandSent { id, command } => write!(f, "{command} {id} sent"),
            Self::SendFailed { id, command, error } => {
                write!(f, "{command} {id} failed to send: {error}")
            }
            Self::StreamStopped { id, command } => write!(f, "{command} {id} stream stopped"),
            Self::CommandCancelled { id, command } => write!(f, "{command} {id} cancelled"),
            Self::RawData { bytes } => {
                write!(f, "{}", String::from_utf8_lossy(bytes).escape_debug())
            }
            Self::BypassModeChanged { enabled } => write!(f, "bypass mode {}", if *enabled { "on" } else { "off" }),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}
