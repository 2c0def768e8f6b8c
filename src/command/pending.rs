//! Commands bound to arguments, before and after transmission.

use super::{Command, CommandArg, CommandError, OperationMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Identifier assigned to every submission. Never reused by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A command bound to concrete argument values, waiting in the send queue.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    id: CommandId,
    command: Arc<Command>,
    args: Vec<CommandArg>,
}

impl PendingCommand {
    pub fn new(id: CommandId, command: Arc<Command>, args: Vec<CommandArg>) -> Self {
        Self { id, command, args }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn command(&self) -> &Arc<Command> {
        &self.command
    }

    pub fn name(&self) -> &str {
        self.command.name()
    }

    pub fn mode(&self) -> OperationMode {
        self.command.mode()
    }

    pub fn args(&self) -> &[CommandArg] {
        &self.args
    }

    /// Payload bytes written to the link for this submission.
    pub fn encode(&self) -> Result<Vec<u8>, CommandError> {
        self.command.encode(&self.args)
    }
}

/// A transmitted command, registered until its response is matched, its
/// stream is stopped, it times out or the link drops.
#[derive(Debug, Clone)]
pub struct SentCommand {
    pending: PendingCommand,
    sent_at: DateTime<Utc>,
    deadline: Option<Instant>,
}

impl SentCommand {
    /// Register `pending` as sent at `now`, arming its timer if its mode
    /// has one.
    pub fn new(pending: PendingCommand, now: Instant) -> Self {
        let deadline = pending.command.timer_duration().map(|t| now + t);
        Self {
            pending,
            sent_at: Utc::now(),
            deadline,
        }
    }

    pub fn id(&self) -> CommandId {
        self.pending.id
    }

    pub fn pending(&self) -> &PendingCommand {
        &self.pending
    }

    pub fn command(&self) -> &Arc<Command> {
        &self.pending.command
    }

    pub fn name(&self) -> &str {
        self.pending.name()
    }

    pub fn mode(&self) -> OperationMode {
        self.pending.mode()
    }

    pub fn args(&self) -> &[CommandArg] {
        &self.pending.args
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MatchSpec;
    use std::time::Duration;

    #[test]
    fn test_deadline_armed_for_timed_modes() {
        let cmd = Command::new(
            "PULL",
            "P\n",
            OperationMode::PullFlux,
            Some(MatchSpec::fixed_byte_count(2).unwrap()),
        )
        .unwrap()
        .with_timeout(Duration::from_millis(500));
        let now = Instant::now();
        let sent = SentCommand::new(PendingCommand::new(CommandId::new(1), Arc::new(cmd), vec![]), now);

        assert_eq!(sent.deadline(), Some(now + Duration::from_millis(500)));
        assert!(!sent.is_expired(now));
        assert!(sent.is_expired(now + Duration::from_millis(500)));
    }

    #[test]
    fn test_no_deadline_for_push() {
        let cmd = Command::new(
            "STREAM",
            "S\n",
            OperationMode::PushFlux,
            Some(MatchSpec::fixed_byte_count(2).unwrap()),
        )
        .unwrap()
        .with_timeout(Duration::from_millis(500));
        let sent = SentCommand::new(
            PendingCommand::new(CommandId::new(7), Arc::new(cmd), vec![]),
            Instant::now(),
        );
        assert_eq!(sent.deadline(), None);
        assert_eq!(sent.id().to_string(), "#7");
    }
}
