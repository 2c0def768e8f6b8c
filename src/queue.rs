//! Send queue and sent registry.
//!
//! Two ordered collections: commands waiting to be written (`to_send`, FIFO)
//! and commands written and still expecting a response (`sent`, in
//! transmission order). Admission and eviction follow each command's
//! [`OperationMode`].

use crate::command::{CommandId, OperationMode, PendingCommand, SentCommand};
use std::collections::VecDeque;
use std::time::Instant;
use thiserror::Error;

/// Default bound on commands waiting in `to_send`.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Admitting the command would take `to_send` past its bound.
    #[error("Send queue is full ({capacity} commands waiting)")]
    CapacityExceeded { capacity: usize },
}

#[derive(Debug)]
pub struct CommandQueue {
    to_send: VecDeque<PendingCommand>,
    sent: VecDeque<SentCommand>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            to_send: VecDeque::new(),
            sent: VecDeque::new(),
            capacity,
        }
    }

    /// Append a command to the tail of `to_send`. Does not transmit.
    pub fn enqueue(&mut self, pending: PendingCommand) -> Result<(), QueueError> {
        if self.to_send.len() >= self.capacity {
            return Err(QueueError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.to_send.push_back(pending);
        Ok(())
    }

    /// Pop the head of `to_send` if its mode allows transmission now.
    ///
    /// A Blocking head waits while another Blocking command is in `sent`;
    /// every other mode proceeds as soon as it reaches the head. The queue is
    /// never reordered around a waiting head. The returned command carries
    /// its send timestamp and armed timer; it is the caller's job to write
    /// it and then [`register_sent`](Self::register_sent) it.
    pub fn try_transmit_next(&mut self, now: Instant) -> Option<SentCommand> {
        let head = self.to_send.front()?;
        if head.mode() == OperationMode::Blocking && self.blocking_outstanding() {
            return None;
        }
        self.to_send
            .pop_front()
            .map(|pending| SentCommand::new(pending, now))
    }

    /// Record a written command. Commands that expect no response are not
    /// kept.
    pub fn register_sent(&mut self, sent: SentCommand) {
        if sent.mode().awaits_response() {
            self.sent.push_back(sent);
        }
    }

    /// Whether a Blocking command is still waiting for its response.
    pub fn blocking_outstanding(&self) -> bool {
        self.sent
            .iter()
            .any(|s| s.mode() == OperationMode::Blocking)
    }

    /// Resolve the sent entry `id` after a match. PushFlux entries stay
    /// registered until their stop command is sent; every other entry is
    /// removed and returned.
    pub fn remove_matched(&mut self, id: CommandId) -> Option<SentCommand> {
        let index = self.sent.iter().position(|s| s.id() == id)?;
        if self.sent[index].mode() == OperationMode::PushFlux {
            return None;
        }
        self.sent.remove(index)
    }

    /// Remove the sent entry `id` regardless of its mode.
    pub fn remove_sent(&mut self, id: CommandId) -> Option<SentCommand> {
        let index = self.sent.iter().position(|s| s.id() == id)?;
        self.sent.remove(index)
    }

    /// Remove every PushFlux entry whose stop command is `stop_name`.
    pub fn stop_push_streams(&mut self, stop_name: &str) -> Vec<SentCommand> {
        let mut stopped = Vec::new();
        let mut kept = VecDeque::with_capacity(self.sent.len());
        for sent in self.sent.drain(..) {
            if sent.mode() == OperationMode::PushFlux
                && sent.command().push_stop_command() == Some(stop_name)
            {
                stopped.push(sent);
            } else {
                kept.push_back(sent);
            }
        }
        self.sent = kept;
        stopped
    }

    /// Cancel the most recently sent entry.
    pub fn remove_last_sent(&mut self) -> Option<SentCommand> {
        self.sent.pop_back()
    }

    /// Cancel the head of `to_send`.
    pub fn remove_first_to_send(&mut self) -> Option<PendingCommand> {
        self.to_send.pop_front()
    }

    /// Empty both collections, returning what was dropped.
    pub fn clear_all(&mut self) -> (Vec<PendingCommand>, Vec<SentCommand>) {
        (self.to_send.drain(..).collect(), self.sent.drain(..).collect())
    }

    /// Earliest armed timer among sent entries.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sent.iter().filter_map(SentCommand::deadline).min()
    }

    /// Ids of sent entries whose timer expired at `now`, earliest first.
    pub fn expired(&self, now: Instant) -> Vec<CommandId> {
        let mut due: Vec<(Instant, CommandId)> = self
            .sent
            .iter()
            .filter(|s| s.is_expired(now))
            .filter_map(|s| s.deadline().map(|d| (d, s.id())))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn to_send(&self) -> impl Iterator<Item = &PendingCommand> {
        self.to_send.iter()
    }

    pub fn sent(&self) -> impl Iterator<Item = &SentCommand> {
        self.sent.iter()
    }

    pub fn get_sent(&self, id: CommandId) -> Option<&SentCommand> {
        self.sent.iter().find(|s| s.id() == id)
    }

    pub fn to_send_len(&self) -> usize {
        self.to_send.len()
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_QUEUE_CAPACITY)
    }
}
