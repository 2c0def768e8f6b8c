//! Shared test utilities for the engine and service tests.
//!
//! This module provides common test infrastructure including:
//! - An engine wired to a `MockTransport` whose writes can be inspected
//! - Command builders for every operation mode
//! - Event filtering helpers

#![allow(dead_code)]

use serial_command_port::config::EngineConfig;
use serial_command_port::{
    Command, CommandEngine, CommandId, DeviceMessageSet, EngineEvent, MatchSpec, MockTransport,
    OperationMode,
};
use std::sync::Arc;
use std::time::Duration;

/// An engine plus a handle on the mock link it writes to.
pub struct Harness {
    pub engine: CommandEngine,
    pub link: MockTransport,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(EngineConfig::default(), DeviceMessageSet::new())
    }

    pub fn with(config: EngineConfig, messages: DeviceMessageSet) -> Self {
        let link = MockTransport::new("MOCK0");
        let engine = CommandEngine::new(Box::new(link.clone()), &config, messages);
        Self { engine, link }
    }

    pub fn with_capacities(send_queue: usize, response_buffer: usize) -> Self {
        Self::with(
            EngineConfig {
                send_queue_capacity: send_queue,
                response_buffer_capacity: response_buffer,
                ..EngineConfig::default()
            },
            DeviceMessageSet::new(),
        )
    }

    /// Submit without arguments.
    pub fn submit(&mut self, command: &Arc<Command>) -> CommandId {
        self.engine
            .submit(Arc::clone(command), vec![])
            .expect("submission accepted")
    }

    /// Lossy text of every payload written so far.
    pub fn written(&self) -> Vec<String> {
        self.link.written_text()
    }

    pub fn events(&mut self) -> Vec<EngineEvent> {
        self.engine.take_events()
    }
}

/// Build a command whose payload is its name followed by a newline.
pub fn command(name: &str, mode: OperationMode, spec: Option<MatchSpec>) -> Arc<Command> {
    Arc::new(Command::new(name, format!("{name}\n"), mode, spec).expect("valid command"))
}

pub fn blocking(name: &str, response: &str) -> Arc<Command> {
    timed(
        name,
        OperationMode::Blocking,
        MatchSpec::expected_responses([response]).expect("valid responses"),
        Duration::from_millis(200),
    )
}

pub fn timed(name: &str, mode: OperationMode, spec: MatchSpec, timeout: Duration) -> Arc<Command> {
    Arc::new(
        Command::new(name, format!("{name}\n"), mode, Some(spec))
            .expect("valid command")
            .with_timeout(timeout),
    )
}

pub fn non_blocking(name: &str, response: &str) -> Arc<Command> {
    command(
        name,
        OperationMode::NonBlockingWithResponse,
        Some(MatchSpec::expected_responses([response]).expect("valid responses")),
    )
}

pub fn fire_and_forget(name: &str) -> Arc<Command> {
    command(name, OperationMode::NonBlockingNoResponse, None)
}

/// Responses matched for `id`, in order.
pub fn responses_for(events: &[EngineEvent], id: CommandId) -> Vec<Vec<u8>> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::ResponseMatched {
                id: m, response, ..
            } if *m == id => Some(response.clone()),
            _ => None,
        })
        .collect()
}

pub fn count_matching(events: &[EngineEvent], pred: impl Fn(&EngineEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}
