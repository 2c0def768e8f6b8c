//! Async service around the command engine.
//!
//! The engine is a synchronous state machine; this module gives it a home on
//! the tokio runtime. One task owns the [`CommandEngine`] and handles
//! requests from a bounded channel one at a time, so engine state is never
//! touched concurrently. Callers talk to it through a cloneable
//! [`EngineHandle`].
//!
//! # Architecture
//!
//! ```text
//! CLI / application ─┐                       ┌─> broadcast<EngineEvent>
//! reader thread ─────┼─> mpsc<Request> ─> engine task
//! timers ────────────┘                       └─> oneshot (submit_blocking)
//! ```
//!
//! The task sleeps until the engine's next deadline, so timeouts fire
//! without polling.

use crate::command::{Command, CommandArg, CommandId, OperationMode};
use crate::engine::{CommandEngine, EngineEvent, EngineSnapshot};
use crate::error::EngineError;
use crate::messages::DeviceMessageSet;
use crate::port::{LinkEvent, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

// ========== Error Types ==========

/// Errors reported through an [`EngineHandle`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The engine rejected the request.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The command got no response before its timeout.
    #[error("Command '{0}' timed out")]
    TimedOut(String),

    /// The command was removed before it resolved.
    #[error("Command '{0}' was cancelled")]
    Cancelled(String),

    /// The link dropped before the command resolved.
    #[error("Link disconnected")]
    Disconnected,

    /// Writing the command to the link failed.
    #[error("Failed to send command: {0}")]
    SendFailed(String),

    /// Only Blocking commands can be awaited.
    #[error("Command '{name}' uses {mode} mode; only blocking commands can be awaited")]
    NotBlocking { name: String, mode: OperationMode },

    /// Awaiting a response is meaningless while matching is disabled.
    #[error("Bypass mode is active")]
    BypassActive,

    /// The engine task is gone.
    #[error("Engine service is not running")]
    ChannelClosed,
}

/// Convenient Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

type Reply<T> = oneshot::Sender<T>;

// ========== Requests ==========

enum Request {
    Submit {
        command: Arc<Command>,
        args: Vec<CommandArg>,
        reply: Reply<ServiceResult<CommandId>>,
    },
    SubmitBlocking {
        command: Arc<Command>,
        args: Vec<CommandArg>,
        reply: Reply<ServiceResult<Vec<u8>>>,
    },
    BytesReceived(Vec<u8>),
    Disconnected,
    Reconnect(Box<dyn Transport>),
    SetBypassMode(bool),
    ConfigureDeviceMessages(DeviceMessageSet),
    RemoveLastSent(Reply<Option<CommandId>>),
    RemoveFirstToSend(Reply<Option<CommandId>>),
    ClearAll,
    SendRaw {
        bytes: Vec<u8>,
        reply: Reply<ServiceResult<()>>,
    },
    Snapshot(Reply<EngineSnapshot>),
    Shutdown,
}

// ========== Handle ==========

/// Cloneable entry point to a running engine task.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    async fn request(&self, request: Request) -> ServiceResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ServiceError::ChannelClosed)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> ServiceResult<T> {
        let (tx, rx) = oneshot::channel();
        self.request(make(tx)).await?;
        rx.await.map_err(|_| ServiceError::ChannelClosed)
    }

    /// Queue a command. Its outcome is only reported as events.
    pub async fn submit(
        &self,
        command: Arc<Command>,
        args: Vec<CommandArg>,
    ) -> ServiceResult<CommandId> {
        self.call(|reply| Request::Submit {
            command,
            args,
            reply,
        })
        .await?
    }

    /// Queue a Blocking command and wait for its response.
    ///
    /// Only the calling task is suspended; the engine keeps processing
    /// other requests meanwhile.
    pub async fn submit_blocking(
        &self,
        command: Arc<Command>,
        args: Vec<CommandArg>,
    ) -> ServiceResult<Vec<u8>> {
        self.call(|reply| Request::SubmitBlocking {
            command,
            args,
            reply,
        })
        .await?
    }

    /// [`submit_blocking`](Self::submit_blocking) for callers outside the
    /// runtime. Panics if called from within an async context.
    pub fn submit_blocking_sync(
        &self,
        command: Arc<Command>,
        args: Vec<CommandArg>,
    ) -> ServiceResult<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .blocking_send(Request::SubmitBlocking {
                command,
                args,
                reply,
            })
            .map_err(|_| ServiceError::ChannelClosed)?;
        rx.blocking_recv().map_err(|_| ServiceError::ChannelClosed)?
    }

    pub async fn bytes_received(&self, bytes: Vec<u8>) -> ServiceResult<()> {
        self.request(Request::BytesReceived(bytes)).await
    }

    pub async fn disconnected(&self) -> ServiceResult<()> {
        self.request(Request::Disconnected).await
    }

    pub async fn reconnect(&self, transport: Box<dyn Transport>) -> ServiceResult<()> {
        self.request(Request::Reconnect(transport)).await
    }

    pub async fn set_bypass_mode(&self, enabled: bool) -> ServiceResult<()> {
        self.request(Request::SetBypassMode(enabled)).await
    }

    pub async fn configure_device_messages(&self, messages: DeviceMessageSet) -> ServiceResult<()> {
        self.request(Request::ConfigureDeviceMessages(messages)).await
    }

    pub async fn remove_last_sent(&self) -> ServiceResult<Option<CommandId>> {
        self.call(Request::RemoveLastSent).await
    }

    pub async fn remove_first_to_send(&self) -> ServiceResult<Option<CommandId>> {
        self.call(Request::RemoveFirstToSend).await
    }

    pub async fn clear_all(&self) -> ServiceResult<()> {
        self.request(Request::ClearAll).await
    }

    /// Write raw bytes; bypass mode only.
    pub async fn send_raw(&self, bytes: Vec<u8>) -> ServiceResult<()> {
        self.call(|reply| Request::SendRaw { bytes, reply }).await?
    }

    pub async fn snapshot(&self) -> ServiceResult<EngineSnapshot> {
        self.call(Request::Snapshot).await
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Stop the engine task. Pending waiters resolve with
    /// [`ServiceError::ChannelClosed`].
    pub async fn shutdown(&self) -> ServiceResult<()> {
        self.request(Request::Shutdown).await
    }

    /// Feed what a reader thread observes on the link into the engine.
    /// Ends when the reader stops or the engine task is gone.
    pub fn forward_link(&self, mut link: mpsc::Receiver<LinkEvent>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(event) = link.recv().await {
                let forwarded = match event {
                    LinkEvent::Data(bytes) => handle.bytes_received(bytes).await,
                    LinkEvent::Disconnected(error) => {
                        tracing::warn!(%error, "Link lost");
                        handle.disconnected().await
                    }
                };
                if forwarded.is_err() {
                    break;
                }
            }
        })
    }
}

// ========== Service ==========

/// Task owning the engine.
pub struct EngineService {
    engine: CommandEngine,
    events: broadcast::Sender<EngineEvent>,
    waiters: HashMap<CommandId, (String, Reply<ServiceResult<Vec<u8>>>)>,
}

impl EngineService {
    /// Move `engine` onto a new task and return its handle.
    ///
    /// `capacity` bounds both the request queue and the event backlog kept
    /// for slow subscribers.
    pub fn spawn(engine: CommandEngine, capacity: usize) -> (EngineHandle, JoinHandle<()>) {
        let capacity = capacity.max(1);
        let (requests, rx) = mpsc::channel(capacity);
        let (events, _) = broadcast::channel(capacity);

        let service = Self {
            engine,
            events: events.clone(),
            waiters: HashMap::new(),
        };
        let task = tokio::spawn(service.run(rx));

        (EngineHandle { requests, events }, task)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        tracing::debug!("Engine service started");
        loop {
            let deadline = self.engine.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Shutdown) | None => break,
                    Some(request) => self.handle(request),
                },
                _ = timer => {
                    // A deadline that slept through is due even if the clock
                    // lags behind it
                    let now = std::time::Instant::now();
                    let now = deadline.map_or(now, |at| now.max(at));
                    self.engine.poll_timeouts(now);
                }
            }

            self.publish();
        }
        tracing::debug!(waiters = self.waiters.len(), "Engine service stopped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Submit {
                command,
                args,
                reply,
            } => {
                let result = self.engine.submit(command, args).map_err(ServiceError::from);
                let _ = reply.send(result);
            }
            Request::SubmitBlocking {
                command,
                args,
                reply,
            } => {
                if command.mode() != OperationMode::Blocking {
                    let _ = reply.send(Err(ServiceError::NotBlocking {
                        name: command.name().to_string(),
                        mode: command.mode(),
                    }));
                    return;
                }
                if self.engine.is_bypass() {
                    let _ = reply.send(Err(ServiceError::BypassActive));
                    return;
                }
                let name = command.name().to_string();
                match self.engine.submit(command, args) {
                    Ok(id) => {
                        self.waiters.insert(id, (name, reply));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
            Request::BytesReceived(bytes) => self.engine.bytes_received(&bytes),
            Request::Disconnected => self.engine.on_disconnected(),
            Request::Reconnect(transport) => self.engine.reconnect(transport),
            Request::SetBypassMode(enabled) => self.engine.set_bypass_mode(enabled),
            Request::ConfigureDeviceMessages(messages) => self.engine.set_device_messages(messages),
            Request::RemoveLastSent(reply) => {
                let _ = reply.send(self.engine.remove_last_sent());
            }
            Request::RemoveFirstToSend(reply) => {
                let _ = reply.send(self.engine.remove_first_to_send());
            }
            Request::ClearAll => self.engine.clear_all(),
            Request::SendRaw { bytes, reply } => {
                let _ = reply.send(self.engine.send_raw(&bytes).map_err(ServiceError::from));
            }
            Request::Snapshot(reply) => {
                let _ = reply.send(self.engine.snapshot());
            }
            // Handled by the run loop
            Request::Shutdown => {}
        }
    }

    /// Resolve waiters and broadcast everything the engine produced.
    fn publish(&mut self) {
        for event in self.engine.take_events() {
            self.resolve_waiters(&event);
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    fn resolve_waiters(&mut self, event: &EngineEvent) {
        let outcome = match event {
            EngineEvent::ResponseMatched { id, response, .. } => Some((*id, Ok(response.clone()))),
            EngineEvent::CommandTimedOut { id, command, .. } => {
                Some((*id, Err(ServiceError::TimedOut(command.clone()))))
            }
            EngineEvent::CommandCancelled { id, command } => {
                Some((*id, Err(ServiceError::Cancelled(command.clone()))))
            }
            EngineEvent::SendFailed { id, error, .. } => {
                Some((*id, Err(ServiceError::SendFailed(error.clone()))))
            }
            EngineEvent::Disconnected => {
                for (_, (_, reply)) in self.waiters.drain() {
                    let _ = reply.send(Err(ServiceError::Disconnected));
                }
                None
            }
            _ => None,
        };

        if let Some((id, result)) = outcome {
            if let Some((name, reply)) = self.waiters.remove(&id) {
                tracing::trace!(command = %name, %id, ok = result.is_ok(), "Resolving waiter");
                let _ = reply.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MatchSpec;
    use crate::config::EngineConfig;
    use crate::port::MockTransport;
    use std::time::Duration;

    fn spawn() -> (EngineHandle, MockTransport) {
        let link = MockTransport::new("MOCK0");
        let engine = CommandEngine::new(
            Box::new(link.clone()),
            &EngineConfig::default(),
            DeviceMessageSet::new(),
        );
        let (handle, _task) = EngineService::spawn(engine, 16);
        (handle, link)
    }

    #[tokio::test]
    async fn test_submit_blocking_rejects_other_modes() {
        let (handle, link) = spawn();
        let cmd = Arc::new(
            Command::new(
                "READ",
                "R\n",
                OperationMode::PullFlux,
                Some(MatchSpec::fixed_byte_count(2).unwrap()),
            )
            .unwrap(),
        );
        let err = handle.submit_blocking(cmd, vec![]).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotBlocking { .. }));
        assert_eq!(link.write_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (handle, _link) = spawn();
        handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            handle.snapshot().await,
            Err(ServiceError::ChannelClosed)
        ));
    }
}
