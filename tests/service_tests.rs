//! Integration tests for the async engine service.

mod common;

use common::*;
use serial_command_port::config::EngineConfig;
use serial_command_port::port::LinkEvent;
use serial_command_port::{
    CommandEngine, DeviceMessageSet, EngineEvent, EngineHandle, EngineService, EngineState,
    MatchSpec, MockTransport, OperationMode, PortError, ServiceError,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

fn spawn_service() -> (EngineHandle, MockTransport) {
    let link = MockTransport::new("MOCK0");
    let engine = CommandEngine::new(
        Box::new(link.clone()),
        &EngineConfig::default(),
        DeviceMessageSet::new(),
    );
    let (handle, _task) = EngineService::spawn(engine, 32);
    (handle, link)
}

/// Wait until the mock link has seen `count` writes.
async fn wait_for_writes(link: &MockTransport, count: usize) {
    timeout(Duration::from_secs(2), async {
        while link.write_count() < count {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("writes did not happen in time");
}

#[tokio::test]
async fn test_submit_blocking_returns_response() {
    let (handle, link) = spawn_service();
    let waiter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.submit_blocking(blocking("ID", "DEV42\r\n"), vec![]).await })
    };

    wait_for_writes(&link, 1).await;
    handle.bytes_received(b"DEV4".to_vec()).await.unwrap();
    handle.bytes_received(b"2\r\n".to_vec()).await.unwrap();

    let response = waiter.await.unwrap().unwrap();
    assert_eq!(response, b"DEV42\r\n");
}

#[tokio::test]
async fn test_submit_blocking_times_out() {
    let (handle, _link) = spawn_service();
    let cmd = timed(
        "SLOW",
        OperationMode::Blocking,
        MatchSpec::expected_responses(["OK"]).unwrap(),
        Duration::from_millis(30),
    );

    let result = timeout(Duration::from_secs(2), handle.submit_blocking(cmd, vec![]))
        .await
        .expect("timer fired");
    assert!(matches!(result, Err(ServiceError::TimedOut(name)) if name == "SLOW"));

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, EngineState::Idle);
    assert_eq!(snapshot.sent, 0);
}

#[tokio::test]
async fn test_disconnect_fails_waiters() {
    let (handle, link) = spawn_service();
    let waiter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.submit_blocking(blocking("A", "OK"), vec![]).await })
    };
    wait_for_writes(&link, 1).await;

    handle.disconnected().await.unwrap();
    assert!(matches!(waiter.await.unwrap(), Err(ServiceError::Disconnected)));

    let err = handle.submit(blocking("B", "OK"), vec![]).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Engine(serial_command_port::EngineError::Disconnected)
    ));

    let fresh = MockTransport::new("MOCK1");
    fresh.expect_write(b"C\n");
    handle.reconnect(Box::new(fresh.clone())).await.unwrap();
    handle.submit(blocking("C", "OK"), vec![]).await.unwrap();
    assert_ok!(fresh.verify_expectations());
}

#[tokio::test]
async fn test_cancelled_waiter() {
    let (handle, link) = spawn_service();
    let waiter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.submit_blocking(blocking("A", "OK"), vec![]).await })
    };
    wait_for_writes(&link, 1).await;

    assert!(handle.remove_last_sent().await.unwrap().is_some());
    assert!(matches!(waiter.await.unwrap(), Err(ServiceError::Cancelled(name)) if name == "A"));
}

#[tokio::test]
async fn test_send_failure_reported_to_waiter() {
    let (handle, link) = spawn_service();
    link.fail_next_send(PortError::Disconnected);

    let result = handle.submit_blocking(blocking("A", "OK"), vec![]).await;
    assert!(matches!(result, Err(ServiceError::SendFailed(_))));
}

#[tokio::test]
async fn test_events_are_broadcast() {
    let (handle, link) = spawn_service();
    let mut events = handle.subscribe();

    let id = handle.submit(non_blocking("N", "OK"), vec![]).await.unwrap();
    wait_for_writes(&link, 1).await;
    handle.bytes_received(b"OK".to_vec()).await.unwrap();

    let sent = events.recv().await.unwrap();
    assert!(matches!(sent, EngineEvent::CommandSent { id: s, .. } if s == id));
    let matched = events.recv().await.unwrap();
    assert!(matches!(
        matched,
        EngineEvent::ResponseMatched { id: m, ref response, .. } if m == id && response == b"OK"
    ));
}

#[tokio::test]
async fn test_bypass_mode_over_handle() {
    let (handle, link) = spawn_service();
    let mut events = handle.subscribe();

    assert_err!(handle.send_raw(b"x".to_vec()).await);

    handle.set_bypass_mode(true).await.unwrap();
    handle.send_raw(b"AT\r".to_vec()).await.unwrap();
    assert_eq!(link.written_text(), vec!["AT\r"]);

    let err = handle
        .submit_blocking(blocking("A", "OK"), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BypassActive));

    handle.bytes_received(b"raw".to_vec()).await.unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        EngineEvent::BypassModeChanged { enabled: true }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        EngineEvent::RawData {
            bytes: b"raw".to_vec()
        }
    );
}

#[tokio::test]
async fn test_forward_link_events() {
    let (handle, _link) = spawn_service();
    let mut set = DeviceMessageSet::new();
    set.insert("BOOT\n", "Device rebooted");
    handle.configure_device_messages(set).await.unwrap();
    let mut events = handle.subscribe();

    let (tx, rx) = mpsc::channel(8);
    let forwarder = handle.forward_link(rx);

    tx.send(LinkEvent::Data(b"BOOT\n".to_vec())).await.unwrap();
    tx.send(LinkEvent::Disconnected(PortError::Disconnected))
        .await
        .unwrap();
    drop(tx);

    assert_eq!(
        events.recv().await.unwrap(),
        EngineEvent::MessageReceived {
            message: b"BOOT\n".to_vec(),
            translation: "Device rebooted".to_string(),
        }
    );
    assert_eq!(events.recv().await.unwrap(), EngineEvent::Disconnected);
    forwarder.await.unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, EngineState::Disconnected);
}

#[tokio::test]
async fn test_queue_controls_over_handle() {
    let (handle, link) = spawn_service();
    handle.submit(blocking("A", "OK"), vec![]).await.unwrap();
    let b = handle.submit(blocking("B", "OK"), vec![]).await.unwrap();
    wait_for_writes(&link, 1).await;

    assert_eq!(handle.remove_first_to_send().await.unwrap(), Some(b));
    assert_ok!(handle.clear_all().await);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.queued, 0);
    assert_eq!(snapshot.sent, 0);
    assert_eq!(snapshot.state, EngineState::Idle);
}

#[test]
fn test_submit_blocking_sync() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (handle, link) = runtime.block_on(async { spawn_service() });

    let feeder = {
        let handle = handle.clone();
        let link = link.clone();
        std::thread::spawn(move || {
            while link.write_count() == 0 {
                std::thread::sleep(Duration::from_millis(2));
            }
            runtime.block_on(handle.bytes_received(b"PONG".to_vec())).unwrap();
            runtime
        })
    };

    let response = handle
        .submit_blocking_sync(blocking("PING", "PONG"), vec![])
        .unwrap();
    assert_eq!(response, b"PONG");
    drop(feeder.join().unwrap());
}
