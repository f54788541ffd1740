//! Scenario: graphql-ws session lifecycle over a scripted transport
//!
//! # Invariants under test
//!
//! 1. Opening connects with subprotocol `graphql-ws` and sends `connection_init`
//!    before anything else.
//! 2. `connection_ack` produces exactly one `start`; events arrive in wire
//!    order: Connected, Acknowledged, SubscriptionStarted.
//! 3. An `error` frame mid-stream is reported; the state stays `Streaming`
//!    and the socket stays open (default policy).
//! 4. A `complete` frame closes the session: one Disconnected event, no
//!    further frames processed, socket closed.
//! 5. Cancellation closes the socket, sends `stop`, and emits nothing more.
//! 6. Silence longer than the stall window emits `Stalled` without closing.
//! 7. Malformed and unknown frames are skipped.
//! 8. A connect failure surfaces as `SessionError::Connect`.

use std::time::Duration;

use lf_protocol::{
    ConnectionDescriptor, DisconnectReason, ProtocolEvent, ProtocolSession, ProtocolState,
    SessionError, SessionOptions, SubscriptionRequest,
};
use lf_transport::{ConnectError, ScriptHandle, ScriptedConnector};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::new("rt.example.com", "tok-xyz", "https://data.example.com")
}

fn request() -> SubscriptionRequest {
    SubscriptionRequest::new("subscription marketLineUpdate { marketLineUpdate { leagueId } }")
}

struct Running {
    handle: ScriptHandle,
    events: mpsc::UnboundedReceiver<ProtocolEvent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<ProtocolState>,
}

async fn start(options: SessionOptions) -> Running {
    let connector = ScriptedConnector::new();
    let handle = connector.expect_session();
    let session = ProtocolSession::open(&connector, descriptor(), request(), options)
        .await
        .unwrap();

    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].0.starts_with("wss://rt.example.com/graphql/realtime?header="));
    assert_eq!(attempts[0].1, "graphql-ws");

    let (tx, events) = mpsc::unbounded_channel();
    let (shutdown, stop_rx) = watch::channel(false);
    let task = tokio::spawn(session.run(tx, stop_rx));
    Running {
        handle,
        events,
        shutdown,
        task,
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ProtocolEvent>) -> ProtocolEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_sent(handle: &mut ScriptHandle) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(2), handle.next_sent())
        .await
        .expect("timed out waiting for outbound frame")
        .expect("session dropped");
    serde_json::from_str(&text).unwrap()
}

/// Through Connected / Acknowledged / SubscriptionStarted; returns the id.
async fn handshake(r: &mut Running) -> String {
    let init = next_sent(&mut r.handle).await;
    assert_eq!(init["type"], "connection_init");
    assert_eq!(init["payload"]["authorization"]["Authorization"], "tok-xyz");
    assert_eq!(next_event(&mut r.events).await, ProtocolEvent::Connected);

    r.handle.push_text(r#"{"type":"connection_ack"}"#);
    let start = next_sent(&mut r.handle).await;
    assert_eq!(start["type"], "start");
    assert_eq!(
        start["payload"]["extensions"]["authorization"]["x-amz-user-agent"],
        "aws-amplify/2.0.8"
    );
    let id = start["id"].as_str().unwrap().to_string();

    assert_eq!(next_event(&mut r.events).await, ProtocolEvent::Acknowledged);
    assert_eq!(
        next_event(&mut r.events).await,
        ProtocolEvent::SubscriptionStarted { id: id.clone() }
    );
    id
}

// ---------------------------------------------------------------------------
// 1-3. Handshake, streaming, error frame keeps the stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn error_frame_mid_stream_is_reported_and_stream_continues() {
    let mut r = start(SessionOptions::default()).await;
    let id = handshake(&mut r).await;

    r.handle.push_json(&json!({ "type": "start_ack", "id": id }));
    assert_eq!(
        next_event(&mut r.events).await,
        ProtocolEvent::Streaming { id: id.clone() }
    );

    r.handle.push_json(&json!({
        "type": "error",
        "id": id,
        "payload": { "errors": [{ "message": "throttled" }] }
    }));
    match next_event(&mut r.events).await {
        ProtocolEvent::SubscriptionError { id: Some(eid), payload } => {
            assert_eq!(eid, id);
            assert_eq!(payload.unwrap()["errors"][0]["message"], "throttled");
        }
        other => panic!("expected SubscriptionError, got {other:?}"),
    }

    // Still streaming: a later data frame is delivered.
    r.handle.push_json(&json!({
        "type": "data",
        "id": id,
        "payload": { "data": { "marketLineUpdate": { "marketLines": [] } } }
    }));
    assert!(matches!(
        next_event(&mut r.events).await,
        ProtocolEvent::Data { .. }
    ));
    assert!(!r.handle.closed_by_client());
    assert!(r.handle.drain_sent().is_empty(), "no second start, no stop");

    r.shutdown.send(true).unwrap();
    assert_eq!(r.task.await.unwrap(), ProtocolState::Closed);
}

// ---------------------------------------------------------------------------
// 4. complete terminates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_closes_and_stops_processing() {
    let mut r = start(SessionOptions::default()).await;
    let id = handshake(&mut r).await;

    r.handle.push_json(&json!({ "type": "complete", "id": id }));
    r.handle.push_json(&json!({ "type": "data", "id": id, "payload": { "data": { "x": 1 } } }));

    assert_eq!(
        next_event(&mut r.events).await,
        ProtocolEvent::Disconnected {
            reason: DisconnectReason::Completed
        }
    );
    assert_eq!(r.task.await.unwrap(), ProtocolState::Closed);
    assert!(r.handle.closed_by_client(), "socket closed after complete");
    assert!(
        r.events.recv().await.is_none(),
        "no events after the disconnect; sender dropped with the loop"
    );
}

// ---------------------------------------------------------------------------
// 5. Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_closes_socket_without_further_events() {
    let mut r = start(SessionOptions::default()).await;
    let id = handshake(&mut r).await;

    r.shutdown.send(true).unwrap();
    assert_eq!(r.task.await.unwrap(), ProtocolState::Closed);

    let stop = next_sent(&mut r.handle).await;
    assert_eq!(stop, json!({ "type": "stop", "id": id }));
    assert!(r.handle.closed_by_client());

    r.handle.push_json(&json!({ "type": "data", "id": id, "payload": { "data": {} } }));
    assert!(r.events.recv().await.is_none());
}

#[tokio::test]
async fn dropping_the_shutdown_sender_cancels() {
    let mut r = start(SessionOptions::default()).await;
    handshake(&mut r).await;

    drop(r.shutdown);
    assert_eq!(r.task.await.unwrap(), ProtocolState::Closed);
    assert!(r.handle.closed_by_client());
}

// ---------------------------------------------------------------------------
// 6. Liveness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silence_emits_stalled_and_keeps_session_open() {
    let options = SessionOptions {
        stall_after: Some(Duration::from_millis(200)),
        ..SessionOptions::default()
    };
    let mut r = start(options).await;
    handshake(&mut r).await;

    assert_eq!(
        next_event(&mut r.events).await,
        ProtocolEvent::Stalled {
            silent_for: Duration::from_millis(200)
        }
    );
    assert!(!r.handle.closed_by_client());

    // A keep-alive is accepted silently after a stall.
    r.handle.push_text(r#"{"type":"ka"}"#);
    r.handle.push_close();
    let mut saw_disconnect = false;
    while let Some(ev) = r.events.recv().await {
        match ev {
            ProtocolEvent::Stalled { .. } => {}
            ProtocolEvent::Disconnected { reason } => {
                assert_eq!(reason, DisconnectReason::PeerClosed);
                saw_disconnect = true;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(saw_disconnect);
    assert_eq!(r.task.await.unwrap(), ProtocolState::Closed);
}

// ---------------------------------------------------------------------------
// 7. Malformed frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_and_unknown_frames_are_skipped() {
    let mut r = start(SessionOptions::default()).await;
    next_sent(&mut r.handle).await;
    assert_eq!(next_event(&mut r.events).await, ProtocolEvent::Connected);

    r.handle.push_text("not json at all");
    r.handle.push_text(r#"{"payload":{}}"#);
    r.handle.push_text(r#"{"type":"surprise"}"#);
    r.handle.push_text(r#"{"type":"connection_ack"}"#);

    assert_eq!(next_event(&mut r.events).await, ProtocolEvent::Acknowledged);

    r.handle.push_error("connection reset");
    let _started = next_event(&mut r.events).await;
    match next_event(&mut r.events).await {
        ProtocolEvent::Disconnected {
            reason: DisconnectReason::Transport { message },
        } => assert!(message.contains("connection reset")),
        other => panic!("expected transport disconnect, got {other:?}"),
    }
    assert_eq!(r.task.await.unwrap(), ProtocolState::Failed);
}

// ---------------------------------------------------------------------------
// 8. Connect failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_failure_is_returned_to_caller() {
    let connector = ScriptedConnector::new();
    connector.expect_failure(ConnectError::Rejected {
        status: 401,
        body: "Unauthorized".to_string(),
    });
    let err = match ProtocolSession::open(
        &connector,
        descriptor(),
        request(),
        SessionOptions::default(),
    )
    .await
    {
        Ok(_) => panic!("open must fail"),
        Err(e) => e,
    };
    assert!(matches!(
        err,
        SessionError::Connect(ConnectError::Rejected { status: 401, .. })
    ));
}
