//! Integration tests for the HTTP surfaces: the SSE stream transport, the
//! polling fallback endpoint, and the broadcaster gluing them together.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use httpmock::prelude::*;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::timeout;

use clubstream::{
    ConnectParams, ConnectionState, DomainEvent, EventBuffer, EventKind, EventTransport, PollError,
    PollSink, PollUrgency, PollingClient, PollingFallback, SharedTenant, SseTransport,
    StreamConfig, TenantBroadcaster, TransportError,
};

const VALID_TENANT: &str = "11111111-1111-1111-1111-111111111111";

/// `RUST_LOG=clubstream=debug cargo test` to watch the retry/poll loops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn event_json(id: &str, occurred_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "type": "visit.checkin",
        "occurredAt": occurred_at,
        "tenantId": VALID_TENANT,
        "payload": {"memberName": "Sam"},
    })
}

fn config_for(server: &MockServer) -> StreamConfig {
    StreamConfig::new(server.base_url())
}

fn params() -> ConnectParams {
    ConnectParams {
        tenant_id: VALID_TENANT.to_string(),
        location_id: None,
        last_event_id: None,
    }
}

// ============================================================================
// SSE transport
// ============================================================================

#[tokio::test]
async fn sse_transport_streams_frames() {
    init_tracing();
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/events/stream")
                .query_param("tenantId", VALID_TENANT);
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(
                    "event: connection.established\ndata: {\"id\":\"ack-1\"}\n\n\
                     event: visit.checkin\nid: 7\ndata: {\"id\":\"evt-1\"}\n\n",
                );
        })
        .await;

    let transport = SseTransport::new(&config_for(&server)).unwrap();
    let stream = transport.open(&params()).await.unwrap();
    let frames: Vec<_> = stream.collect().await;
    mock.assert_async().await;

    assert_eq!(frames.len(), 2);
    let first = frames[0].as_ref().unwrap();
    assert_eq!(first.event_type, "connection.established");
    let second = frames[1].as_ref().unwrap();
    assert_eq!(second.event_type, "visit.checkin");
    assert_eq!(second.id.as_deref(), Some("7"));
    assert_eq!(second.data, "{\"id\":\"evt-1\"}");
}

#[tokio::test]
async fn sse_transport_surfaces_http_errors() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/events/stream");
            then.status(503).body("maintenance");
        })
        .await;

    let transport = SseTransport::new(&config_for(&server)).unwrap();
    let result = transport.open(&params()).await;

    match result {
        Err(TransportError::Http { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        Err(other) => panic!("expected http error, got {other:?}"),
        Ok(_) => panic!("expected http error, got an open stream"),
    }
}

#[tokio::test]
async fn sse_transport_sends_replay_and_auth_headers() {
    init_tracing();
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/events/stream")
                .header("Last-Event-ID", "42")
                .header("Authorization", "Bearer token")
                .query_param("locationId", "loc-1");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: {}\n\n");
        })
        .await;

    let config = config_for(&server)
        .with_location("loc-1")
        .with_auth_header("Authorization", "Bearer token");
    let transport = SseTransport::new(&config).unwrap();

    let mut p = params();
    p.location_id = Some("loc-1".to_string());
    p.last_event_id = Some("42".to_string());
    let stream = transport.open(&p).await.unwrap();
    let _: Vec<_> = stream.collect().await;

    mock.assert_async().await;
}

// ============================================================================
// Polling client
// ============================================================================

#[tokio::test]
async fn polling_client_fetches_and_parses_events() {
    init_tracing();
    let server = MockServer::start_async().await;
    let since: DateTime<Utc> = "2026-08-29T10:00:00Z".parse().unwrap();
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/events")
                .query_param("tenantId", VALID_TENANT)
                .query_param("since", since.to_rfc3339())
                .query_param("limit", "50");
            then.status(200).json_body(json!({
                "events": [
                    event_json("evt-1", "2026-08-29T10:05:00Z"),
                    event_json("evt-2", "2026-08-29T10:06:00Z"),
                ]
            }));
        })
        .await;

    let client = PollingClient::new(
        &config_for(&server),
        SharedTenant::fixed(VALID_TENANT),
    )
    .unwrap();
    let events = client.poll(since).await.unwrap();
    mock.assert_async().await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, "evt-1");
    assert_eq!(events[0].kind, EventKind::VisitCheckin);
    assert_eq!(events[1].tenant_id, VALID_TENANT);
}

#[tokio::test]
async fn polling_client_surfaces_http_errors() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/events");
            then.status(500).body("boom");
        })
        .await;

    let client = PollingClient::new(
        &config_for(&server),
        SharedTenant::fixed(VALID_TENANT),
    )
    .unwrap();

    match client.poll(Utc::now()).await {
        Err(PollError::Http { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected http error, got {other:?}"),
    }
}

// ============================================================================
// Polling fallback loop
// ============================================================================

#[tokio::test]
async fn fallback_polls_while_down_and_ceases_when_connected() {
    init_tracing();
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/events");
            then.status(200).json_body(json!({
                "events": [
                    event_json("evt-1", "2026-08-29T10:05:00Z"),
                    event_json("evt-2", "2026-08-29T10:06:00Z"),
                ]
            }));
        })
        .await;

    let client = PollingClient::new(
        &config_for(&server),
        SharedTenant::fixed(VALID_TENANT),
    )
    .unwrap();

    let buffer = Arc::new(Mutex::new(EventBuffer::new(10)));
    let sink_buffer = buffer.clone();
    let sink: PollSink = Arc::new(move |events| {
        sink_buffer.lock().unwrap().merge(events);
    });

    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let handle = PollingFallback::spawn(
        client,
        state_rx,
        "2026-08-29T10:00:00Z".parse().unwrap(),
        Duration::from_millis(50),
        sink,
    );

    // Several polls happen while disconnected; the same two ids keep
    // coming back and the buffer dedupes them to two entries.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(mock.hits_async().await >= 2);
    assert_eq!(buffer.lock().unwrap().len(), 2);

    // The stream comes back: polling must go quiet.
    state_tx.send(ConnectionState::Connected).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let hits_when_connected = mock.hits_async().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(mock.hits_async().await, hits_when_connected);

    // Stream drops again: polling resumes.
    state_tx.send(ConnectionState::Error).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(mock.hits_async().await > hits_when_connected);

    handle.abort();
}

#[tokio::test]
async fn fallback_keeps_watermark_across_failures() {
    init_tracing();
    let server = MockServer::start_async().await;
    let since: DateTime<Utc> = "2026-08-29T10:00:00Z".parse().unwrap();
    let mut failing = server
        .mock_async(|when, then| {
            when.method(GET).path("/events");
            then.status(500).body("boom");
        })
        .await;

    let client = PollingClient::new(
        &config_for(&server),
        SharedTenant::fixed(VALID_TENANT),
    )
    .unwrap();

    let received = Arc::new(Mutex::new(Vec::<DomainEvent>::new()));
    let sink_received = received.clone();
    let sink: PollSink = Arc::new(move |events| {
        sink_received.lock().unwrap().extend(events);
    });

    let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let handle = PollingFallback::spawn(
        client,
        state_rx,
        since,
        Duration::from_millis(50),
        sink,
    );

    // Let a few polls fail; the watermark must not advance.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(failing.hits_async().await >= 2);
    assert!(received.lock().unwrap().is_empty());
    failing.delete_async().await;

    // The replacement mock only matches the original `since`, proving the
    // failed polls retried the same window.
    let recovered = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/events")
                .query_param("since", since.to_rfc3339());
            then.status(200)
                .json_body(json!({"events": [event_json("evt-1", "2026-08-29T10:05:00Z")]}));
        })
        .await;

    let deadline = timeout(Duration::from_secs(2), async {
        loop {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(deadline.is_ok(), "recovery poll never delivered events");
    assert!(recovered.hits_async().await >= 1);
    assert_eq!(received.lock().unwrap()[0].id, "evt-1");

    handle.abort();
}

// ============================================================================
// Broadcaster end to end
// ============================================================================

#[tokio::test]
async fn broadcaster_degrades_to_polling_when_stream_is_down() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/events/stream");
            then.status(503).body("stream offline");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/events");
            then.status(200)
                .json_body(json!({"events": [event_json("evt-1", "2026-08-29T10:05:00Z")]}));
        })
        .await;

    let config = config_for(&server)
        .with_max_retries(0)
        .with_poll_interval(Duration::from_millis(50));
    let transport = Arc::new(SseTransport::new(&config).unwrap());
    let broadcaster = TenantBroadcaster::new(
        config,
        transport,
        SharedTenant::fixed(VALID_TENANT),
        PollUrgency::High,
    )
    .unwrap();

    let mut rx = broadcaster.subscribe();
    broadcaster.start();

    // The stream fails fast, the manager settles to disconnected, and the
    // polling fallback feeds the same subscriber channel.
    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within timeout")
        .unwrap();
    assert_eq!(event.id, "evt-1");
    assert_eq!(broadcaster.state(), ConnectionState::Disconnected);
}
