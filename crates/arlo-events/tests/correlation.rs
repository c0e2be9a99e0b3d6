//! Command/event correlation through a running session

#![allow(clippy::unwrap_used)]

use arlo_events::{EventError, NotifyOutcome, Session, StreamEvent, WaitFor, NOTIFY_PATH};
use arlo_testkit::{
    context, init_tracing, station, test_config, ScriptedEventSource, ScriptedTransport,
};
use assert_matches::assert_matches;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;

fn notify_path() -> String {
    format!("{NOTIFY_PATH}/BS1")
}

fn session(transport: std::sync::Arc<ScriptedTransport>) -> Session {
    let ctx = context(test_config(Path::new("/tmp/arlo-test")), transport);
    Session::start_with_source(ctx, ScriptedEventSource::new()).unwrap()
}

#[tokio::test]
async fn notify_returns_the_matching_event() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.respond_json(&notify_path(), 200, json!({"success": true}));
    let session = session(transport.clone());

    let bus = session.bus().clone();
    transport.on_request(&notify_path(), move |_| {
        bus.dispatch(StreamEvent {
            id: Some("1".into()),
            event: None,
            data: json!({"transId": "web!abc", "status": "ok"}),
        });
    });

    let outcome = session
        .correlator()
        .notify_with_id(
            &station(),
            Map::new(),
            "web!abc".into(),
            WaitFor::Event(Some(Duration::from_secs(5))),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        NotifyOutcome::Event(json!({"transId": "web!abc", "status": "ok"}))
    );

    let sent = transport.requests_to(&notify_path());
    assert_eq!(sent.len(), 1);
    let body = sent[0].body.clone().unwrap();
    assert_eq!(body["to"], "BS1");
    assert_eq!(body["from"], "U1_web");
    assert_eq!(body["transId"], "web!abc");
    assert_eq!(sent[0].header("xcloudId"), Some("XC1"));
}

#[tokio::test]
async fn rejected_command_never_registers_a_wait() {
    let transport = ScriptedTransport::new();
    transport.respond_json(&notify_path(), 500, json!({"error": "boom"}));
    let session = session(transport.clone());

    let result = session
        .correlator()
        .notify(&station(), Map::new(), WaitFor::Event(None))
        .await;
    assert_matches!(result, Err(EventError::Transport(e)) if e.status() == Some(500));
    assert!(session.bus().pending().is_empty());
}

#[tokio::test]
async fn response_mode_returns_the_correlation_id() {
    let transport = ScriptedTransport::new();
    transport.respond_json(&notify_path(), 200, json!({}));
    let session = session(transport.clone());

    let outcome = session
        .correlator()
        .notify(&station(), Map::new(), WaitFor::Response)
        .await
        .unwrap();
    let NotifyOutcome::Sent(trans_id) = outcome else {
        panic!("expected a correlation id");
    };
    let body = transport.requests_to(&notify_path())[0].body.clone().unwrap();
    assert_eq!(body["transId"], Value::String(trans_id));
    assert!(session.bus().pending().is_empty());
}

#[tokio::test]
async fn unconfirmed_command_times_out_distinctly() {
    let transport = ScriptedTransport::new();
    transport.respond_json(&notify_path(), 200, json!({}));
    let session = session(transport);

    let err = session
        .correlator()
        .notify(
            &station(),
            Map::new(),
            WaitFor::Event(Some(Duration::from_millis(50))),
        )
        .await
        .unwrap_err();
    assert!(err.is_unconfirmed());
    assert!(session.bus().pending().is_empty());
}

#[tokio::test]
async fn subscribe_asks_for_station_events() {
    let transport = ScriptedTransport::new();
    transport.respond_json(&notify_path(), 200, json!({}));
    let session = session(transport.clone());

    session.subscribe(&station()).await.unwrap();

    let body = transport.requests_to(&notify_path())[0].body.clone().unwrap();
    assert_eq!(body["action"], "set");
    assert_eq!(body["resource"], "subscriptions/U1");
    assert_eq!(body["properties"]["devices"], json!(["BS1"]));
}

#[tokio::test]
async fn camera_commands_target_the_camera_resource() {
    let transport = ScriptedTransport::new();
    transport.respond_json(&notify_path(), 200, json!({}));
    let session = session(transport.clone());
    let camera = arlo_testkit::camera("CAM1", "Porch");

    session.stop_stream(&camera, &station()).await.unwrap();
    session.set_spotlight(&camera, &station(), true).await.unwrap();

    let sent = transport.requests_to(&notify_path());
    assert_eq!(sent.len(), 2);
    let stop = sent[0].body.clone().unwrap();
    assert_eq!(stop["resource"], "cameras/CAM1");
    assert_eq!(stop["properties"]["activityState"], "idle");
    let light = sent[1].body.clone().unwrap();
    assert_eq!(light["properties"]["spotlight"]["enabled"], true);
}

#[tokio::test]
async fn shutdown_fails_parked_waiters() {
    let transport = ScriptedTransport::new();
    let session = session(transport);
    let bus = session.bus().clone();

    let waiter = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.wait_for_event("web!never", None).await })
    };
    while !bus.pending().has_waiter("web!never") {
        tokio::task::yield_now().await;
    }

    session.shutdown();
    assert_matches!(waiter.await.unwrap(), Err(EventError::Closed));
}
