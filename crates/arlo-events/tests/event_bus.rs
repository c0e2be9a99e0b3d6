//! Event bus supervision against a scripted push stream

#![allow(clippy::unwrap_used)]

use arlo_core::{EventsConfig, TaskRegistry};
use arlo_events::{ConnectionState, EventBus, EventError};
use arlo_testkit::{init_tracing, message_frame, ScriptedEventSource};
use assert_matches::assert_matches;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn bus(source: Arc<ScriptedEventSource>) -> Arc<EventBus> {
    Arc::new(EventBus::new(source, &EventsConfig::default()))
}

#[tokio::test]
async fn reconnects_after_each_failure_until_the_stream_holds() {
    init_tracing();
    let source = ScriptedEventSource::new()
        .fail(3)
        .frames_then_hold(vec![message_frame("7", &json!({"transId": "web!x", "n": 1}))]);
    let bus = bus(source.clone());
    let tasks = TaskRegistry::new();
    bus.start(&tasks).unwrap();

    let payload = bus
        .wait_for_event("web!x", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(payload["n"], 1);
    assert_eq!(source.opens(), 4);
    assert_eq!(bus.connect_attempts(), 4);
    assert_eq!(bus.last_event_id().as_deref(), Some("7"));
    assert_eq!(*bus.state().borrow(), ConnectionState::Streaming);

    tasks.shutdown();
}

#[tokio::test]
async fn reconnect_resumes_from_the_last_event_id() {
    let source = ScriptedEventSource::new()
        .frames(vec![message_frame("41", &json!({"status": "connected"}))]);
    let bus = bus(source.clone());
    let tasks = TaskRegistry::new();
    bus.start(&tasks).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while source.opens() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(source.resume_ids()[0], None);
    assert_eq!(source.resume_ids()[1].as_deref(), Some("41"));
    assert_eq!(
        bus.wait_for_event("status", None).await.unwrap(),
        json!("connected")
    );

    tasks.shutdown();
}

#[tokio::test]
async fn frames_split_across_chunks_are_reassembled() {
    let frame = message_frame("1", &json!({"transId": "web!split", "ok": true}));
    let (head, tail) = frame.split_at(10);
    let source = ScriptedEventSource::new().frames_then_hold(vec![
        bytes::Bytes::copy_from_slice(head),
        bytes::Bytes::copy_from_slice(tail),
    ]);
    let bus = bus(source);
    let tasks = TaskRegistry::new();
    bus.start(&tasks).unwrap();

    let payload = bus
        .wait_for_event("web!split", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(payload["ok"], true);
    tasks.shutdown();
}

#[tokio::test]
async fn events_only_wake_their_own_key() {
    let source = ScriptedEventSource::new();
    let bus = bus(source);

    let keys: Vec<String> = (0..8).map(|i| format!("web!k{i}")).collect();
    let waiters: Vec<_> = keys
        .iter()
        .map(|key| {
            let bus = bus.clone();
            let key = key.clone();
            tokio::spawn(async move { bus.wait_for_event(&key, Some(Duration::from_secs(5))).await })
        })
        .collect();
    for key in &keys {
        while !bus.pending().has_waiter(key) {
            tokio::task::yield_now().await;
        }
    }

    for key in keys.iter().rev() {
        bus.pending().publish(key, json!({ "key": key }));
    }
    for (key, waiter) in keys.iter().zip(waiters) {
        assert_eq!(waiter.await.unwrap().unwrap()["key"], json!(key));
    }
    assert!(bus.pending().is_empty());
}

#[tokio::test]
async fn late_event_after_timeout_is_claimable() {
    let bus = bus(ScriptedEventSource::new());
    let result = bus
        .wait_for_event("web!late", Some(Duration::from_millis(20)))
        .await;
    assert_matches!(result, Err(EventError::CorrelationTimeout { .. }));

    bus.pending().publish("web!late", json!("late"));
    let claimed = tokio::time::timeout(
        Duration::from_secs(1),
        bus.wait_for_event("web!late", None),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(claimed, json!("late"));
}

#[tokio::test]
async fn shutdown_stops_reconnecting() {
    let source = ScriptedEventSource::new();
    let bus = bus(source.clone());
    let tasks = TaskRegistry::new();
    bus.start(&tasks).unwrap();
    while source.opens() < 1 {
        tokio::task::yield_now().await;
    }

    tasks.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.opens(), 1);
}
