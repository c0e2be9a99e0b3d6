//! Event bus
//!
//! Owns the single push-stream connection of a session, decodes its frames
//! and publishes payloads into the pending transaction table by correlation
//! key. [`EventBus::run`] keeps the stream alive: every disconnect or idle
//! read timeout is followed by an immediate reconnect that resumes from the
//! last event id seen.

use crate::errors::{EventError, Result};
use crate::frame::{FrameDecoder, StreamEvent};
use crate::pending::{Delivery, PendingTable};
use arlo_core::{
    ApiRequest, ByteStream, EventsConfig, ShutdownSignal, TaskRegistry, Transport, TransportResult,
};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Subscription endpoint of the push stream
pub const SUBSCRIBE_PATH: &str = "/hmsweb/client/subscribe";

/// Key under which bare status events are published
pub const STATUS_KEY: &str = "status";

/// Something that can open the push stream
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open the stream, resuming after `last_event_id` when given
    async fn open(&self, last_event_id: Option<String>) -> TransportResult<ByteStream>;
}

/// Push stream served by the cloud API's subscription endpoint
pub struct CloudEventSource {
    transport: Arc<dyn Transport>,
}

impl CloudEventSource {
    /// Source reading the subscription over `transport`
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl EventSource for CloudEventSource {
    async fn open(&self, last_event_id: Option<String>) -> TransportResult<ByteStream> {
        let mut request = ApiRequest::get(SUBSCRIBE_PATH)
            .with_header("Accept", "text/event-stream")
            .with_header("Cache-Control", "no-cache");
        if let Some(id) = last_event_id {
            request = request.with_header("Last-Event-ID", id);
        }
        self.transport.open_stream(request).await
    }
}

/// Lifecycle of the push connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection open
    Disconnected,
    /// Stream requested, no body yet
    Connecting,
    /// Receiving frames
    Streaming,
}

/// Demultiplexer for the session's push stream
pub struct EventBus {
    source: Arc<dyn EventSource>,
    pending: PendingTable,
    last_event_id: Mutex<Option<String>>,
    state_tx: watch::Sender<ConnectionState>,
    idle_timeout: Duration,
    running: AtomicBool,
    connect_attempts: AtomicU64,
}

impl EventBus {
    /// Create a bus reading from `source`
    pub fn new(source: Arc<dyn EventSource>, config: &EventsConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            source,
            pending: PendingTable::new(config.unclaimed_ttl),
            last_event_id: Mutex::new(None),
            state_tx,
            idle_timeout: config.idle_timeout,
            running: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
        }
    }

    /// Spawn [`EventBus::run`] on `tasks`. A bus runs at most once.
    pub fn start(self: &Arc<Self>, tasks: &TaskRegistry) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EventError::AlreadyRunning);
        }
        let bus = Arc::clone(self);
        let shutdown = tasks.shutdown_signal();
        tasks.spawn_cancellable(async move { bus.run(shutdown).await });
        Ok(())
    }

    /// Keep the stream connected until `shutdown` fires.
    ///
    /// Reconnects immediately after any failure; the stream is long-poll
    /// style and a drop is its normal way of ending. Cancellation drops the
    /// in-flight connection rather than waiting for it to notice.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.connect() => match result {
                    Ok(()) => debug!("event stream closed by server, reconnecting"),
                    Err(e) => warn!(error = %e, "event stream disconnected, reconnecting"),
                },
            }
            tokio::task::yield_now().await;
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
        self.pending.close();
        info!("event bus stopped");
    }

    /// Open the stream once and dispatch frames until it ends.
    ///
    /// Returns `Ok` when the server closes the body cleanly.
    pub async fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.state_tx.send_replace(ConnectionState::Connecting);
        let last_event_id = self.last_event_id();
        debug!(?last_event_id, "event stream connecting");

        let result = self.stream_frames(last_event_id).await;
        self.state_tx.send_replace(ConnectionState::Disconnected);
        result
    }

    async fn stream_frames(&self, last_event_id: Option<String>) -> Result<()> {
        let mut stream = self.source.open(last_event_id).await?;
        self.state_tx.send_replace(ConnectionState::Streaming);
        info!("event stream connected");

        let mut decoder = FrameDecoder::new();
        loop {
            let chunk = match tokio::time::timeout(self.idle_timeout, stream.next()).await {
                Err(_) => return Err(EventError::stream("read timeout")),
                Ok(None) => return Ok(()),
                Ok(Some(chunk)) => chunk?,
            };
            for event in decoder.push(&chunk) {
                self.dispatch(event);
            }
        }
    }

    /// Route one decoded event into the pending table.
    ///
    /// A `transId` field keys the payload by correlation id; otherwise a
    /// `status` field is published under [`STATUS_KEY`]. Everything else is
    /// ignored.
    pub fn dispatch(&self, event: StreamEvent) -> Option<Delivery> {
        if let Some(id) = &event.id {
            *self.last_event_id.lock() = Some(id.clone());
        }
        if !event.is_message() {
            debug!(event = ?event.event, "ignoring non-message event");
            return None;
        }
        debug!(data = %event.data, "received event");

        let data = event.data;
        if let Some(trans_id) = data.get("transId").and_then(Value::as_str) {
            let key = trans_id.to_string();
            let delivery = self.pending.publish(&key, data);
            debug!(trans_id = %key, ?delivery, "published event");
            return Some(delivery);
        }
        if let Some(status) = data.get(STATUS_KEY) {
            let delivery = self.pending.publish(STATUS_KEY, status.clone());
            debug!(?delivery, "published status event");
            return Some(delivery);
        }
        None
    }

    /// Block until a payload is published under `key`, consuming it
    pub async fn wait_for_event(&self, key: &str, timeout: Option<Duration>) -> Result<Value> {
        self.pending.wait(key, timeout).await
    }

    /// Fail parked waiters and refuse new ones
    pub fn close(&self) {
        self.pending.close();
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Observe connection state changes
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Id of the last event received, sent on reconnect
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }

    /// Number of times the stream has been opened
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// The pending transaction table
    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }
}
