//! Session wiring
//!
//! A [`Session`] owns the event bus task for its lifetime and exposes the
//! correlator plus the handful of account-level commands built on it.
//! Dropping the session stops the bus and fails any parked waiters.

use crate::bus::{CloudEventSource, EventBus, EventSource};
use crate::correlator::{CommandCorrelator, NotifyOutcome, WaitFor};
use crate::errors::Result;
use arlo_core::{ApiRequest, ClientContext, Device, TaskRegistry};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Session bootstrap endpoint
pub const SESSION_PATH: &str = "/hmsweb/users/session/v2";

const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Live session: event bus, correlator and their background task
pub struct Session {
    ctx: ClientContext,
    bus: Arc<EventBus>,
    correlator: CommandCorrelator,
    tasks: TaskRegistry,
    details: Option<Value>,
}

impl Session {
    /// Fetch the session record, then start the bus on the cloud push stream
    pub async fn open(ctx: ClientContext) -> Result<Self> {
        debug!("starting session");
        let details = ctx
            .transport
            .call(ApiRequest::get(SESSION_PATH).with_timeout(SESSION_TIMEOUT))
            .await?;
        let source = Arc::new(CloudEventSource::new(ctx.transport.clone()));
        let mut session = Self::start_with_source(ctx, source)?;
        session.details = Some(details);
        Ok(session)
    }

    /// Start the bus on an arbitrary event source. Must run inside a runtime.
    pub fn start_with_source(ctx: ClientContext, source: Arc<dyn EventSource>) -> Result<Self> {
        let bus = Arc::new(EventBus::new(source, &ctx.config.events));
        let correlator =
            CommandCorrelator::new(ctx.transport.clone(), bus.clone(), ctx.credentials.clone());
        let tasks = TaskRegistry::new();
        bus.start(&tasks)?;
        info!(user_id = %ctx.credentials().user_id, "session started");
        Ok(Self {
            ctx,
            bus,
            correlator,
            tasks,
            details: None,
        })
    }

    /// Ask the cloud to push `station`'s events to this session
    pub async fn subscribe(&self, station: &Device) -> Result<NotifyOutcome> {
        debug!(device_id = %station.device_id, "subscribing to device events");
        let params = object(json!({
            "action": "set",
            "resource": format!("subscriptions/{}", station.user_id),
            "properties": { "devices": [station.device_id] },
        }));
        self.correlator
            .notify(station, params, WaitFor::Response)
            .await
    }

    /// Return `camera` to idle, ending any user stream
    pub async fn stop_stream(&self, camera: &Device, station: &Device) -> Result<NotifyOutcome> {
        info!(camera = %camera, "stopping stream");
        let params = object(json!({
            "action": "set",
            "properties": { "activityState": "idle" },
            "publishResponse": true,
            "resource": camera.resource_id(),
        }));
        self.correlator
            .notify(station, params, WaitFor::Response)
            .await
    }

    /// Switch `camera`'s spotlight
    pub async fn set_spotlight(
        &self,
        camera: &Device,
        station: &Device,
        on: bool,
    ) -> Result<NotifyOutcome> {
        info!(camera = %camera, on, "setting spotlight");
        let params = object(json!({
            "action": "set",
            "properties": { "spotlight": { "enabled": on } },
            "publishResponse": true,
            "resource": camera.resource_id(),
        }));
        self.correlator
            .notify(station, params, WaitFor::Response)
            .await
    }

    /// Stop the bus and fail parked waiters
    pub fn shutdown(&self) {
        if self.tasks.is_shutdown() {
            return;
        }
        self.tasks.shutdown();
        self.bus.close();
        info!("session stopped");
    }

    /// Command sender bound to this session's bus
    pub fn correlator(&self) -> &CommandCorrelator {
        &self.correlator
    }

    /// The session's event bus
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Shared client context
    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    /// Session record returned by the bootstrap call, when opened that way
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
