//! Command correlation
//!
//! Device commands are fire-and-forget HTTP posts; the device answers later
//! on the push stream with an event carrying the same `transId`. The
//! correlator stamps each command with a fresh id and, when asked, waits on
//! the bus for that id.

use crate::bus::EventBus;
use crate::errors::Result;
use arlo_core::{ApiRequest, CredentialSource, Device, Transport};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Command endpoint; the target device id is appended
pub const NOTIFY_PATH: &str = "/hmsweb/users/devices/notify";

/// Prefix of every generated correlation id
pub const TRANSACTION_PREFIX: &str = "web";

/// Fresh correlation id, `web!<uuid>`
pub fn generate_transaction_id() -> String {
    format!("{TRANSACTION_PREFIX}!{}", Uuid::new_v4())
}

/// What a command call returns once the send succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    /// Return the correlation id as soon as the cloud accepts the command
    Response,
    /// Wait for the device's confirmation event, optionally bounded
    Event(Option<Duration>),
}

/// Result of [`CommandCorrelator::notify`]
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyOutcome {
    /// The command was accepted; carries its correlation id
    Sent(String),
    /// The matched confirmation payload
    Event(Value),
}

impl NotifyOutcome {
    /// Confirmation payload, if this outcome waited for one
    pub fn into_event(self) -> Option<Value> {
        match self {
            NotifyOutcome::Event(payload) => Some(payload),
            NotifyOutcome::Sent(_) => None,
        }
    }
}

/// Sends device commands and matches them to their confirmations
#[derive(Clone)]
pub struct CommandCorrelator {
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    credentials: Arc<dyn CredentialSource>,
}

impl CommandCorrelator {
    /// Correlator sending over `transport` and matching replies seen on `bus`
    pub fn new(
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            transport,
            bus,
            credentials,
        }
    }

    /// Send `params` to `target` under a freshly generated correlation id
    pub async fn notify(
        &self,
        target: &Device,
        params: Map<String, Value>,
        wait_for: WaitFor,
    ) -> Result<NotifyOutcome> {
        self.notify_with_id(target, params, generate_transaction_id(), wait_for)
            .await
    }

    /// Send `params` to `target` under `trans_id`.
    ///
    /// `to` and `transId` are always overwritten; `from` defaults to the
    /// session's web actor. The send must return 2xx before any wait is
    /// registered, so a rejected command never leaves a waiter behind.
    pub async fn notify_with_id(
        &self,
        target: &Device,
        mut params: Map<String, Value>,
        trans_id: String,
        wait_for: WaitFor,
    ) -> Result<NotifyOutcome> {
        params.insert("to".into(), Value::String(target.device_id.clone()));
        params
            .entry("from")
            .or_insert_with(|| Value::String(self.credentials.credentials().web_id));
        params.insert("transId".into(), Value::String(trans_id.clone()));

        let action = params
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let request = ApiRequest::post(
            format!("{NOTIFY_PATH}/{}", target.device_id),
            Value::Object(params),
        )
        .with_header("xcloudId", target.xcloud_id.clone());

        self.transport.send_ok(request).await?;
        info!(device_id = %target.device_id, trans_id = %trans_id, action = %action, "command sent");

        match wait_for {
            WaitFor::Response => Ok(NotifyOutcome::Sent(trans_id)),
            WaitFor::Event(timeout) => {
                let payload = self.bus.wait_for_event(&trans_id, timeout).await?;
                debug!(trans_id = %trans_id, "command confirmed");
                Ok(NotifyOutcome::Event(payload))
            }
        }
    }

    /// The bus confirmations are read from
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_prefixed_and_unique() {
        let a = generate_transaction_id();
        let b = generate_transaction_id();
        assert!(a.starts_with("web!"));
        assert_eq!(a.len(), "web!".len() + 36);
        assert_ne!(a, b);
    }

    #[test]
    fn only_event_outcomes_carry_payloads() {
        assert_eq!(NotifyOutcome::Sent("web!1".into()).into_event(), None);
        assert_eq!(
            NotifyOutcome::Event(Value::Bool(true)).into_event(),
            Some(Value::Bool(true))
        );
    }
}
