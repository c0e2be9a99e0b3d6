//! Tunnel negotiation
//!
//! ```text
//! Uninitialized ─▶ CertsEnsured ─▶ AccessEnabled ─▶ PortRequested ─▶ PortOpen ─▶ Verified
//!                                       ▲                                │
//!                                       └──── jiggle (probe failed) ◀────┘
//!                                                    │
//!                                                    └─▶ Degraded (attempts exhausted)
//! ```
//!
//! Each attempt re-checks remote access, fetches a fresh bearer token, asks
//! the device to open a port and waits for its confirmation on the event
//! bus, then probes the reported address. A probe failure disables remote
//! access and tries again after a jittered pause. Nothing retries across
//! calls to [`TunnelNegotiator::negotiate`].

use crate::api::RemoteAccessApi;
use crate::certificates::CertificateStore;
use crate::client::{MtlsConnector, TunnelConnector, TunnelEndpoint, TunnelHttp};
use crate::errors::{Result, TunnelError};
use arlo_core::{ByteStream, ClientContext, Device, TunnelConfig};
use arlo_events::{CommandCorrelator, WaitFor};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where a negotiation stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Nothing attempted yet
    Uninitialized,
    /// Key pair and certificates on disk
    CertsEnsured,
    /// Remote access switched on
    AccessEnabled,
    /// Port-open command sent, awaiting the station
    PortRequested,
    /// Station reported the port open
    PortOpen,
    /// Terminal success
    Verified,
    /// Terminal failure after every attempt
    Degraded,
}

/// Short-lived bearer token for requests over the tunnel
#[derive(Debug, Clone)]
struct BearerToken {
    value: String,
    expires_at: Instant,
}

impl BearerToken {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Negotiates a tunnel to one base station
pub struct TunnelNegotiator {
    station: Device,
    config: TunnelConfig,
    api: RemoteAccessApi,
    correlator: CommandCorrelator,
    certificates: Arc<CertificateStore>,
    connector: Arc<dyn TunnelConnector>,
    state_tx: watch::Sender<TunnelState>,
}

impl TunnelNegotiator {
    /// Negotiator for `station` using the context's tunnel settings
    pub fn new(
        ctx: &ClientContext,
        correlator: CommandCorrelator,
        certificates: Arc<CertificateStore>,
        station: Device,
    ) -> Self {
        let connector = Arc::new(MtlsConnector::new(
            ctx.config.user_agent,
            ctx.config.origin.clone(),
            ctx.config.request_timeout,
        ));
        let (state_tx, _) = watch::channel(TunnelState::Uninitialized);
        Self {
            api: RemoteAccessApi::new(ctx.transport.clone(), station.clone()),
            station,
            config: ctx.config.tunnel.clone(),
            correlator,
            certificates,
            connector,
            state_tx,
        }
    }

    /// Replace how tunnel clients are built
    pub fn with_connector(mut self, connector: Arc<dyn TunnelConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Current state
    pub fn state(&self) -> TunnelState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<TunnelState> {
        self.state_tx.subscribe()
    }

    /// Station being negotiated
    pub fn station(&self) -> &Device {
        &self.station
    }

    /// Run the state machine to `Verified`, or fail.
    ///
    /// Probe failures are retried up to `max_attempts` in total and then
    /// reported as [`TunnelError::Exhausted`]; every other failure ends the
    /// negotiation immediately.
    pub async fn negotiate(&self) -> Result<Tunnel> {
        self.transition(TunnelState::Uninitialized);
        let result = self.run().await;
        if result.is_err() {
            self.transition(TunnelState::Degraded);
        }
        result
    }

    async fn run(&self) -> Result<Tunnel> {
        let bundle = self
            .certificates
            .ensure_bundle(&self.station.unique_id, &self.api)
            .await?;
        self.transition(TunnelState::CertsEnsured);

        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            self.ensure_access().await?;
            self.transition(TunnelState::AccessEnabled);

            let mut token = self.fetch_token().await?;
            let endpoint = self.request_port().await?;
            self.transition(TunnelState::PortOpen);
            info!(
                device_id = %self.station.device_id,
                host = %endpoint.private_host,
                port = endpoint.port,
                "port opened"
            );

            let base_url = endpoint.base_url(self.config.public_endpoint)?;
            let client = self.connector.connect(&bundle, &base_url)?;
            if token.is_expired() {
                token = self.fetch_token().await?;
            }

            match client.probe(&token.value, self.config.probe_timeout).await {
                Ok(()) => {
                    self.transition(TunnelState::Verified);
                    info!(device_id = %self.station.device_id, url = %base_url, attempt, "tunnel verified");
                    return Ok(Tunnel {
                        device_id: self.station.device_id.clone(),
                        endpoint,
                        client,
                        api: self.api.clone(),
                        token: Mutex::new(token),
                        token_validity: self.config.token_validity,
                    });
                }
                Err(e) => {
                    let remaining = attempts - attempt;
                    warn!(
                        device_id = %self.station.device_id,
                        error = %e,
                        remaining,
                        "device not reachable, jiggling remote access"
                    );
                    // a failed jiggle must not cost the remaining attempts
                    if let Err(e) = self.api.disable().await {
                        warn!(device_id = %self.station.device_id, error = %e, "failed to disable remote access");
                    }
                    if remaining > 0 {
                        tokio::time::sleep(self.jiggle_pause()).await;
                    }
                }
            }
        }

        Err(TunnelError::Exhausted {
            device_id: self.station.device_id.clone(),
            attempts,
        })
    }

    async fn ensure_access(&self) -> Result<()> {
        let status = self.api.status().await?;
        if status.matches(self.config.public_endpoint) {
            debug!(device_id = %self.station.device_id, "remote access already enabled");
            return Ok(());
        }
        self.api.enable(self.config.public_endpoint).await?;
        tokio::time::sleep(self.config.settle_delay).await;
        Ok(())
    }

    async fn fetch_token(&self) -> Result<BearerToken> {
        let value = self.api.fetch_token().await?;
        Ok(BearerToken {
            value,
            expires_at: Instant::now() + self.config.token_validity,
        })
    }

    async fn request_port(&self) -> Result<TunnelEndpoint> {
        self.transition(TunnelState::PortRequested);
        info!(device_id = %self.station.device_id, "requesting port opening");
        let params: Map<String, Value> = match json!({
            "action": "open",
            "resource": "storage/ratls",
            "from": self.station.user_id,
            "publishResponse": true,
        }) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let payload = self
            .correlator
            .notify(
                &self.station,
                params,
                WaitFor::Event(Some(self.config.port_open_timeout)),
            )
            .await?
            .into_event()
            .unwrap_or_default();
        TunnelEndpoint::from_event(&payload)
    }

    fn jiggle_pause(&self) -> Duration {
        let jitter_ms = u64::try_from(self.config.jiggle_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.config.jiggle_delay + Duration::from_millis(jitter)
    }

    fn transition(&self, state: TunnelState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(device_id = %self.station.device_id, from = ?previous, to = ?state, "tunnel state");
        }
    }
}

/// A verified tunnel to one base station
pub struct Tunnel {
    device_id: String,
    endpoint: TunnelEndpoint,
    client: Arc<dyn TunnelHttp>,
    api: RemoteAccessApi,
    token: Mutex<BearerToken>,
    token_validity: Duration,
}

impl Tunnel {
    /// Station at the far end
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Host and port the station opened
    pub fn endpoint(&self) -> &TunnelEndpoint {
        &self.endpoint
    }

    /// `https://host:port` of the tunnel
    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// Current bearer token, re-fetched first when it has expired
    pub async fn token(&self) -> Result<String> {
        let current = self.token.lock().clone();
        if !current.is_expired() {
            return Ok(current.value);
        }
        debug!(device_id = %self.device_id, "tunnel token expired, refreshing");
        let value = self.api.fetch_token().await?;
        *self.token.lock() = BearerToken {
            value: value.clone(),
            expires_at: Instant::now() + self.token_validity,
        };
        Ok(value)
    }

    /// GET a JSON resource over the tunnel
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let token = self.token().await?;
        self.client.get_json(&token, path).await
    }

    /// GET a streamed resource over the tunnel
    pub async fn get_stream(&self, path: &str) -> Result<ByteStream> {
        let token = self.token().await?;
        self.client.get_stream(&token, path).await
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("device_id", &self.device_id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
