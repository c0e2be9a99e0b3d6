//! Fake tunnel clients
//!
//! Every client the connector hands out shares one state, so tests can
//! count probes across negotiation attempts.

use arlo_core::{ByteStream, TransportError};
use arlo_ratls::{CertificateBundle, TunnelConnector, TunnelError, TunnelHttp};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct State {
    probe_failures: AtomicUsize,
    probes: AtomicUsize,
    connects: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
    json: Mutex<HashMap<String, Value>>,
    bodies: Mutex<HashMap<String, Vec<Bytes>>>,
}

/// Connector whose clients fail the first N probes
#[derive(Default, Clone)]
pub struct FakeConnector {
    state: Arc<State>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` probes with an unreachable error
    pub fn fail_probes(&self, count: usize) {
        self.state.probe_failures.store(count, Ordering::SeqCst);
    }

    /// Serve `value` for GETs of `path`
    pub fn serve_json(&self, path: &str, value: Value) {
        self.state.json.lock().insert(path.to_string(), value);
    }

    /// Serve `chunks` as the streamed body of `path`
    pub fn serve_body(&self, path: &str, chunks: Vec<Bytes>) {
        self.state.bodies.lock().insert(path.to_string(), chunks);
    }

    pub fn probes(&self) -> usize {
        self.state.probes.load(Ordering::SeqCst)
    }

    /// Base URLs clients were built for
    pub fn connects(&self) -> Vec<String> {
        self.state.connects.lock().clone()
    }

    /// Bearer tokens presented, in order
    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().clone()
    }
}

impl TunnelConnector for FakeConnector {
    fn connect(
        &self,
        _bundle: &CertificateBundle,
        base_url: &str,
    ) -> Result<Arc<dyn TunnelHttp>, TunnelError> {
        self.state.connects.lock().push(base_url.to_string());
        Ok(Arc::new(FakeTunnel {
            state: self.state.clone(),
            base_url: base_url.to_string(),
        }))
    }
}

struct FakeTunnel {
    state: Arc<State>,
    base_url: String,
}

#[async_trait]
impl TunnelHttp for FakeTunnel {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn probe(&self, token: &str, _timeout: Duration) -> Result<(), TunnelError> {
        self.state.probes.fetch_add(1, Ordering::SeqCst);
        self.state.tokens.lock().push(token.to_string());
        let failing = self
            .state
            .probe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TunnelError::Probe {
                url: format!("{}/hmsls/connectivity", self.base_url),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn get_json(&self, token: &str, path: &str) -> Result<Value, TunnelError> {
        self.state.tokens.lock().push(token.to_string());
        self.state
            .json
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| TunnelError::Status {
                path: path.to_string(),
                status: 404,
            })
    }

    async fn get_stream(&self, token: &str, path: &str) -> Result<ByteStream, TunnelError> {
        self.state.tokens.lock().push(token.to_string());
        let chunks = self
            .state
            .bodies
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| TunnelError::Status {
                path: path.to_string(),
                status: 404,
            })?;
        Ok(futures::stream::iter(chunks.into_iter().map(Ok::<_, TransportError>)).boxed())
    }
}
