//! Fake content sources for download tests
//!
//! [`FakeStation`] stands in for a station's tunnel, [`FakeContentHosts`]
//! for the cloud's content hosts. Bodies can be cut short with a transport
//! error to simulate a connection dropping mid-transfer.

use arlo_core::{ByteStream, TransportError};
use arlo_media::{HostClient, HostClientFactory, LocalStorage, TransferError};
use arlo_ratls::TunnelError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Clone)]
struct Body {
    chunks: Vec<Bytes>,
    truncated: bool,
}

impl Body {
    fn stream(self, path: &str) -> ByteStream {
        let tail = self.truncated.then(|| {
            Err(TransportError::Envelope {
                path: path.to_string(),
                message: "connection reset".to_string(),
            })
        });
        futures::stream::iter(self.chunks.into_iter().map(Ok).chain(tail)).boxed()
    }
}

/// Station storage serving scripted listings and bodies
#[derive(Default)]
pub struct FakeStation {
    listings: Mutex<HashMap<String, Value>>,
    bodies: Mutex<HashMap<String, Body>>,
    listed: Mutex<Vec<String>>,
    downloads: Mutex<Vec<String>>,
}

impl FakeStation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer listings of `path` with `items`; unscripted listings are null
    pub fn list(&self, path: &str, items: Value) {
        self.listings.lock().insert(path.to_string(), items);
    }

    pub fn serve(&self, path: &str, chunks: Vec<Bytes>) {
        self.bodies.lock().insert(
            path.to_string(),
            Body {
                chunks,
                truncated: false,
            },
        );
    }

    /// Serve `chunks`, then fail the stream
    pub fn serve_truncated(&self, path: &str, chunks: Vec<Bytes>) {
        self.bodies.lock().insert(
            path.to_string(),
            Body {
                chunks,
                truncated: true,
            },
        );
    }

    /// Listing paths requested, in order
    pub fn listed(&self) -> Vec<String> {
        self.listed.lock().clone()
    }

    /// Download paths requested, in order
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }
}

#[async_trait]
impl LocalStorage for FakeStation {
    async fn list(&self, path: &str) -> Result<Value, TunnelError> {
        self.listed.lock().push(path.to_string());
        Ok(self.listings.lock().get(path).cloned().unwrap_or(Value::Null))
    }

    async fn download(&self, path: &str) -> Result<ByteStream, TunnelError> {
        self.downloads.lock().push(path.to_string());
        let body = self
            .bodies
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| TunnelError::Status {
                path: path.to_string(),
                status: 404,
            })?;
        Ok(body.stream(path))
    }
}

#[derive(Default)]
struct HostState {
    bodies: Mutex<HashMap<String, Body>>,
    statuses: Mutex<HashMap<String, u16>>,
    transient: Mutex<HashMap<String, (u16, usize)>>,
    rotations: AtomicUsize,
    built: Mutex<Vec<String>>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Mutex<Duration>,
}

/// Content hosts keyed by full URL; counts the clients built per host
#[derive(Default, Clone)]
pub struct FakeContentHosts {
    state: Arc<HostState>,
}

impl FakeContentHosts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, chunks: Vec<Bytes>) {
        self.state.bodies.lock().insert(
            url.to_string(),
            Body {
                chunks,
                truncated: false,
            },
        );
    }

    /// Serve `chunks`, then fail the stream
    pub fn serve_truncated(&self, url: &str, chunks: Vec<Bytes>) {
        self.state.bodies.lock().insert(
            url.to_string(),
            Body {
                chunks,
                truncated: true,
            },
        );
    }

    /// Answer `url` with `status` and no body
    pub fn fail(&self, url: &str, status: u16) {
        self.state.statuses.lock().insert(url.to_string(), status);
    }

    /// Answer `url` with `status` for the next `times` requests
    pub fn fail_times(&self, url: &str, status: u16, times: usize) {
        self.state
            .transient
            .lock()
            .insert(url.to_string(), (status, times));
    }

    /// User-agent rotations asked of any client
    pub fn rotations(&self) -> usize {
        self.state.rotations.load(Ordering::SeqCst)
    }

    /// Hold every request open for `latency` before answering
    pub fn with_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    /// Hosts a client was built for, in order
    pub fn built(&self) -> Vec<String> {
        self.state.built.lock().clone()
    }

    /// URLs requested, in order
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().clone()
    }

    /// Most requests ever open at once
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl HostClientFactory for FakeContentHosts {
    fn client_for(&self, host: &str) -> Result<Arc<dyn HostClient>, TransferError> {
        self.state.built.lock().push(host.to_string());
        Ok(Arc::new(FakeHostClient {
            state: self.state.clone(),
        }))
    }
}

struct FakeHostClient {
    state: Arc<HostState>,
}

#[async_trait]
impl HostClient for FakeHostClient {
    async fn get_stream(&self, url: &Url) -> Result<ByteStream, TransferError> {
        let key = url.to_string();
        self.state.requests.lock().push(key.clone());

        let current = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let latency = *self.state.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let transient = {
            let mut transient = self.state.transient.lock();
            match transient.get_mut(&key) {
                Some((status, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*status)
                }
                _ => None,
            }
        };
        if let Some(status) = transient {
            return Err(TransferError::Status { url: key, status });
        }
        if let Some(status) = self.state.statuses.lock().get(&key).copied() {
            return Err(TransferError::Status { url: key, status });
        }
        let body = self.state.bodies.lock().get(&key).cloned();
        match body {
            Some(body) => Ok(body.stream(&key)),
            None => Err(TransferError::Status {
                url: key,
                status: 404,
            }),
        }
    }

    fn rotate_user_agent(&self) {
        self.state.rotations.fetch_add(1, Ordering::SeqCst);
    }
}
