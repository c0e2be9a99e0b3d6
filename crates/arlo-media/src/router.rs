//! Per-item download routing
//!
//! Local items go through the station's tunnel as
//! `/hmsls/download/<content path>`. Cloud items are fetched from their
//! absolute URL with one HTTP client per remote host, so connections and
//! cookies are shared by every item on that host. Cloud requests follow the
//! transport's retry policy: refused (403) and 5xx answers are retried after
//! a pause, and a 403 also rotates the host client's user agent.

use crate::errors::{Result, TransferError};
use crate::library::{DownloadTask, LocalStorage, MediaSource};
use arlo_core::{ByteStream, ClientConfig, ClientContext, TransportError, UserAgent};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Station path that serves local media
pub const LOCAL_DOWNLOAD_PATH: &str = "/hmsls/download";

/// Where an item's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Tunnel-relative path on the station
    Tunnel {
        /// Path under the station's download root
        path: String,
    },
    /// Absolute URL on a content host
    Cloud {
        /// Content URL, query included
        url: Url,
    },
}

/// Decide how `task` is fetched
pub fn route(task: &DownloadTask) -> Result<Route> {
    let content = &task.item.content_url;
    if content.is_empty() {
        return Err(TransferError::routing(content, "item has no content location"));
    }
    match task.source {
        MediaSource::Station(_) => Ok(Route::Tunnel {
            path: format!("{LOCAL_DOWNLOAD_PATH}/{}", content.trim_start_matches('/')),
        }),
        MediaSource::Cloud => {
            let url = Url::parse(content).map_err(|e| TransferError::routing(content, e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(TransferError::routing(content, "not an http(s) url"));
            }
            Ok(Route::Cloud { url })
        }
    }
}

/// Opens the body of a download task
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Open `task`'s body
    async fn fetch(&self, task: &DownloadTask) -> Result<ByteStream>;
}

/// HTTP client bound to one content host
#[async_trait]
pub trait HostClient: Send + Sync {
    /// GET `url`; non-2xx answers are [`TransferError::Status`]
    async fn get_stream(&self, url: &Url) -> Result<ByteStream>;

    /// Present a different user agent from the next request on
    fn rotate_user_agent(&self) {}
}

/// Retry policy for cloud content requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Tries per item, first one included
    pub max_attempts: u32,
    /// Pause before each retry
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A single try
    pub const NONE: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        backoff: Duration::ZERO,
    };

    /// The transport's policy from `config`
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_request_attempts.max(1),
            backoff: config.forbidden_backoff,
        }
    }
}

fn is_retryable(error: &TransferError) -> Option<u16> {
    match error {
        TransferError::Status { status, .. } if *status == 403 || *status >= 500 => Some(*status),
        _ => None,
    }
}

/// Builds the client for a host the first time it is seen
pub trait HostClientFactory: Send + Sync {
    /// Client for `host`
    fn client_for(&self, host: &str) -> Result<Arc<dyn HostClient>>;
}

/// reqwest client for one content host, with its own cookie jar
pub struct CloudDownloader {
    client: reqwest::Client,
    host: String,
    user_agent: Mutex<UserAgent>,
}

impl CloudDownloader {
    /// Client for `host` presenting `user_agent` until rotated
    pub fn new(host: impl Into<String>, user_agent: UserAgent, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(TransportError::Http)?;
        Ok(Self {
            client,
            host: host.into(),
            user_agent: Mutex::new(user_agent),
        })
    }

    /// Host this client serves
    pub fn host(&self) -> &str {
        &self.host
    }

    /// User agent profile currently presented
    pub fn user_agent(&self) -> UserAgent {
        *self.user_agent.lock()
    }
}

#[async_trait]
impl HostClient for CloudDownloader {
    async fn get_stream(&self, url: &Url) -> Result<ByteStream> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, self.user_agent().header_value())
            .send()
            .await
            .map_err(TransportError::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes_stream().map_err(TransportError::Http).boxed())
    }

    fn rotate_user_agent(&self) {
        *self.user_agent.lock() = UserAgent::random();
    }
}

/// Factory for [`CloudDownloader`]s
#[derive(Debug, Clone, Copy)]
pub struct HttpClientFactory {
    user_agent: UserAgent,
    connect_timeout: Duration,
}

impl HttpClientFactory {
    /// Factory whose clients start with `user_agent`
    pub fn new(user_agent: UserAgent, connect_timeout: Duration) -> Self {
        Self {
            user_agent,
            connect_timeout,
        }
    }
}

impl HostClientFactory for HttpClientFactory {
    fn client_for(&self, host: &str) -> Result<Arc<dyn HostClient>> {
        Ok(Arc::new(CloudDownloader::new(
            host,
            self.user_agent,
            self.connect_timeout,
        )?))
    }
}

/// Routes tasks to the tunnel or to a per-host cloud client
pub struct Router {
    tunnel: Option<Arc<dyn LocalStorage>>,
    factory: Arc<dyn HostClientFactory>,
    clients: Mutex<HashMap<String, Arc<dyn HostClient>>>,
    retry: RetryPolicy,
}

impl Router {
    /// Cloud-only router using the context's user agent, request timeout and
    /// retry policy
    pub fn new(ctx: &ClientContext) -> Self {
        Self::with_factory(Arc::new(HttpClientFactory::new(
            ctx.config.user_agent,
            ctx.config.request_timeout,
        )))
        .with_retry(RetryPolicy::from_config(&ctx.config))
    }

    /// Router over `factory`'s clients, trying each cloud item once
    pub fn with_factory(factory: Arc<dyn HostClientFactory>) -> Self {
        Self {
            tunnel: None,
            factory,
            clients: Mutex::new(HashMap::new()),
            retry: RetryPolicy::NONE,
        }
    }

    /// Retry refused and failing cloud requests per `policy`
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Serve local items through `tunnel`
    pub fn with_tunnel(mut self, tunnel: Arc<dyn LocalStorage>) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    /// Number of distinct content hosts seen so far
    pub fn host_clients(&self) -> usize {
        self.clients.lock().len()
    }

    fn client_for(&self, url: &Url) -> Result<Arc<dyn HostClient>> {
        let host = url.host_str().unwrap_or_default();
        let key = match url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        debug!(host = %key, "new content host client");
        let client = self.factory.client_for(host)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl MediaFetcher for Router {
    async fn fetch(&self, task: &DownloadTask) -> Result<ByteStream> {
        match route(task)? {
            Route::Tunnel { path } => {
                let tunnel = self.tunnel.as_ref().ok_or_else(|| {
                    TransferError::routing(&task.item.content_url, "no tunnel to the station")
                })?;
                Ok(tunnel.download(&path).await?)
            }
            Route::Cloud { url } => self.fetch_cloud(&url).await,
        }
    }
}

impl Router {
    async fn fetch_cloud(&self, url: &Url) -> Result<ByteStream> {
        let client = self.client_for(url)?;
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match client.get_stream(url).await {
                Ok(stream) => return Ok(stream),
                Err(e) => e,
            };
            match is_retryable(&error) {
                Some(status) if attempt < attempts => {
                    warn!(url = %url, status, attempt, "content request refused, retrying");
                    if status == 403 {
                        client.rotate_user_agent();
                    }
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                _ => return Err(error),
            }
        }
    }
}
