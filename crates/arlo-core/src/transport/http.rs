//! reqwest-backed cloud transport
//!
//! Builds the service's default headers from the current credentials,
//! retries refused (403) and 5xx answers with a pause, rotating the user
//! agent on 403, and folds `Set-Cookie` values into later requests.

use super::{ApiRequest, ApiResponse, ByteStream, Method, Transport, UserAgent};
use crate::config::ClientConfig;
use crate::credentials::CredentialSource;
use crate::errors::{CoreError, TransportError, TransportResult};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Cloud API transport over HTTPS
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    origin: String,
    referer: String,
    request_timeout: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
    credentials: Arc<dyn CredentialSource>,
    user_agent: Mutex<UserAgent>,
    cookies: Mutex<BTreeMap<String, String>>,
}

impl HttpTransport {
    /// Create a transport for the configured API host
    pub fn new(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, CoreError> {
        let base_url = Url::parse(&config.api_host).map_err(|e| CoreError::InvalidConfig {
            field: "api_host",
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self {
            client,
            base_url,
            origin: config.origin.clone(),
            referer: config.referer.clone(),
            request_timeout: config.request_timeout,
            max_attempts: config.max_request_attempts.max(1),
            retry_backoff: config.forbidden_backoff,
            credentials,
            user_agent: Mutex::new(config.user_agent),
            cookies: Mutex::new(BTreeMap::new()),
        })
    }

    /// User agent profile currently presented
    pub fn user_agent(&self) -> UserAgent {
        *self.user_agent.lock()
    }

    fn default_headers(&self) -> TransportResult<HeaderMap> {
        let creds = self.credentials.credentials();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(self.user_agent().header_value()),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert("auth-version", HeaderValue::from_static("2"));
        headers.insert("schemaversion", HeaderValue::from_static("1"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::AUTHORIZATION, header_value("authorization", &creds.token)?);
        headers.insert(header::ORIGIN, header_value("origin", &self.origin)?);
        headers.insert(header::REFERER, header_value("referer", &self.referer)?);

        let cookies = self.cookies.lock();
        if !cookies.is_empty() {
            let joined = cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert(header::COOKIE, header_value("cookie", &joined)?);
        }
        Ok(headers)
    }

    fn build(&self, request: &ApiRequest, timeout: Option<Duration>) -> TransportResult<reqwest::RequestBuilder> {
        let url = self
            .base_url
            .join(&request.path)
            .map_err(|source| TransportError::Url {
                path: request.path.clone(),
                source,
            })?;

        let mut headers = self.default_headers()?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::Header { name: name.clone() })?;
            headers.insert(name.clone(), header_value(name.as_str(), value)?);
        }

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder)
    }

    fn capture_cookies(&self, headers: &HeaderMap) -> Vec<String> {
        let pairs: Vec<String> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(cookie_pair)
            .collect();

        if !pairs.is_empty() {
            let mut cookies = self.cookies.lock();
            for pair in &pairs {
                if let Some((name, value)) = pair.split_once('=') {
                    cookies.insert(name.to_string(), value.to_string());
                }
            }
        }
        pairs
    }

    fn map_send_error(path: &str, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                path: path.to_string(),
            }
        } else {
            TransportError::Http(error)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> TransportResult<ApiResponse> {
        let timeout = request.timeout.unwrap_or(self.request_timeout);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                method = request.method.as_str(),
                path = %request.path,
                attempt,
                "sending request"
            );

            let response = self
                .build(&request, Some(timeout))?
                .send()
                .await
                .map_err(|e| Self::map_send_error(&request.path, e))?;
            let set_cookies = self.capture_cookies(response.headers());
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| Self::map_send_error(&request.path, e))?;

            let retryable = status == 403 || status >= 500;
            if retryable && attempt < self.max_attempts {
                warn!(path = %request.path, status, attempt, "request refused, retrying");
                debug!(body = %String::from_utf8_lossy(&body), "refused response body");
                if status == 403 {
                    *self.user_agent.lock() = UserAgent::random();
                }
                tokio::time::sleep(self.retry_backoff).await;
                continue;
            }

            if !(200..300).contains(&status) {
                warn!(path = %request.path, status, "request failed");
            }
            return Ok(ApiResponse {
                status,
                body,
                set_cookies,
            });
        }
    }

    async fn open_stream(&self, request: ApiRequest) -> TransportResult<ByteStream> {
        debug!(path = %request.path, "opening stream");
        let response = self
            .build(&request, request.timeout)?
            .send()
            .await
            .map_err(|e| Self::map_send_error(&request.path, e))?;
        self.capture_cookies(response.headers());

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                method: request.method.as_str(),
                path: request.path,
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes_stream().map_err(TransportError::from).boxed())
    }
}

fn header_value(name: &str, value: &str) -> TransportResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| TransportError::Header {
        name: name.to_string(),
    })
}

/// `name=value` portion of a `Set-Cookie` header
fn cookie_pair(raw: &str) -> Option<String> {
    let pair = raw.split(';').next()?.trim();
    if pair.contains('=') && !pair.starts_with('=') {
        Some(pair.to_string())
    } else {
        None
    }
}
