//! Cloud transport abstraction
//!
//! Everything above this layer talks to the service through [`Transport`],
//! which lets tests script responses and keeps reqwest out of the protocol
//! code.

mod envelope;
mod http;
mod user_agent;

pub use envelope::unwrap_envelope;
pub use http::HttpTransport;
pub use user_agent::UserAgent;

use crate::errors::{TransportError, TransportResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use std::time::Duration;

/// Body stream of a streaming response
pub type ByteStream = BoxStream<'static, TransportResult<Bytes>>;

/// HTTP method subset used by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
}

impl Method {
    /// Upper-case method name
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// One request against the cloud API
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Method
    pub method: Method,
    /// Path relative to the API host, or an absolute URL
    pub path: String,
    /// JSON body, if any
    pub body: Option<Value>,
    /// Extra headers layered over the transport defaults
    pub headers: Vec<(String, String)>,
    /// Override of the transport's request timeout
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    /// POST request with a JSON body
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
            headers: Vec::new(),
            timeout: None,
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Override the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of a header previously added to this request
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw answer to an [`ApiRequest`]
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Full response body
    pub body: Bytes,
    /// `name=value` pairs taken from `Set-Cookie` headers
    pub set_cookies: Vec<String>,
}

impl ApiResponse {
    /// Response with a JSON body and no cookies
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: Bytes::from(body.to_string()),
            set_cookies: Vec::new(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request/response access to the cloud API.
///
/// `send` returns whatever the service answered, after the implementation's
/// own retry policy; the provided methods layer status checks and envelope
/// unwrapping on top.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a request and return the raw response, whatever its status
    async fn send(&self, request: ApiRequest) -> TransportResult<ApiResponse>;

    /// Open a streaming response. Non-2xx statuses are errors.
    async fn open_stream(&self, request: ApiRequest) -> TransportResult<ByteStream>;

    /// Perform a request that must succeed with a 2xx status
    async fn send_ok(&self, request: ApiRequest) -> TransportResult<ApiResponse> {
        let method = request.method.as_str();
        let path = request.path.clone();
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(TransportError::Status {
                method,
                path,
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        Ok(response)
    }

    /// Perform a request and return the unwrapped JSON payload
    async fn call(&self, request: ApiRequest) -> TransportResult<Value> {
        let path = request.path.clone();
        let response = self.send_ok(request).await?;
        let body: Value =
            serde_json::from_slice(&response.body).map_err(|e| TransportError::Envelope {
                path: path.clone(),
                message: format!("body is not JSON: {e}"),
            })?;
        unwrap_envelope(&path, body)
    }
}
