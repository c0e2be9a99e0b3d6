//! HTTP over the negotiated tunnel
//!
//! The device presents a certificate from the fleet's private PKI that no
//! public root vouches for, so server verification is off; trust runs the
//! other way, through the client certificate the device's backend issued.

use crate::certificates::CertificateBundle;
use crate::errors::{Result, TunnelError};
use arlo_core::{unwrap_envelope, ByteStream, TransportError, UserAgent};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Reachability probe path on the device
pub const CONNECTIVITY_PATH: &str = "/hmsls/connectivity";

/// Address pair the device opened a port on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    /// LAN address
    pub private_host: String,
    /// WAN address, when the device reported one
    pub public_host: Option<String>,
    /// Opened port
    pub port: u16,
}

impl TunnelEndpoint {
    /// Decode the `properties` of a port-open confirmation
    pub fn from_event(payload: &Value) -> Result<Self> {
        let properties = payload
            .get("properties")
            .ok_or(TunnelError::MissingProperty { field: "properties" })?;
        let private_host = properties
            .get("privateIP")
            .and_then(Value::as_str)
            .ok_or(TunnelError::MissingProperty { field: "privateIP" })?
            .to_string();
        let public_host = properties
            .get("publicIP")
            .and_then(Value::as_str)
            .map(str::to_string);
        let port = match properties.get("port") {
            Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or(TunnelError::MissingProperty { field: "port" })?;

        Ok(Self {
            private_host,
            public_host,
            port,
        })
    }

    /// `https://<host>:<port>` for the chosen addressing mode
    pub fn base_url(&self, public_endpoint: bool) -> Result<String> {
        let host = if public_endpoint {
            self.public_host
                .as_deref()
                .ok_or(TunnelError::MissingProperty { field: "publicIP" })?
        } else {
            &self.private_host
        };
        Ok(format!("https://{host}:{}", self.port))
    }
}

/// Requests against one tunnel endpoint
#[async_trait]
pub trait TunnelHttp: Send + Sync {
    /// Base URL requests are made against
    fn base_url(&self) -> &str;

    /// Check the endpoint answers at all within `timeout`
    async fn probe(&self, token: &str, timeout: Duration) -> Result<()>;

    /// GET `path` and return its unwrapped JSON payload
    async fn get_json(&self, token: &str, path: &str) -> Result<Value>;

    /// GET `path` and stream its body. Non-2xx statuses are errors.
    async fn get_stream(&self, token: &str, path: &str) -> Result<ByteStream>;
}

/// Builds a [`TunnelHttp`] for an endpoint once certificates are in hand
pub trait TunnelConnector: Send + Sync {
    fn connect(&self, bundle: &CertificateBundle, base_url: &str) -> Result<Arc<dyn TunnelHttp>>;
}

/// Connector producing [`MtlsTunnelClient`]s
#[derive(Debug, Clone)]
pub struct MtlsConnector {
    user_agent: UserAgent,
    origin: String,
    request_timeout: Duration,
}

impl MtlsConnector {
    /// Connector whose clients send `user_agent` and `origin`
    pub fn new(user_agent: UserAgent, origin: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            user_agent,
            origin: origin.into(),
            request_timeout,
        }
    }
}

impl TunnelConnector for MtlsConnector {
    fn connect(&self, bundle: &CertificateBundle, base_url: &str) -> Result<Arc<dyn TunnelHttp>> {
        Ok(Arc::new(MtlsTunnelClient::new(
            bundle,
            base_url,
            self.user_agent,
            &self.origin,
            self.request_timeout,
        )?))
    }
}

/// reqwest client presenting the bundle's identity
pub struct MtlsTunnelClient {
    client: reqwest::Client,
    base_url: String,
}

impl MtlsTunnelClient {
    /// Client for `base_url` presenting `bundle`'s identity and trusting its CA
    pub fn new(
        bundle: &CertificateBundle,
        base_url: &str,
        user_agent: UserAgent,
        origin: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let identity = reqwest::Identity::from_pem(bundle.identity_pem().as_bytes())?;
        let ca = reqwest::Certificate::from_pem(bundle.ca_cert_pem.as_bytes())?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(user_agent.header_value()),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json; charset=utf-8;"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert("schemaversion", HeaderValue::from_static("1"));
        if let Ok(origin) = HeaderValue::from_str(origin) {
            headers.insert(header::ORIGIN, origin);
        }

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .add_root_certificate(ca)
            .danger_accept_invalid_certs(true)
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, token: &str, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
    }

    async fn get_ok(&self, token: &str, path: &str) -> Result<reqwest::Response> {
        let response = self.get(token, path).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TunnelError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl TunnelHttp for MtlsTunnelClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn probe(&self, token: &str, timeout: Duration) -> Result<()> {
        let url = format!("{}{CONNECTIVITY_PATH}", self.base_url);
        debug!(url = %url, "probing tunnel");
        let request = self.get(token, CONNECTIVITY_PATH).timeout(timeout).send();
        // any answer, whatever its status, proves the port is reachable
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(TunnelError::Probe {
                url,
                message: e.to_string(),
            }),
            Err(_) => Err(TunnelError::Probe {
                url,
                message: format!("no answer within {timeout:?}"),
            }),
        }
    }

    async fn get_json(&self, token: &str, path: &str) -> Result<Value> {
        let body: Value = self.get_ok(token, path).await?.json().await?;
        Ok(unwrap_envelope(path, body)?)
    }

    async fn get_stream(&self, token: &str, path: &str) -> Result<ByteStream> {
        let response = self.get_ok(token, path).await?;
        Ok(response
            .bytes_stream()
            .map_err(TransportError::Http)
            .boxed())
    }
}
