//! Remote-access calls on the cloud API for one base station

use crate::certificates::CertificateIssuer;
use crate::errors::{CertificateError, Result, TunnelError};
use arlo_core::{ApiRequest, Device, Transport};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const STATUS_PATH: &str = "/hmsweb/users/device/ratls/status";
const TOKEN_PATH: &str = "/hmsweb/users/device/ratls/token";
const ENABLE_PATH: &str = "/hmsweb/users/device/ratls/enable";
const REMOTE_ACCESS_PATH: &str = "/hmsweb/users/device/ratls/remoteaccess/enable";
const CREATE_CERTS_PATH: &str = "/hmsweb/users/devices/v2/security/cert/create";

/// Remote-access flags reported for a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccessStatus {
    /// Local storage access is switched on
    #[serde(default)]
    pub ratls_enabled: bool,
    /// The public endpoint is exposed
    #[serde(default)]
    pub remote_access_enabled: bool,
}

impl RemoteAccessStatus {
    /// Whether the device is already in the requested addressing mode
    pub fn matches(&self, public_endpoint: bool) -> bool {
        self.ratls_enabled && self.remote_access_enabled == public_endpoint
    }
}

/// Remote-access endpoints scoped to one base station
#[derive(Clone)]
pub struct RemoteAccessApi {
    transport: Arc<dyn Transport>,
    station: Device,
}

impl RemoteAccessApi {
    /// API for `station`'s remote access over `transport`
    pub fn new(transport: Arc<dyn Transport>, station: Device) -> Self {
        Self { transport, station }
    }

    /// Station the calls address
    pub fn station(&self) -> &Device {
        &self.station
    }

    /// Current remote-access state reported by the station
    pub async fn status(&self) -> Result<RemoteAccessStatus> {
        let data = self
            .transport
            .call(ApiRequest::get(self.path(STATUS_PATH)))
            .await
            .map_err(|e| self.error("remote access status", e))?;
        Ok(serde_json::from_value(data).unwrap_or_default())
    }

    /// Fetch a bearer token for requests over the tunnel
    pub async fn fetch_token(&self) -> Result<String> {
        debug!(device_id = %self.station.device_id, "fetching tunnel token");
        let data = self
            .transport
            .call(ApiRequest::get(self.path(TOKEN_PATH)))
            .await
            .map_err(|e| self.error("tunnel token", e))?;
        data.get("ratlsToken")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(TunnelError::MissingProperty { field: "ratlsToken" })
    }

    /// Switch local storage access on, exposing the public endpoint if asked
    pub async fn enable(&self, public_endpoint: bool) -> Result<()> {
        debug!(device_id = %self.station.device_id, public_endpoint, "enabling remote access");
        self.post(ENABLE_PATH, json!({ "enable": true }), "enable remote access")
            .await?;
        self.post(
            REMOTE_ACCESS_PATH,
            json!({ "enableRemoteAccess": public_endpoint, "refreshPort": true }),
            "enable remote access",
        )
        .await
    }

    /// Switch local storage access off
    pub async fn disable(&self) -> Result<()> {
        debug!(device_id = %self.station.device_id, "disabling remote access");
        self.post(ENABLE_PATH, json!({ "enable": false }), "disable remote access")
            .await?;
        self.post(
            REMOTE_ACCESS_PATH,
            json!({ "enableRemoteAccess": false, "refreshPort": false }),
            "disable remote access",
        )
        .await
    }

    async fn post(&self, base: &str, body: Value, operation: &'static str) -> Result<()> {
        self.transport
            .send_ok(ApiRequest::post(self.path(base), body))
            .await
            .map(|_| ())
            .map_err(|e| self.error(operation, e))
    }

    fn path(&self, base: &str) -> String {
        format!("{base}/{}", self.station.device_id)
    }

    fn error(&self, operation: &'static str, source: arlo_core::TransportError) -> TunnelError {
        TunnelError::remote_access(&self.station.device_id, operation, source)
    }
}

#[async_trait]
impl CertificateIssuer for RemoteAccessApi {
    async fn issue(&self, public_key: &str) -> std::result::Result<Value, CertificateError> {
        let request = ApiRequest::post(
            CREATE_CERTS_PATH,
            json!({
                "uuid": self.station.device_id,
                "uniqueIds": [self.station.unique_id],
                "publicKey": public_key,
            }),
        )
        .with_header("xcloudId", self.station.xcloud_id.clone());
        Ok(self.transport.call(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_matches_requested_mode() {
        let private = RemoteAccessStatus {
            ratls_enabled: true,
            remote_access_enabled: false,
        };
        assert!(private.matches(false));
        assert!(!private.matches(true));
        assert!(!RemoteAccessStatus::default().matches(false));
    }

    #[test]
    fn status_tolerates_missing_flags() {
        let status: RemoteAccessStatus =
            serde_json::from_value(json!({ "ratlsEnabled": true })).unwrap();
        assert!(status.ratls_enabled);
        assert!(!status.remote_access_enabled);
    }
}
