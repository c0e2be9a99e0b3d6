//! Reusable fixtures: devices, credentials, configuration and key material

use crate::transport::ScriptedTransport;
use arlo_core::{ClientConfig, ClientContext, Device, SessionCredentials};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// PKCS#1 RSA key used wherever a stored identity is needed
pub const PRIVATE_KEY_PEM: &str = include_str!("../fixtures/private.pem");
/// SPKI public half of [`PRIVATE_KEY_PEM`]
pub const PUBLIC_KEY_PEM: &str = include_str!("../fixtures/public.pem");
/// Self-signed certificate for [`PRIVATE_KEY_PEM`]
pub const CLIENT_CERT_PEM: &str = include_str!("../fixtures/client.crt");

pub const USER_ID: &str = "U1";
pub const STATION_ID: &str = "BS1";
pub const STATION_UNIQUE_ID: &str = "U1_BS1";

pub fn credentials() -> SessionCredentials {
    SessionCredentials::new(
        "test-token",
        USER_ID,
        chrono::Utc::now() + chrono::Duration::hours(1),
    )
}

pub fn station() -> Device {
    serde_json::from_value(json!({
        "deviceId": STATION_ID,
        "deviceName": "Hub",
        "deviceType": "basestation",
        "userId": USER_ID,
        "uniqueId": STATION_UNIQUE_ID,
        "xCloudId": "XC1",
        "modelId": "VMB4540",
        "parentId": STATION_ID,
    }))
    .unwrap()
}

pub fn camera(device_id: &str, name: &str) -> Device {
    serde_json::from_value(json!({
        "deviceId": device_id,
        "deviceName": name,
        "deviceType": "camera",
        "userId": USER_ID,
        "uniqueId": format!("{USER_ID}_{device_id}"),
        "xCloudId": "XC1",
        "parentId": STATION_ID,
    }))
    .unwrap()
}

/// Configuration rooted at `dir` with every delay zeroed
pub fn test_config(dir: &Path) -> ClientConfig {
    let mut config = ClientConfig {
        config_dir: dir.to_path_buf(),
        save_media_to: dir
            .join("media/${N}/%Y-%m-%d_%H-%M-%S")
            .to_string_lossy()
            .into_owned(),
        ..ClientConfig::default()
    };
    config.events.idle_timeout = Duration::from_secs(5);
    config.tunnel.settle_delay = Duration::ZERO;
    config.tunnel.jiggle_delay = Duration::ZERO;
    config.tunnel.jiggle_jitter = Duration::ZERO;
    config.tunnel.port_open_timeout = Duration::from_secs(5);
    config.tunnel.probe_timeout = Duration::from_secs(1);
    config
}

pub fn context(config: ClientConfig, transport: Arc<ScriptedTransport>) -> ClientContext {
    ClientContext::with_transport(config, transport, Arc::new(credentials()))
}

/// Write the fixture key pair where a store rooted at `cert_path` looks for it
pub fn seed_identity(cert_path: &Path) {
    std::fs::create_dir_all(cert_path).unwrap();
    std::fs::write(cert_path.join("private.pem"), PRIVATE_KEY_PEM).unwrap();
    std::fs::write(cert_path.join("public.pem"), PUBLIC_KEY_PEM).unwrap();
}

/// Body of [`CLIENT_CERT_PEM`] without armor or line breaks
pub fn compact_certificate() -> String {
    CLIENT_CERT_PEM
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect()
}

/// Successful certificate issuance response
pub fn issuance_response() -> Value {
    let cert = compact_certificate();
    json!({
        "certsData": [{ "deviceCert": cert, "peerCert": cert }],
        "icaCert": cert,
    })
}

/// Port-open confirmation the device pushes for `trans_id`
pub fn port_open_event(trans_id: &str, host: &str, port: u16) -> Value {
    json!({
        "transId": trans_id,
        "action": "is",
        "resource": "storage/ratls",
        "properties": { "privateIP": host, "publicIP": "203.0.113.9", "port": port },
    })
}
