//! Tunnel negotiation against scripted cloud, device and tunnel

#![allow(clippy::unwrap_used)]

use arlo_core::ClientConfig;
use arlo_events::{Session, StreamEvent};
use arlo_ratls::{CertificateError, CertificateStore, TunnelError, TunnelNegotiator, TunnelState};
use arlo_testkit::{
    context, init_tracing, issuance_response, port_open_event, seed_identity, station,
    test_config, FakeConnector, ScriptedEventSource, ScriptedTransport,
};
use assert_matches::assert_matches;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const STATUS: &str = "/hmsweb/users/device/ratls/status/BS1";
const TOKEN: &str = "/hmsweb/users/device/ratls/token/BS1";
const ENABLE: &str = "/hmsweb/users/device/ratls/enable/BS1";
const REMOTE_ACCESS: &str = "/hmsweb/users/device/ratls/remoteaccess/enable/BS1";
const CREATE_CERTS: &str = "/hmsweb/users/devices/v2/security/cert/create";
const NOTIFY: &str = "/hmsweb/users/devices/notify/BS1";

struct Harness {
    _dir: TempDir,
    transport: Arc<ScriptedTransport>,
    connector: Arc<FakeConnector>,
    negotiator: TunnelNegotiator,
    _session: Session,
}

fn harness_with(tweak: impl FnOnce(&mut ClientConfig)) -> Harness {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);
    seed_identity(&config.cert_path());

    let transport = ScriptedTransport::new();
    transport.respond_json(
        STATUS,
        200,
        json!({"ratlsEnabled": true, "remoteAccessEnabled": false}),
    );
    transport.respond_json(TOKEN, 200, json!({"ratlsToken": "tok-1"}));
    transport.respond_json(CREATE_CERTS, 200, issuance_response());
    transport.respond_json(ENABLE, 200, json!({}));
    transport.respond_json(REMOTE_ACCESS, 200, json!({}));
    transport.respond_json(NOTIFY, 200, json!({}));

    let store = Arc::new(CertificateStore::new(config.cert_path()));
    let ctx = context(config, transport.clone());
    let session = Session::start_with_source(ctx.clone(), ScriptedEventSource::new()).unwrap();

    // the device confirms every port-open request on the event bus
    let bus = session.bus().clone();
    transport.on_request(NOTIFY, move |request| {
        let trans_id = request.body.as_ref().unwrap()["transId"]
            .as_str()
            .unwrap()
            .to_string();
        bus.dispatch(StreamEvent {
            id: None,
            event: None,
            data: port_open_event(&trans_id, "192.168.1.20", 443),
        });
    });

    let connector = FakeConnector::new();
    let negotiator = TunnelNegotiator::new(&ctx, session.correlator().clone(), store, station())
        .with_connector(connector.clone());

    Harness {
        _dir: dir,
        transport,
        connector,
        negotiator,
        _session: session,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn disables(transport: &ScriptedTransport) -> usize {
    transport
        .requests_to(ENABLE)
        .iter()
        .filter(|r| r.body.as_ref().unwrap()["enable"] == false)
        .count()
}

#[tokio::test]
async fn three_failed_probes_exhaust_the_negotiation() {
    let h = harness();
    h.connector.fail_probes(3);

    let err = h.negotiator.negotiate().await.unwrap_err();
    assert_matches!(
        err,
        TunnelError::Exhausted { ref device_id, attempts: 3 } if device_id == "BS1"
    );
    assert!(err.is_unavailable());
    assert_eq!(h.connector.probes(), 3);
    assert_eq!(h.transport.requests_to(NOTIFY).len(), 3);
    assert_eq!(disables(&h.transport), 3);
    assert_eq!(h.negotiator.state(), TunnelState::Degraded);
}

#[tokio::test]
async fn success_on_second_attempt_stops_retrying() {
    let h = harness();
    h.connector.fail_probes(1);

    let tunnel = h.negotiator.negotiate().await.unwrap();
    assert_eq!(tunnel.base_url(), "https://192.168.1.20:443");
    assert_eq!(tunnel.endpoint().port, 443);
    assert_eq!(h.connector.probes(), 2);
    assert_eq!(h.transport.requests_to(NOTIFY).len(), 2);
    assert_eq!(disables(&h.transport), 1);
    assert_eq!(h.negotiator.state(), TunnelState::Verified);
}

#[tokio::test]
async fn port_request_carries_the_open_command() {
    let h = harness();
    h.negotiator.negotiate().await.unwrap();

    let body = h.transport.requests_to(NOTIFY)[0].body.clone().unwrap();
    assert_eq!(body["action"], "open");
    assert_eq!(body["resource"], "storage/ratls");
    assert_eq!(body["from"], "U1");
    assert_eq!(body["publishResponse"], true);
    assert_eq!(body["to"], "BS1");
}

#[tokio::test]
async fn first_negotiation_provisions_certificates() {
    let h = harness();
    h.negotiator.negotiate().await.unwrap();

    let requests = h.transport.requests_to(CREATE_CERTS);
    assert_eq!(requests.len(), 1);
    let body = requests[0].body.clone().unwrap();
    assert_eq!(body["uuid"], "BS1");
    assert_eq!(body["uniqueIds"], json!(["U1_BS1"]));
    assert_eq!(
        body["publicKey"],
        arlo_ratls::format_key_for_api(arlo_testkit::PUBLIC_KEY_PEM)
    );
    assert_eq!(requests[0].header("xcloudId"), Some("XC1"));

    // a second negotiation reuses the stored bundle
    h.negotiator.negotiate().await.unwrap();
    assert_eq!(h.transport.requests_to(CREATE_CERTS).len(), 1);
}

#[tokio::test]
async fn mismatched_access_mode_is_enabled_first() {
    let h = harness();
    h.transport.replace_json(STATUS, 200, json!({"ratlsEnabled": false}));

    h.negotiator.negotiate().await.unwrap();
    let enable = h.transport.requests_to(ENABLE);
    assert_eq!(enable[0].body.as_ref().unwrap()["enable"], true);
    let remote = h.transport.requests_to(REMOTE_ACCESS);
    assert_eq!(
        remote[0].body.clone().unwrap(),
        json!({"enableRemoteAccess": false, "refreshPort": true})
    );
}

#[tokio::test]
async fn failed_issuance_is_fatal_and_writes_nothing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    seed_identity(&config.cert_path());
    let transport = ScriptedTransport::new();
    transport.respond_json(CREATE_CERTS, 200, json!({"message": "denied", "reason": "quota"}));

    let store = Arc::new(CertificateStore::new(config.cert_path()));
    let ctx = context(config, transport.clone());
    let session = Session::start_with_source(ctx.clone(), ScriptedEventSource::new()).unwrap();
    let negotiator =
        TunnelNegotiator::new(&ctx, session.correlator().clone(), store.clone(), station())
            .with_connector(FakeConnector::new());

    let err = negotiator.negotiate().await.unwrap_err();
    assert_matches!(
        err,
        TunnelError::Certificate(CertificateError::ProvisioningFailed { .. })
    );
    assert!(!store.identity_dir("U1_BS1").exists());
    assert!(transport.requests_to(NOTIFY).is_empty());
    assert_eq!(negotiator.state(), TunnelState::Degraded);
}

#[tokio::test]
async fn expired_tokens_are_refetched() {
    let h = harness_with(|config| config.tunnel.token_validity = Duration::ZERO);
    h.transport.respond_json(TOKEN, 200, json!({"ratlsToken": "tok-2"}));
    h.transport.respond_json(TOKEN, 200, json!({"ratlsToken": "tok-3"}));
    h.connector.serve_json("/hmsls/list/20240101/20240101/CAM1", json!([]));

    let tunnel = h.negotiator.negotiate().await.unwrap();
    let listing = tunnel
        .get_json("/hmsls/list/20240101/20240101/CAM1")
        .await
        .unwrap();
    assert_eq!(listing, json!([]));
    assert_eq!(h.connector.tokens(), vec!["tok-2", "tok-3"]);
}

#[tokio::test]
async fn failed_jiggle_does_not_end_the_negotiation() {
    let h = harness();
    h.transport.replace_json(ENABLE, 503, json!({"error": "unavailable"}));
    h.connector.fail_probes(1);

    let tunnel = h.negotiator.negotiate().await.unwrap();
    assert_eq!(tunnel.device_id(), "BS1");
    assert_eq!(h.connector.probes(), 2);
    assert_eq!(h.transport.requests_to(NOTIFY).len(), 2);
    assert_eq!(h.negotiator.state(), TunnelState::Verified);
}

#[tokio::test]
async fn failed_jiggles_still_report_exhaustion() {
    let h = harness();
    h.transport.replace_json(ENABLE, 503, json!({"error": "unavailable"}));
    h.connector.fail_probes(3);

    let err = h.negotiator.negotiate().await.unwrap_err();
    assert_matches!(err, TunnelError::Exhausted { attempts: 3, .. });
    assert!(err.is_unavailable());
    assert_eq!(h.connector.probes(), 3);
}
