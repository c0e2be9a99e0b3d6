//! # Arlo RATLS
//!
//! Remote access to a base station's local storage over a mutually
//! authenticated TLS tunnel.
//!
//! - [`CertificateStore`] keeps the installation key pair and the per-device
//!   certificate chains the service issues for it
//! - [`RemoteAccessApi`] wraps the cloud calls that switch remote access and
//!   hand out tunnel tokens
//! - [`TunnelNegotiator`] drives a device to an open, verified port and
//!   returns a [`Tunnel`] to issue requests over

pub mod api;
pub mod certificates;
pub mod client;
pub mod errors;
pub mod negotiator;

pub use api::{RemoteAccessApi, RemoteAccessStatus};
pub use certificates::{
    convert_api_response_to_pem, format_key_for_api, CertificateBundle, CertificateIssuer,
    CertificateStore, KeyPair,
};
pub use client::{
    MtlsConnector, MtlsTunnelClient, TunnelConnector, TunnelEndpoint, TunnelHttp,
    CONNECTIVITY_PATH,
};
pub use errors::{CertificateError, Result, TunnelError};
pub use negotiator::{Tunnel, TunnelNegotiator, TunnelState};
