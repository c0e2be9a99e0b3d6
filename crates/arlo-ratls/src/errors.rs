//! Certificate and tunnel errors

use arlo_core::TransportError;
use arlo_events::EventError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the certificate store
#[derive(Debug, Error)]
pub enum CertificateError {
    /// The issuer answered without certificate data
    #[error("certificate provisioning failed for {unique_id}: {message} - {reason}")]
    ProvisioningFailed {
        /// Identity being provisioned
        unique_id: String,
        /// Issuer's message, if any
        message: String,
        /// Issuer's reason, if any
        reason: String,
    },

    /// Key generation or key encoding failed
    #[error("key error: {message}")]
    Key {
        /// Underlying failure
        message: String,
    },

    /// A stored PEM file could not be parsed
    #[error("invalid PEM in {path}")]
    InvalidPem {
        /// File that failed to parse
        path: PathBuf,
    },

    /// Filesystem failure
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The issuance request itself failed
    #[error("certificate issuance request failed: {0}")]
    Transport(#[from] TransportError),
}

impl CertificateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CertificateError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn key(message: impl std::fmt::Display) -> Self {
        CertificateError::Key {
            message: message.to_string(),
        }
    }
}

/// Failures of tunnel negotiation and of requests over the tunnel
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The certificate bundle could not be ensured
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// A remote-access cloud call failed
    #[error("{operation} failed for {device_id}: {source}")]
    RemoteAccess {
        /// Target device
        device_id: String,
        /// Cloud operation attempted
        operation: &'static str,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// The port-open command failed or was never confirmed
    #[error("port open request failed: {0}")]
    Correlation(#[from] EventError),

    /// A cloud response lacked a required field
    #[error("response is missing {field}")]
    MissingProperty {
        /// Missing field
        field: &'static str,
    },

    /// Every port-request attempt failed the reachability probe
    #[error("tunnel to {device_id} unavailable after {attempts} attempts")]
    Exhausted {
        /// Target device
        device_id: String,
        /// Attempts made
        attempts: u32,
    },

    /// The negotiated endpoint did not answer
    #[error("tunnel probe to {url} failed: {message}")]
    Probe {
        /// Probed URL
        url: String,
        /// What went wrong
        message: String,
    },

    /// The tunnel answered a request with a non-2xx status
    #[error("tunnel request {path} failed with status {status}")]
    Status {
        /// Request path
        path: String,
        /// HTTP status
        status: u16,
    },

    /// The tunnel client could not be built or a request failed to complete
    #[error("tunnel http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A tunnel response body could not be decoded
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl TunnelError {
    pub(crate) fn remote_access(
        device_id: &str,
        operation: &'static str,
        source: TransportError,
    ) -> Self {
        TunnelError::RemoteAccess {
            device_id: device_id.to_string(),
            operation,
            source,
        }
    }

    /// Whether the tunnel is unavailable and callers should route around it
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TunnelError::Exhausted { .. } | TunnelError::Probe { .. })
    }
}

/// Result type for tunnel operations
pub type Result<T> = std::result::Result<T, TunnelError>;
