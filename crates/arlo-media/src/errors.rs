//! Transfer errors

use arlo_core::TransportError;
use arlo_ratls::TunnelError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of library enumeration and media transfer
#[derive(Debug, Error)]
pub enum TransferError {
    /// The destination template could not be rendered
    #[error("cannot render destination template {template:?}: {reason}")]
    Template {
        /// Template as configured
        template: String,
        /// What was wrong with it
        reason: String,
    },

    /// An item's content location could not be routed to a downloader
    #[error("cannot route {url}: {reason}")]
    Routing {
        /// Content URL of the item
        url: String,
        /// Why routing failed
        reason: String,
    },

    /// The content host answered with a non-2xx status
    #[error("download of {url} failed with status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status
        status: u16,
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

    /// A library listing could not be decoded
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// What was being decoded
        what: &'static str,
        /// Decode failure
        #[source]
        source: serde_json::Error,
    },

    /// The tunnel failed a listing or download
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// The cloud failed a listing or download
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransferError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn routing(url: &str, reason: impl Into<String>) -> Self {
        TransferError::Routing {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for media operations
pub type Result<T> = std::result::Result<T, TransferError>;
