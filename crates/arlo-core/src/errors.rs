//! Error types shared by every layer of the client
//!
//! `TransportError` is what the cloud transport surfaces; `CoreError` covers
//! configuration and local I/O. Higher crates wrap both with `#[from]`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures of a request/response exchange with the cloud API
#[derive(Debug, Error)]
pub enum TransportError {
    /// The service answered with a non-2xx status after retries
    #[error("{method} {path} failed with status {status}")]
    Status {
        /// HTTP method of the failed request
        method: &'static str,
        /// Request path or URL
        path: String,
        /// HTTP status code
        status: u16,
        /// Response body, lossily decoded, for diagnostics
        body: String,
    },

    /// The JSON envelope was malformed or reported failure
    #[error("unexpected response envelope from {path}: {message}")]
    Envelope {
        /// Request path
        path: String,
        /// What was wrong with the envelope
        message: String,
    },

    /// The request did not complete in time
    #[error("request to {path} timed out")]
    Timeout {
        /// Request path
        path: String,
    },

    /// The request path could not be resolved against the API host
    #[error("invalid request url {path}: {source}")]
    Url {
        /// Offending path
        path: String,
        /// Parse failure
        #[source]
        source: url::ParseError,
    },

    /// A header name or value could not be encoded
    #[error("invalid header {name}")]
    Header {
        /// Header name
        name: String,
    },

    /// Lower-level HTTP client failure (connect, TLS, body read)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    /// Status code carried by this error, if the service answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the failure was a timeout rather than an answer
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout { .. } => true,
            TransportError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Whether the peer refused or could not be reached at the socket level
    pub fn is_connect(&self) -> bool {
        matches!(self, TransportError::Http(e) if e.is_connect())
    }
}

/// Configuration and local resource failures
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration file could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// A configuration value failed validation
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Filesystem failure with the path that caused it
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Cloud API failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Unexpected JSON shape
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// What was being decoded
        what: &'static str,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

impl CoreError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        CoreError::Config(message.into())
    }

    /// Create an I/O error tagged with a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}
