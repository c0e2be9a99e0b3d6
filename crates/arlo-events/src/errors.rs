//! Event bus and correlation errors

use arlo_core::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Failures of the event bus and of correlated commands
#[derive(Debug, Error)]
pub enum EventError {
    /// The command was sent but no matching event arrived in time
    #[error("no event for {key} within {timeout:?}")]
    CorrelationTimeout {
        /// Correlation key waited on
        key: String,
        /// Bound that elapsed
        timeout: Duration,
    },

    /// Another caller is already parked on this key
    #[error("a waiter is already parked on {key}")]
    WaiterConflict {
        /// Contested key
        key: String,
    },

    /// The bus was torn down while waiting
    #[error("event bus closed")]
    Closed,

    /// `run` was started twice for one bus
    #[error("event bus is already running")]
    AlreadyRunning,

    /// The push stream failed; recovered by the reconnect loop
    #[error("event stream failed: {message}")]
    Stream {
        /// Description of the failure
        message: String,
    },

    /// Sending the command failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl EventError {
    /// Create a stream error
    pub fn stream(message: impl Into<String>) -> Self {
        EventError::Stream {
            message: message.into(),
        }
    }

    /// Whether the cloud accepted the command but the device never confirmed it
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, EventError::CorrelationTimeout { .. })
    }
}
