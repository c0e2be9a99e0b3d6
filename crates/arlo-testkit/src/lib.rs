//! Arlo Testing Infrastructure
//!
//! Scripted stand-ins for the collaborators the client talks to, plus the
//! device and credential fixtures most tests start from.
//!
//! ```rust,no_run
//! use arlo_testkit::*;
//!
//! let transport = ScriptedTransport::new();
//! transport.respond_json("/hmsweb/users/device/ratls/status/BS1", 200, serde_json::json!({}));
//! let ctx = context(test_config(std::path::Path::new("/tmp")), transport.clone());
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

pub mod events;
pub mod fixtures;
pub mod media;
pub mod transport;
pub mod tunnel;

pub use events::{message_frame, ScriptedEventSource};
pub use fixtures::*;
pub use media::{FakeContentHosts, FakeStation};
pub use transport::ScriptedTransport;
pub use tunnel::FakeConnector;

/// Install a test-friendly tracing subscriber; repeated calls are harmless
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
