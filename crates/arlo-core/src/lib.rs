//! # Arlo Core
//!
//! Foundation layer of the fleet client:
//! - [`ClientConfig`] loading and validation
//! - [`ClientContext`], the explicitly constructed handle set passed to every component
//! - the [`Transport`] seam and its reqwest implementation, [`HttpTransport`]
//! - [`Device`] records decoded from the cloud API
//! - [`TaskRegistry`] for session-lifetime background work
//!
//! Nothing here knows about events, tunnels or downloads.

pub mod config;
pub mod context;
pub mod credentials;
pub mod device;
pub mod errors;
pub mod logging;
pub mod task_registry;
pub mod transport;

pub use config::{ClientConfig, EventsConfig, TunnelConfig};
pub use context::ClientContext;
pub use credentials::{CredentialSource, SessionCredentials};
pub use device::{fetch_devices, Device, DeviceKind};
pub use errors::{CoreError, Result, TransportError, TransportResult};
pub use task_registry::{ShutdownSignal, TaskRegistry};
pub use transport::{
    unwrap_envelope, ApiRequest, ApiResponse, ByteStream, HttpTransport, Method, Transport,
    UserAgent,
};
