//! Explicitly constructed client context
//!
//! Replaces process-wide configuration and logger globals. Build order is
//! config, then transport, then credentials; the session and negotiators
//! take a context at construction.

use crate::config::ClientConfig;
use crate::credentials::{CredentialSource, SessionCredentials};
use crate::errors::Result;
use crate::transport::{HttpTransport, Transport};
use std::sync::Arc;

/// Shared handles every component is constructed with
#[derive(Clone)]
pub struct ClientContext {
    /// Validated configuration
    pub config: Arc<ClientConfig>,
    /// Cloud API transport
    pub transport: Arc<dyn Transport>,
    /// Credentials supplied by the authentication collaborator
    pub credentials: Arc<dyn CredentialSource>,
}

impl ClientContext {
    /// Build a context backed by [`HttpTransport`]
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config, credentials.clone())?;
        Ok(Self {
            config: Arc::new(config),
            transport: Arc::new(transport),
            credentials,
        })
    }

    /// Build a context around an existing transport
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            credentials,
        }
    }

    /// Current credentials snapshot
    pub fn credentials(&self) -> SessionCredentials {
        self.credentials.credentials()
    }
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("api_host", &self.config.api_host)
            .finish_non_exhaustive()
    }
}
