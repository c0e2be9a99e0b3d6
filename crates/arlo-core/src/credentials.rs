//! Session credentials supplied by the authentication collaborator
//!
//! The client only ever reads these. Refreshing them is the job of whatever
//! implements [`CredentialSource`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bearer token and the identities derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    /// Value sent in the `Authorization` header
    pub token: String,
    /// Owning user id
    pub user_id: String,
    /// Actor id commands are sent from
    pub web_id: String,
    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl SessionCredentials {
    /// Build credentials, deriving the web actor id from the user id
    pub fn new(token: impl Into<String>, user_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        let user_id = user_id.into();
        Self {
            token: token.into(),
            web_id: format!("{user_id}_web"),
            user_id,
            expires_at,
        }
    }

    /// Whether the token has passed its expiry instant
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Read-only view of the current session credentials
pub trait CredentialSource: Send + Sync {
    /// Snapshot of the credentials to use for the next request
    fn credentials(&self) -> SessionCredentials;
}

impl CredentialSource for SessionCredentials {
    fn credentials(&self) -> SessionCredentials {
        self.clone()
    }
}
