//! Client configuration
//!
//! Loaded from a TOML file whose settings live under an `[arlo]` table, then
//! overlaid with `ARLO_*` environment variables. Durations are whole seconds
//! on disk.

use crate::errors::{CoreError, Result};
use crate::transport::UserAgent;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cloud API host
pub const DEFAULT_API_HOST: &str = "https://myapi.arlo.com";
/// Origin presented to the cloud API
pub const DEFAULT_ORIGIN: &str = "https://my.arlo.com";
/// Referer presented to the cloud API
pub const DEFAULT_REFERER: &str = "https://my.arlo.com/";

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the cloud API
    pub api_host: String,
    /// `Origin` header value
    pub origin: String,
    /// `Referer` header value
    pub referer: String,
    /// User agent profile used until the service starts refusing it
    pub user_agent: UserAgent,
    /// Directory holding persisted state (certificates, session data)
    pub config_dir: PathBuf,
    /// Destination template for downloaded media, without extension
    pub save_media_to: String,
    /// How many days back the media library is enumerated
    pub library_days: u32,
    /// Number of concurrent download workers
    pub download_concurrency: usize,
    /// Per-request timeout for ordinary API calls
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Attempts made by the transport before giving up on a refused request
    pub max_request_attempts: u32,
    /// Pause after a 403 before retrying with a different user agent
    #[serde(with = "duration_secs")]
    pub forbidden_backoff: Duration,
    /// Tracing filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Event bus settings
    pub events: EventsConfig,
    /// Tunnel negotiation settings
    pub tunnel: TunnelConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let config_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".arlo");
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            user_agent: UserAgent::Linux,
            save_media_to: config_dir
                .join("media/${N}/%Y-%m-%d_%H-%M-%S")
                .to_string_lossy()
                .into_owned(),
            config_dir,
            library_days: 30,
            download_concurrency: 4,
            request_timeout: Duration::from_secs(60),
            max_request_attempts: 10,
            forbidden_backoff: Duration::from_secs(2),
            log_level: "info".to_string(),
            events: EventsConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

/// Event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Longest silence tolerated on the push stream before reconnecting
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    /// How long an event nobody is waiting for is retained
    #[serde(with = "duration_secs")]
    pub unclaimed_ttl: Duration,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            unclaimed_ttl: Duration::from_secs(300),
        }
    }
}

/// Tunnel negotiation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Port-request attempts made before the negotiation is abandoned
    pub max_attempts: u32,
    /// Pause after enabling remote access
    #[serde(with = "duration_secs")]
    pub settle_delay: Duration,
    /// Base pause after disabling remote access between attempts
    #[serde(with = "duration_secs")]
    pub jiggle_delay: Duration,
    /// Upper bound of the random extra pause added to `jiggle_delay`
    #[serde(with = "duration_secs")]
    pub jiggle_jitter: Duration,
    /// Bound on waiting for the device to confirm the port is open
    #[serde(with = "duration_secs")]
    pub port_open_timeout: Duration,
    /// Bound on the reachability probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,
    /// Lifetime assumed for a tunnel bearer token
    #[serde(with = "duration_secs")]
    pub token_validity: Duration,
    /// Address the device by its public rather than private IP
    pub public_endpoint: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            settle_delay: Duration::from_secs(5),
            jiggle_delay: Duration::from_secs(10),
            jiggle_jitter: Duration::from_secs(2),
            port_open_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
            token_validity: Duration::from_secs(600),
            public_endpoint: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    arlo: ClientConfig,
}

impl ClientConfig {
    /// Load configuration from a TOML file with an `[arlo]` table.
    ///
    /// A relative or missing `config_dir` resolves to the file's directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        let raw: toml::Value = toml::from_str(&content)
            .map_err(|e| CoreError::config(format!("{}: {e}", path.display())))?;
        let explicit_dir = raw
            .get("arlo")
            .and_then(|table| table.get("config_dir"))
            .is_some();
        let file: ConfigFile = raw
            .try_into()
            .map_err(|e| CoreError::config(format!("{}: {e}", path.display())))?;
        let mut config = file.arlo;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if !explicit_dir {
            config.config_dir = base.to_path_buf();
        } else if config.config_dir.is_relative() {
            config.config_dir = base.join(&config.config_dir);
        }

        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `ARLO_USER_AGENT`, `ARLO_LOG_LEVEL` and `ARLO_LIBRARY_DAYS`
    pub fn merge_with_env(&mut self) -> Result<()> {
        if let Ok(agent) = std::env::var("ARLO_USER_AGENT") {
            self.user_agent = agent.parse().map_err(|reason| CoreError::InvalidConfig {
                field: "user_agent",
                reason,
            })?;
        }
        if let Ok(level) = std::env::var("ARLO_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(days) = std::env::var("ARLO_LIBRARY_DAYS") {
            self.library_days = days.parse().map_err(|_| CoreError::InvalidConfig {
                field: "library_days",
                reason: format!("not a number: {days}"),
            })?;
        }
        Ok(())
    }

    /// Reject values the rest of the client cannot work with
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_host).map_err(|e| CoreError::InvalidConfig {
            field: "api_host",
            reason: e.to_string(),
        })?;
        if self.max_request_attempts == 0 {
            return Err(CoreError::InvalidConfig {
                field: "max_request_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.download_concurrency == 0 {
            return Err(CoreError::InvalidConfig {
                field: "download_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.tunnel.max_attempts == 0 {
            return Err(CoreError::InvalidConfig {
                field: "tunnel.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.save_media_to.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "save_media_to",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Directory holding the key pair and per-identity certificate bundles
    pub fn cert_path(&self) -> PathBuf {
        self.config_dir.join("certs")
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_negotiation_policy() {
        let config = ClientConfig::default();
        assert_eq!(config.tunnel.max_attempts, 3);
        assert_eq!(config.tunnel.port_open_timeout, Duration::from_secs(300));
        assert_eq!(config.tunnel.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.tunnel.token_validity, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_resolves_config_dir_next_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[arlo]
user_agent = "firefox"
save_media_to = "/media/${N}/%Y%m%d"
library_days = 7

[arlo.tunnel]
max_attempts = 5
probe_timeout = 2
"#,
        )
        .unwrap();

        let config = ClientConfig::load_from_file(&path).unwrap();
        assert_eq!(config.config_dir, dir.path());
        assert_eq!(config.cert_path(), dir.path().join("certs"));
        assert_eq!(config.user_agent, UserAgent::Firefox);
        assert_eq!(config.tunnel.max_attempts, 5);
        assert_eq!(config.tunnel.probe_timeout, Duration::from_secs(2));
        // untouched sections keep their defaults
        assert_eq!(config.tunnel.settle_delay, Duration::from_secs(5));
        assert_eq!(config.events.unclaimed_ttl, Duration::from_secs(300));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let config = ClientConfig {
            download_concurrency: 0,
            ..Default::default()
        };
        assert_matches!(
            config.validate(),
            Err(CoreError::InvalidConfig {
                field: "download_concurrency",
                ..
            })
        );
    }

    #[test]
    fn missing_arlo_table_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[other]\nkey = 1\n").unwrap();
        assert_matches!(
            ClientConfig::load_from_file(&path),
            Err(CoreError::Config(_))
        );
    }
}
