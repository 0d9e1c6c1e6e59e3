//! Daemon configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! environment variables. Durations are given in milliseconds.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::hub::{HubSettings, MAX_SESSIONS};

/// Default sandbox root.
pub const DEFAULT_SANDBOX_ROOT: &str = "./host";

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 4123;

/// Default authenticated TCP port.
pub const DEFAULT_TCP_PORT: u16 = 12345;

/// Default row feed port.
pub const DEFAULT_ROW_FEED_PORT: u16 = 8923;

/// Default per-command deadline.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Environment variables
// ============================================================================

pub const ENV_SANDBOX_ROOT: &str = "FILE_PATH";
pub const ENV_HTTP_PORT: &str = "PORT";
pub const ENV_TCP_PORT: &str = "DMOUNT_TCP_PORT";
pub const ENV_ROW_FEED_PORT: &str = "DMOUNT_ROW_FEED_PORT";
pub const ENV_SECRET: &str = "DMOUNT_SECRET";
pub const ENV_BIND: &str = "DMOUNT_BIND";
pub const ENV_PEERS: &str = "DMOUNT_PEERS";
pub const ENV_TLS_CERT: &str = "DMOUNT_TLS_CERT";
pub const ENV_TLS_KEY: &str = "DMOUNT_TLS_KEY";
pub const ENV_PEER_CA: &str = "DMOUNT_PEER_CA";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid bind address {0:?}")]
    InvalidBind(String),

    #[error("shared secret is empty (set DMOUNT_SECRET or `secret`)")]
    MissingSecret,

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("tls_cert and tls_key must be set together")]
    IncompleteTls,
}

/// Pre-shared secret for the TCP handshake.
///
/// Compared in constant time and never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct SharedSecret(Arc<str>);

impl SharedSecret {
    /// Wraps a secret value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::from(secret.into()))
    }

    /// True if no secret is configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compares `candidate` against the secret in constant time.
    pub fn matches(&self, candidate: &str) -> bool {
        !self.is_empty() && bool::from(candidate.as_bytes().ct_eq(self.0.as_bytes()))
    }

    /// Returns the secret for sending to a peer.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Default for SharedSecret {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl From<String> for SharedSecret {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Directory datasets are mounted from
    pub sandbox_root: PathBuf,

    /// Address all listeners bind to
    pub bind_address: String,

    /// HTTP and WebSocket port
    pub http_port: u16,

    /// Authenticated TCP port
    pub tcp_port: u16,

    /// Row feed port
    pub row_feed_port: u16,

    /// Handshake secret
    pub secret: SharedSecret,

    /// Peers to keep an outbound connection to (`host:port`)
    pub peers: Vec<String>,

    /// PEM certificate chain for the TCP listener; plain TCP when unset
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching `tls_cert`
    pub tls_key: Option<PathBuf>,

    /// PEM CA bundle used to verify peers; peers are dialed over TLS when set
    pub peer_ca: Option<PathBuf>,

    pub sweep_interval_ms: u64,
    pub liveness_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub dispatch_timeout_ms: u64,

    /// Maximum number of tracked sessions
    pub max_sessions: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sandbox_root: PathBuf::from(DEFAULT_SANDBOX_ROOT),
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            tcp_port: DEFAULT_TCP_PORT,
            row_feed_port: DEFAULT_ROW_FEED_PORT,
            secret: SharedSecret::default(),
            peers: Vec::new(),
            tls_cert: None,
            tls_key: None,
            peer_ca: None,
            sweep_interval_ms: millis(crate::hub::DEFAULT_SWEEP_INTERVAL),
            liveness_timeout_ms: millis(crate::hub::DEFAULT_LIVENESS_TIMEOUT),
            reconnect_backoff_ms: millis(crate::hub::reconnect::DEFAULT_RECONNECT_BACKOFF),
            dispatch_timeout_ms: millis(DEFAULT_DISPATCH_TIMEOUT),
            max_sessions: MAX_SESSIONS,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl DaemonConfig {
    /// Loads the configuration from `path` (if given) and the process
    /// environment, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text)
    }

    /// Parses TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies overrides from `(name, value)` pairs; unrelated names are
    /// ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            match name.as_str() {
                ENV_SANDBOX_ROOT => self.sandbox_root = PathBuf::from(value),
                ENV_HTTP_PORT => self.http_port = parse_port(ENV_HTTP_PORT, value)?,
                ENV_TCP_PORT => self.tcp_port = parse_port(ENV_TCP_PORT, value)?,
                ENV_ROW_FEED_PORT => self.row_feed_port = parse_port(ENV_ROW_FEED_PORT, value)?,
                ENV_SECRET => self.secret = SharedSecret::new(value),
                ENV_BIND => self.bind_address = value,
                ENV_PEERS => {
                    self.peers = value
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect();
                }
                ENV_TLS_CERT => self.tls_cert = Some(PathBuf::from(value)),
                ENV_TLS_KEY => self.tls_key = Some(PathBuf::from(value)),
                ENV_PEER_CA => self.peer_ca = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks the values that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        self.bind_ip()?;
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::IncompleteTls);
        }

        for (field, value) in [
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("liveness_timeout_ms", self.liveness_timeout_ms),
            ("reconnect_backoff_ms", self.reconnect_backoff_ms),
            ("dispatch_timeout_ms", self.dispatch_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        Ok(())
    }

    fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.bind_address.clone()))
    }

    /// Address of the HTTP listener.
    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.http_port))
    }

    /// Address of the authenticated TCP listener.
    pub fn tcp_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.tcp_port))
    }

    /// Address of the row feed listener.
    pub fn row_feed_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.row_feed_port))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// How often an outbound peer link sends a ping.
    ///
    /// A third of the liveness timeout, so that a single late reply does not
    /// get the link evicted on either side.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis((self.liveness_timeout_ms / 3).max(1))
    }

    /// Cert and key paths when the TCP listener serves TLS.
    pub fn tls_identity(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    /// Hub tuning derived from this configuration.
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            liveness_timeout: Duration::from_millis(self.liveness_timeout_ms),
            max_sessions: self.max_sessions,
        }
    }
}

fn parse_port(var: &'static str, value: String) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.sandbox_root, PathBuf::from("./host"));
        assert_eq!(config.http_port, 4123);
        assert_eq!(config.tcp_port, 12345);
        assert_eq!(config.row_feed_port, 8923);
        assert_eq!(config.hub_settings(), HubSettings::default());
        assert_eq!(config.dispatch_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(2));
        assert!(config.tls_identity().is_none());
        assert!(config.heartbeat_interval() < config.hub_settings().liveness_timeout);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = DaemonConfig::from_toml(
            r#"
            sandbox_root = "/srv/data"
            tcp_port = 9000
            secret = "s3cret"
            peers = ["10.0.0.2:12345"]
            liveness_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.sandbox_root, PathBuf::from("/srv/data"));
        assert_eq!(config.tcp_port, 9000);
        assert_eq!(config.http_port, 4123);
        assert!(config.secret.matches("s3cret"));
        assert_eq!(config.peers, vec!["10.0.0.2:12345".to_string()]);
        assert_eq!(
            config.hub_settings().liveness_timeout,
            Duration::from_millis(2500)
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = DaemonConfig::from_toml("tcp_prot = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DaemonConfig::default();
        config
            .apply_env(env(&[
                ("FILE_PATH", "/tmp/sandbox"),
                ("PORT", "8080"),
                ("DMOUNT_TCP_PORT", "7000"),
                ("DMOUNT_ROW_FEED_PORT", "7001"),
                ("DMOUNT_SECRET", "abc"),
                ("DMOUNT_BIND", "127.0.0.1"),
                ("DMOUNT_PEERS", "a:1, b:2,"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(config.sandbox_root, PathBuf::from("/tmp/sandbox"));
        assert_eq!(config.http_addr().unwrap(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.tcp_addr().unwrap(), "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.row_feed_addr().unwrap(), "127.0.0.1:7001".parse().unwrap());
        assert_eq!(config.peers, vec!["a:1".to_string(), "b:2".to_string()]);
        assert!(config.secret.matches("abc"));
    }

    #[test]
    fn test_env_invalid_port() {
        let mut config = DaemonConfig::default();
        let err = config.apply_env(env(&[("PORT", "http")])).unwrap_err();
        assert_eq!(err.to_string(), "invalid value \"http\" for PORT");
    }

    #[test]
    fn test_validate_requires_secret() {
        let config = DaemonConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingSecret)));
    }

    #[test]
    fn test_validate_rejects_zero_duration_and_bad_bind() {
        let mut config = DaemonConfig {
            secret: SharedSecret::new("x"),
            sweep_interval_ms: 0,
            ..DaemonConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "sweep_interval_ms"
            })
        ));

        config.sweep_interval_ms = 1000;
        config.bind_address = "not-an-ip".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBind(_))));
    }

    #[test]
    fn test_tls_paths() {
        let mut config = DaemonConfig {
            secret: SharedSecret::new("x"),
            ..DaemonConfig::default()
        };
        config
            .apply_env(env(&[
                ("DMOUNT_TLS_CERT", "/etc/dmount/cert.pem"),
                ("DMOUNT_PEER_CA", "/etc/dmount/ca.pem"),
            ]))
            .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::IncompleteTls)));

        config.apply_env(env(&[("DMOUNT_TLS_KEY", "/etc/dmount/key.pem")])).unwrap();
        config.validate().unwrap();
        let (cert, key) = config.tls_identity().unwrap();
        assert_eq!(cert, Path::new("/etc/dmount/cert.pem"));
        assert_eq!(key, Path::new("/etc/dmount/key.pem"));
        assert_eq!(config.peer_ca, Some(PathBuf::from("/etc/dmount/ca.pem")));
    }

    #[test]
    fn test_heartbeat_interval() {
        let config = DaemonConfig {
            liveness_timeout_ms: 400,
            ..DaemonConfig::default()
        };
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(133));

        let config = DaemonConfig {
            liveness_timeout_ms: 1,
            ..DaemonConfig::default()
        };
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_secret_matching() {
        let secret = SharedSecret::new("open sesame");
        assert!(secret.matches("open sesame"));
        assert!(!secret.matches("open sesame "));
        assert!(!secret.matches("open"));
        assert!(!secret.matches(""));
        assert!(!SharedSecret::default().matches(""));
        assert_eq!(format!("{secret:?}"), "SharedSecret(<redacted>)");
    }
}
