use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::upstream::{Timeouts, DEFAULT_ENDPOINT};

/// Gateway config, loaded from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address the HTTP surface listens on.
    pub bind: SocketAddr,
    /// Origins allowed by CORS. Empty disables the CORS layer.
    pub cors_origins: Vec<String>,
    pub upstream: UpstreamConfig,
}

/// The session-manager backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL, e.g. `http://localhost:3000/api`.
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Budget for one bulk exec envelope call.
    pub bulk_timeout_secs: u64,
    /// How long the upstream itself lets a single session's command run.
    /// The bulk budget must exceed it or slow sessions would be cut off.
    pub session_exec_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5001)),
            cors_origins: Vec::new(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            bulk_timeout_secs: 300,
            session_exec_timeout_secs: 60,
        }
    }
}

impl GatewayConfig {
    /// Load config from a TOML file path. A missing file yields the defaults.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream.endpoint_url()?;
        let u = &self.upstream;
        for (name, value) in [
            ("connect_timeout_secs", u.connect_timeout_secs),
            ("request_timeout_secs", u.request_timeout_secs),
            ("bulk_timeout_secs", u.bulk_timeout_secs),
            ("session_exec_timeout_secs", u.session_exec_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        if u.bulk_timeout_secs <= u.session_exec_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "bulk_timeout_secs ({}) must be greater than session_exec_timeout_secs ({})",
                u.bulk_timeout_secs, u.session_exec_timeout_secs
            )));
        }
        if u.bulk_timeout_secs < u.request_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "bulk_timeout_secs ({}) must not be less than request_timeout_secs ({})",
                u.bulk_timeout_secs, u.request_timeout_secs
            )));
        }
        Ok(())
    }
}

impl UpstreamConfig {
    /// The endpoint as an absolute http(s) URL.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url: Url = self
            .endpoint
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("endpoint '{}': {}", self.endpoint, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Invalid(format!(
                "endpoint '{}': unsupported scheme '{}'",
                self.endpoint, other
            ))),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
            bulk: Duration::from_secs(self.bulk_timeout_secs),
        }
    }
}

/// Errors that can occur when loading config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {}", .0.display(), .1)]
    ReadFailed(PathBuf, std::io::Error),
    #[error("Failed to parse config {}: {}", .0.display(), .1)]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Warn when a config file is world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}). \
             It names internal endpoints -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

/// Returns true if the given file mode has the world-readable bit set.
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
