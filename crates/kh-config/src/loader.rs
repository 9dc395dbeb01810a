//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "keyhaven.toml",
    "./config/config.toml",
    "/etc/keyhaven/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides,
    /// then validate it.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("KEYHAVEN_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `KEYHAVEN_*` overrides read through `lookup`. Unparseable numbers are ignored.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    if let Some(port) = lookup("KEYHAVEN_HTTP_PORT").and_then(|v| v.parse().ok()) {
        config.http.port = port;
    }
    if let Some(val) = lookup("KEYHAVEN_HTTP_HOST") {
        config.http.host = val;
    }
    if let Some(val) = lookup("KEYHAVEN_CORS_ORIGINS") {
        config.http.cors_origins = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    // MongoDB
    if let Some(val) = lookup("KEYHAVEN_MONGODB_URI") {
        config.mongodb.uri = val;
    }
    if let Some(val) = lookup("KEYHAVEN_MONGODB_DATABASE") {
        config.mongodb.database = val;
    }

    // SSO
    if let Some(val) = lookup("KEYHAVEN_SSO_BASE_URL") {
        config.sso.base_url = val;
    }
    if let Some(n) = lookup("KEYHAVEN_SSO_STATE_TTL_SECS").and_then(|v| v.parse().ok()) {
        config.sso.state_ttl_secs = n;
    }
    if let Some(n) = lookup("KEYHAVEN_SSO_CLOCK_SKEW_SECS").and_then(|v| v.parse().ok()) {
        config.sso.clock_skew_secs = n;
    }
    if let Some(n) = lookup("KEYHAVEN_SSO_HTTP_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.sso.http_timeout_secs = n;
    }
    if let Some(n) = lookup("KEYHAVEN_SSO_METADATA_CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
        config.sso.metadata_cache_ttl_secs = n;
    }
    if let Some(n) = lookup("KEYHAVEN_SSO_REAPER_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.sso.reaper_interval_secs = n;
    }
    if let Some(val) = lookup("KEYHAVEN_SSO_STORE") {
        config.sso.store = val.to_lowercase();
    }

    // JWT
    if let Some(val) = lookup("KEYHAVEN_JWT_ISSUER") {
        config.jwt.issuer = val;
    }
    if let Some(val) = lookup("KEYHAVEN_JWT_AUDIENCE") {
        config.jwt.audience = val;
    }
    if let Some(val) = lookup("KEYHAVEN_JWT_SECRET") {
        config.jwt.secret = val;
    }
    if let Some(val) = lookup("KEYHAVEN_JWT_PRIVATE_KEY_PATH") {
        config.jwt.private_key_path = val;
    }
    if let Some(val) = lookup("KEYHAVEN_JWT_PUBLIC_KEY_PATH") {
        config.jwt.public_key_path = val;
    }
    if let Some(n) = lookup("KEYHAVEN_JWT_ACCESS_TOKEN_EXPIRY_SECS").and_then(|v| v.parse().ok()) {
        config.jwt.access_token_expiry_secs = n;
    }
    if let Some(n) = lookup("KEYHAVEN_JWT_REFRESH_TOKEN_EXPIRY_SECS").and_then(|v| v.parse().ok()) {
        config.jwt.refresh_token_expiry_secs = n;
    }
}
