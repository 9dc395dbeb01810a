//! Keyhaven Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub mongodb: MongoConfig,
    pub sso: SsoConfig,
    pub jwt: JwtConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// MongoDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "keyhaven".to_string(),
        }
    }
}

/// Backing store for connections and in-flight login state.
pub const STORE_MONGODB: &str = "mongodb";
pub const STORE_MEMORY: &str = "memory";

/// SSO engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsoConfig {
    /// Public base URL of this service; SP entity ids and callback URLs derive from it.
    pub base_url: String,
    pub state_ttl_secs: u64,
    pub clock_skew_secs: u64,
    pub http_timeout_secs: u64,
    /// How long discovery documents and key sets stay cached per issuer.
    pub metadata_cache_ttl_secs: u64,
    /// Zero disables the periodic reaper; expiry is still enforced on read.
    pub reaper_interval_secs: u64,
    /// "mongodb" or "memory"
    pub store: String,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            state_ttl_secs: 600,          // 10 minutes
            clock_skew_secs: 120,         // 2 minutes
            http_timeout_secs: 30,
            metadata_cache_ttl_secs: 3600, // 1 hour
            reaper_interval_secs: 300,    // 5 minutes
            store: STORE_MONGODB.to_string(),
        }
    }
}

/// JWT session configuration
///
/// RS256 is used when both key paths are set, otherwise HS256 with `secret`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
    pub private_key_path: String,
    pub public_key_path: String,
    pub access_token_expiry_secs: u64,
    pub refresh_token_expiry_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: "keyhaven".to_string(),
            audience: "keyhaven".to_string(),
            secret: String::new(),
            private_key_path: String::new(),
            public_key_path: String::new(),
            access_token_expiry_secs: 3600,     // 1 hour
            refresh_token_expiry_secs: 2592000, // 30 days
        }
    }
}

impl JwtConfig {
    pub fn uses_rsa_keys(&self) -> bool {
        !self.private_key_path.is_empty() && !self.public_key_path.is_empty()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check values the server cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sso.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError("sso.base_url must not be empty".into()));
        }
        if self.sso.state_ttl_secs == 0 {
            return Err(ConfigError::ValidationError("sso.state_ttl_secs must be positive".into()));
        }
        if self.sso.http_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("sso.http_timeout_secs must be positive".into()));
        }
        if self.sso.metadata_cache_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sso.metadata_cache_ttl_secs must be positive".into(),
            ));
        }
        if self.sso.store != STORE_MONGODB && self.sso.store != STORE_MEMORY {
            return Err(ConfigError::ValidationError(format!(
                "sso.store must be '{}' or '{}', got '{}'",
                STORE_MONGODB, STORE_MEMORY, self.sso.store
            )));
        }
        if self.jwt.access_token_expiry_secs == 0 || self.jwt.refresh_token_expiry_secs == 0 {
            return Err(ConfigError::ValidationError("jwt expiries must be positive".into()));
        }
        Ok(())
    }

    /// SSO base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.sso.base_url.trim_end_matches('/')
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Keyhaven SSO Configuration
# Environment variables (KEYHAVEN_*) override these settings

[http]
port = 8080
host = "0.0.0.0"
cors_origins = ["http://localhost:3000"]

[mongodb]
uri = "mongodb://localhost:27017"
database = "keyhaven"

[sso]
base_url = "https://auth.example.com"
state_ttl_secs = 600
clock_skew_secs = 120
http_timeout_secs = 30
metadata_cache_ttl_secs = 3600
reaper_interval_secs = 300
store = "mongodb"  # mongodb, memory

[jwt]
issuer = "keyhaven"
audience = "keyhaven"
# Set both key paths for RS256, otherwise `secret` is used with HS256
secret = ""
private_key_path = ""
public_key_path = ""
access_token_expiry_secs = 3600
refresh_token_expiry_secs = 2592000
"#
        .to_string()
    }
}
