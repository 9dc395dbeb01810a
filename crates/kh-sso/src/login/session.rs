//! Session Issuance
//!
//! JWT access/refresh pairs for users who completed a federated login.
//! RS256 when an RSA key pair is configured, HS256 with a shared secret otherwise.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::shared::error::{Result, SsoError};
use crate::shared::tsid::TsidGenerator;

const TOKEN_USE_ACCESS: &str = "access";
const TOKEN_USE_REFRESH: &str = "refresh";

/// Tokens handed back to the client after login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Claims carried by session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    /// How the user authenticated ("sso", "password", ...)
    pub amr: String,
    /// "access" or "refresh"
    pub token_use: String,
}

/// Issues and validates host-application sessions.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn issue_token_for_user(&self, user_id: &str, method: &str) -> Result<SessionTokens>;

    /// Validate an access token; refresh tokens are rejected.
    fn validate_access_token(&self, token: &str) -> Result<SessionClaims>;
}

#[derive(Debug, Clone)]
pub struct JwtSessionConfig {
    /// RSA private key PEM content (for RS256)
    pub rsa_private_key: Option<String>,
    /// RSA public key PEM content (for RS256)
    pub rsa_public_key: Option<String>,
    /// HMAC secret for HS256
    pub secret_key: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_secs: i64,
}

impl Default for JwtSessionConfig {
    fn default() -> Self {
        Self {
            rsa_private_key: None,
            rsa_public_key: None,
            secret_key: String::new(),
            issuer: "keyhaven".to_string(),
            audience: "keyhaven".to_string(),
            access_token_expiry_secs: 3600,          // 1 hour
            refresh_token_expiry_secs: 86400 * 30,   // 30 days
        }
    }
}

pub struct JwtSessionIssuer {
    config: JwtSessionConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    key_id: Option<String>,
}

impl JwtSessionIssuer {
    /// RS256 with a PEM key pair
    pub fn new_with_rsa(
        config: JwtSessionConfig,
        private_key_pem: &str,
        public_key_pem: &str,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| SsoError::internal(format!("Invalid RSA private key: {}", e)))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| SsoError::internal(format!("Invalid RSA public key: {}", e)))?;

        let key_id = Self::generate_key_id(public_key_pem);
        info!(key_id = %key_id, "Session issuer initialized with RS256");

        Ok(Self {
            config,
            encoding_key,
            decoding_key,
            algorithm: Algorithm::RS256,
            key_id: Some(key_id),
        })
    }

    /// HS256 with the configured secret
    pub fn new_with_secret(config: JwtSessionConfig) -> Result<Self> {
        if config.secret_key.is_empty() {
            return Err(SsoError::internal("JWT secret must not be empty"));
        }

        let encoding_key = EncodingKey::from_secret(config.secret_key.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret_key.as_bytes());

        info!("Session issuer initialized with HS256");

        Ok(Self {
            config,
            encoding_key,
            decoding_key,
            algorithm: Algorithm::HS256,
            key_id: None,
        })
    }

    /// RSA when both keys are present, otherwise the shared secret.
    pub fn new(config: JwtSessionConfig) -> Result<Self> {
        match (config.rsa_private_key.clone(), config.rsa_public_key.clone()) {
            (Some(private_key), Some(public_key)) => {
                Self::new_with_rsa(config, &private_key, &public_key)
            }
            _ => Self::new_with_secret(config),
        }
    }

    /// Key ID from the public key (8 char SHA-256 prefix)
    fn generate_key_id(public_key_pem: &str) -> String {
        let hash = Sha256::digest(public_key_pem.as_bytes());
        URL_SAFE_NO_PAD.encode(&hash[..6])
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn encode_token(&self, user_id: &str, method: &str, token_use: &str, ttl_secs: i64) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: TsidGenerator::generate(),
            amr: method.to_string(),
            token_use: token_use.to_string(),
        };

        let mut header = Header::new(self.algorithm);
        header.kid = self.key_id.clone();

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| SsoError::internal(format!("Failed to encode JWT: {}", e)))
    }

    fn decode_token(&self, token: &str) -> Result<SessionClaims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| SsoError::unauthorized(format!("Invalid session token: {}", e)))
    }
}

#[async_trait]
impl SessionIssuer for JwtSessionIssuer {
    async fn issue_token_for_user(&self, user_id: &str, method: &str) -> Result<SessionTokens> {
        let access_token = self.encode_token(
            user_id,
            method,
            TOKEN_USE_ACCESS,
            self.config.access_token_expiry_secs,
        )?;
        let refresh_token = self.encode_token(
            user_id,
            method,
            TOKEN_USE_REFRESH,
            self.config.refresh_token_expiry_secs,
        )?;

        Ok(SessionTokens {
            access_token,
            refresh_token,
            expires_in: self.config.access_token_expiry_secs,
        })
    }

    fn validate_access_token(&self, token: &str) -> Result<SessionClaims> {
        let claims = self.decode_token(token)?;
        if claims.token_use != TOKEN_USE_ACCESS {
            return Err(SsoError::unauthorized("Refresh token used as access token"));
        }
        Ok(claims)
    }
}

/// Extract a bearer token from an Authorization header value
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .or_else(|| header_value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
