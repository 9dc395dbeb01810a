//! Provider discovery and key sets
//!
//! Discovery documents and JWKS are cached per issuer / JWKS URI for a fixed TTL.
//! A verifier that meets an unknown `kid` can force one refetch of the key set to
//! follow provider key rotation.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::connection::entity::OidcConfig;
use crate::shared::error::{Result, SsoError};

/// OIDC provider discovery document (the fields we use)
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// JWKS (JSON Web Key Set)
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    #[serde(default)]
    pub keys: Vec<JwkKey>,
}

/// Individual JWK
#[derive(Debug, Clone, Deserialize)]
pub struct JwkKey {
    pub kty: String,
    #[serde(rename = "use", default)]
    pub key_use: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

/// Endpoints for one login, from discovery or static configuration
#[derive(Debug, Clone)]
pub struct ResolvedEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: Option<String>,
}

struct CacheEntry<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

impl<T> CacheEntry<T> {
    fn fresh(&self, ttl: Duration) -> Option<Arc<T>> {
        (self.fetched_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

pub struct ProviderMetadataCache {
    http: reqwest::Client,
    ttl: Duration,
    documents: RwLock<HashMap<String, CacheEntry<ProviderMetadata>>>,
    key_sets: RwLock<HashMap<String, CacheEntry<Jwks>>>,
}

impl ProviderMetadataCache {
    pub fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            http,
            ttl,
            documents: RwLock::new(HashMap::new()),
            key_sets: RwLock::new(HashMap::new()),
        }
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Discovery document for `issuer`, fetched from
    /// `{issuer}/.well-known/openid-configuration` when not cached.
    pub async fn discover(&self, issuer: &str) -> Result<Arc<ProviderMetadata>> {
        let issuer = issuer.trim().trim_end_matches('/');
        if issuer.is_empty() {
            return Err(SsoError::validation("OIDC issuer is not configured"));
        }

        if let Some(doc) = self
            .documents
            .read()
            .await
            .get(issuer)
            .and_then(|e| e.fresh(self.ttl))
        {
            return Ok(doc);
        }

        let discovery_url = format!("{}/.well-known/openid-configuration", issuer);
        info!(url = %discovery_url, "Fetching OIDC discovery document");

        let document: ProviderMetadata = self.fetch_json(&discovery_url, "discovery").await?;

        if document.issuer.trim_end_matches('/') != issuer {
            warn!(
                configured = %issuer,
                advertised = %document.issuer,
                "Discovery document advertises a different issuer"
            );
        }

        let document = Arc::new(document);
        self.documents.write().await.insert(
            issuer.to_string(),
            CacheEntry {
                value: document.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(document)
    }

    /// Cached key set for `jwks_uri`.
    pub async fn jwks(&self, jwks_uri: &str) -> Result<Arc<Jwks>> {
        if let Some(jwks) = self
            .key_sets
            .read()
            .await
            .get(jwks_uri)
            .and_then(|e| e.fresh(self.ttl))
        {
            return Ok(jwks);
        }
        self.refresh_jwks(jwks_uri).await
    }

    /// Fetch the key set regardless of cache state.
    pub async fn refresh_jwks(&self, jwks_uri: &str) -> Result<Arc<Jwks>> {
        debug!(url = %jwks_uri, "Fetching JWKS");
        let jwks: Jwks = self.fetch_json(jwks_uri, "JWKS").await?;

        let jwks = Arc::new(jwks);
        self.key_sets.write().await.insert(
            jwks_uri.to_string(),
            CacheEntry {
                value: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(jwks)
    }

    /// Authorization/token endpoints: discovery when the connection asks for it or
    /// when either static endpoint is missing, otherwise the static ones.
    pub async fn resolve_endpoints(&self, config: &OidcConfig) -> Result<ResolvedEndpoints> {
        if config.needs_discovery() {
            let doc = self.discover(&config.issuer).await?;
            return Ok(ResolvedEndpoints {
                authorization_endpoint: doc.authorization_endpoint.clone(),
                token_endpoint: doc.token_endpoint.clone(),
                jwks_uri: Some(doc.jwks_uri.clone()),
            });
        }

        Ok(ResolvedEndpoints {
            authorization_endpoint: config.auth_url.clone().unwrap_or_default(),
            token_endpoint: config.token_url.clone().unwrap_or_default(),
            jwks_uri: config
                .jwks_uri
                .clone()
                .filter(|u| !u.trim().is_empty()),
        })
    }

    /// JWKS URI for verifying ID tokens; discovers it when nothing static is set.
    pub async fn jwks_uri_for(&self, config: &OidcConfig, endpoints: &ResolvedEndpoints) -> Result<String> {
        match &endpoints.jwks_uri {
            Some(uri) => Ok(uri.clone()),
            None => Ok(self.discover(&config.issuer).await?.jwks_uri.clone()),
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SsoError::provider(format!("Failed to fetch {} from {}: {}", what, url, e)))?;

        if !response.status().is_success() {
            return Err(SsoError::provider(format!(
                "{} endpoint {} returned {}",
                what,
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SsoError::provider(format!("Failed to parse {} from {}: {}", what, url, e)))
    }
}
