//! ID token verification against the provider's JWKS

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::discovery::{JwkKey, Jwks, ProviderMetadataCache};
use crate::shared::error::{Result, SsoError};

/// Standard OIDC ID token claims. Provider-specific claims land in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: StringOrVec,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IdTokenClaims {
    /// Look up a claim by name, covering the typed fields too.
    pub fn claim(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "iss" => Some(self.iss.clone().into()),
            "sub" => Some(self.sub.clone().into()),
            "nonce" => self.nonce.clone().map(Into::into),
            _ => self.extra.get(name).cloned(),
        }
    }
}

/// Audience can be a string or array
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

impl StringOrVec {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            StringOrVec::String(s) => s == value,
            StringOrVec::Vec(v) => v.iter().any(|s| s == value),
        }
    }
}

/// What a valid ID token must carry for one login
#[derive(Debug, Clone)]
pub struct IdTokenExpectations<'a> {
    pub issuer: &'a str,
    pub client_id: &'a str,
    pub nonce: Option<&'a str>,
    pub leeway_secs: u64,
}

const ALLOWED_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Verify signature, issuer, audience, expiry and nonce of `id_token`.
///
/// An unknown `kid` triggers one forced JWKS refetch before giving up.
pub async fn verify_id_token(
    cache: &ProviderMetadataCache,
    jwks_uri: &str,
    id_token: &str,
    expected: &IdTokenExpectations<'_>,
) -> Result<IdTokenClaims> {
    let header = decode_header(id_token)
        .map_err(|e| SsoError::invalid_id_token(format!("Invalid ID token header: {}", e)))?;

    if !ALLOWED_ALGORITHMS.contains(&header.alg) {
        return Err(SsoError::invalid_id_token(format!(
            "Unsupported signing algorithm: {:?}",
            header.alg
        )));
    }

    let jwks = cache.jwks(jwks_uri).await?;
    let decoding_key = match select_key(&jwks, header.kid.as_deref()) {
        Some(key) => decoding_key(key)?,
        None => {
            debug!(kid = ?header.kid, "Signing key not in cached JWKS, refetching");
            let jwks = cache.refresh_jwks(jwks_uri).await?;
            let key = select_key(&jwks, header.kid.as_deref())
                .ok_or_else(|| SsoError::invalid_id_token("No matching key found in JWKS"))?;
            decoding_key(key)?
        }
    };

    let issuer = expected.issuer.trim_end_matches('/');
    let issuer_with_slash = format!("{}/", issuer);

    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[issuer, issuer_with_slash.as_str()]);
    validation.set_audience(&[expected.client_id]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    validation.leeway = expected.leeway_secs;

    let claims = decode::<IdTokenClaims>(id_token, &decoding_key, &validation)
        .map_err(|e| SsoError::invalid_id_token(format!("Invalid ID token: {}", e)))?
        .claims;

    if let Some(nonce) = expected.nonce {
        if claims.nonce.as_deref() != Some(nonce) {
            return Err(SsoError::invalid_id_token("Nonce mismatch"));
        }
    }

    if !claims.aud.contains(expected.client_id) {
        return Err(SsoError::invalid_id_token("Audience mismatch"));
    }

    Ok(claims)
}

fn select_key<'a>(jwks: &'a Jwks, kid: Option<&str>) -> Option<&'a JwkKey> {
    let usable = |k: &&JwkKey| k.kty == "RSA" && k.key_use.as_deref() != Some("enc");
    match kid {
        Some(kid) => jwks
            .keys
            .iter()
            .filter(usable)
            .find(|k| k.kid.as_deref() == Some(kid)),
        None => jwks.keys.iter().find(usable),
    }
}

fn decoding_key(key: &JwkKey) -> Result<DecodingKey> {
    let n = key
        .n
        .as_deref()
        .ok_or_else(|| SsoError::invalid_id_token("Missing 'n' in RSA key"))?;
    let e = key
        .e
        .as_deref()
        .ok_or_else(|| SsoError::invalid_id_token("Missing 'e' in RSA key"))?;
    DecodingKey::from_rsa_components(n, e)
        .map_err(|e| SsoError::invalid_id_token(format!("Invalid RSA key: {}", e)))
}
