//! Login State Entity

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::entity::SsoConnection;
use crate::shared::random::generate_token;
use crate::shared::tsid::TsidGenerator;

/// Default lifetime of a login attempt: 10 minutes
pub const DEFAULT_STATE_TTL_SECONDS: i64 = 600;

/// One in-flight login attempt.
///
/// The `state` token doubles as the CSRF token for the round trip through the IdP.
/// OIDC attempts also carry the nonce bound into the ID token and the PKCE verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    #[serde(rename = "_id")]
    pub id: String,

    /// 256-bit random token, base64url
    pub state: String,

    pub connection_id: String,

    pub organization_id: String,

    /// Where the client application wants the user afterwards
    pub redirect_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}

impl AuthState {
    pub fn new(connection: &SsoConnection, redirect_url: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: TsidGenerator::generate(),
            state: generate_token(),
            connection_id: connection.id.clone(),
            organization_id: connection.organization_id.clone(),
            redirect_url: redirect_url.into(),
            nonce: None,
            code_verifier: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
