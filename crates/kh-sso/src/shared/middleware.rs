//! API Middleware
//!
//! Session authentication for the admin surface. Accepts a bearer token in the
//! Authorization header or the session cookie.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, header::COOKIE, request::Parts},
};
use std::sync::Arc;
use tracing::warn;

use crate::login::directory::AccountDirectory;
use crate::login::session::{extract_bearer_token, SessionClaims, SessionIssuer};
use crate::shared::error::SsoError;

/// Session cookie set by the host application
pub const SESSION_COOKIE_NAME: &str = "kh_session";

/// Services the admin extractors need
#[derive(Clone)]
pub struct AdminAuth {
    pub sessions: Arc<dyn SessionIssuer>,
    pub directory: Arc<dyn AccountDirectory>,
}

impl AdminAuth {
    pub fn new(sessions: Arc<dyn SessionIssuer>, directory: Arc<dyn AccountDirectory>) -> Self {
        Self { sessions, directory }
    }

    /// The session user must be an active owner or admin of `organization_id`.
    pub async fn require_org_admin(&self, claims: &SessionClaims, organization_id: &str) -> Result<(), SsoError> {
        let membership = self
            .directory
            .find_membership(organization_id, &claims.sub)
            .await?;

        match membership {
            Some(m) if m.status.is_active() && m.role.can_manage_sso() => Ok(()),
            _ => {
                warn!(
                    user_id = %claims.sub,
                    organization_id = %organization_id,
                    "SSO admin access denied"
                );
                Err(SsoError::forbidden("organization admin access required"))
            }
        }
    }
}

/// Authenticated session extractor
pub struct Authenticated(pub SessionClaims);

impl std::ops::Deref for Authenticated {
    type Target = SessionClaims;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn extract_session_cookie(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|c| c.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    AdminAuth: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = SsoError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AdminAuth::from_ref(state);

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer_token)
            .map(String::from)
            .or_else(|| extract_session_cookie(parts))
            .ok_or_else(|| SsoError::unauthorized("Missing authentication token"))?;

        let claims = auth.sessions.validate_access_token(&token)?;
        Ok(Authenticated(claims))
    }
}
