//! State Store
//!
//! Expiry is enforced on every read; an expired record is indistinguishable from a
//! missing one to the caller.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use kh_common::redact_token;

use crate::connection::entity::SsoConnection;
use crate::shared::error::{Result, SsoError};
use crate::state::entity::{AuthState, DEFAULT_STATE_TTL_SECONDS};
use crate::state::repository::StateRepository;

pub struct StateStore {
    repo: Arc<dyn StateRepository>,
    ttl: Duration,
}

impl StateStore {
    pub fn new(repo: Arc<dyn StateRepository>) -> Self {
        Self {
            repo,
            ttl: Duration::seconds(DEFAULT_STATE_TTL_SECONDS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh, unsaved state for a login attempt against `connection`.
    pub fn new_state(&self, connection: &SsoConnection, redirect_url: &str) -> AuthState {
        AuthState::new(connection, redirect_url, self.ttl)
    }

    pub async fn create(&self, state: &AuthState) -> Result<()> {
        self.repo.insert(state).await?;
        debug!(
            state = %redact_token(&state.state),
            connection_id = %state.connection_id,
            expires_at = %state.expires_at,
            "Login state created"
        );
        Ok(())
    }

    /// Look up a live state without consuming it.
    pub async fn get_by_state(&self, token: &str) -> Result<AuthState> {
        let state = self
            .repo
            .find_by_state(token)
            .await?
            .ok_or(SsoError::InvalidState)?;

        if state.is_expired_at(Utc::now()) {
            self.repo.delete_by_id(&state.id).await?;
            return Err(SsoError::InvalidState);
        }
        Ok(state)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.repo.delete_by_id(id).await
    }

    /// Remove the state for `token` and return it if it was still live.
    ///
    /// The record is gone after this call whatever the outcome, so a token can be
    /// presented at most once.
    pub async fn consume(&self, token: &str) -> Result<AuthState> {
        if token.trim().is_empty() {
            return Err(SsoError::InvalidState);
        }

        let Some(state) = self.repo.take_by_state(token).await? else {
            warn!(state = %redact_token(token), "Unknown or already used login state");
            return Err(SsoError::InvalidState);
        };

        if state.is_expired_at(Utc::now()) {
            warn!(
                state = %redact_token(token),
                connection_id = %state.connection_id,
                expired_at = %state.expires_at,
                "Expired login state presented"
            );
            return Err(SsoError::InvalidState);
        }

        Ok(state)
    }

    pub async fn delete_expired(&self) -> Result<u64> {
        self.repo.delete_expired(Utc::now()).await
    }
}
