//! SAML Flow Engine
//!
//! Login starts with a plain redirect to the IdP carrying `RelayState`; the IdP posts
//! the response back to the ACS endpoint.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use kh_common::{redact_email, redact_token};

use super::response::parse_encoded_response;
use super::validation::{extract_email, validate_response, ResponseExpectations, SamlRejection};
use crate::connection::entity::{email_domain, SamlConfig, SsoConnection, SsoProtocol};
use crate::connection::registry::ConnectionRegistry;
use crate::login::completion::{LoginCompletion, LoginResult};
use crate::shared::error::{Result, SsoError};
use crate::state::store::StateStore;

/// Path of the assertion consumer endpoint below the public base URL
pub const ACS_PATH: &str = "/sso/saml/acs";

pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 120;

pub struct SamlFlow {
    connections: Arc<ConnectionRegistry>,
    states: Arc<StateStore>,
    completion: Arc<LoginCompletion>,
    clock_skew: Duration,
}

impl SamlFlow {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        states: Arc<StateStore>,
        completion: Arc<LoginCompletion>,
    ) -> Self {
        Self {
            connections,
            states,
            completion,
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS),
        }
    }

    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Persist a login state and return the IdP SSO URL with `RelayState` appended.
    pub async fn initiate(&self, connection: &SsoConnection, redirect_url: &str) -> Result<String> {
        let config = saml_config(connection)?;

        let mut url = Url::parse(config.sso_url.trim()).map_err(|e| {
            SsoError::validation(format!("Invalid SAML sso_url '{}': {}", config.sso_url, e))
        })?;

        let state = self.states.new_state(connection, redirect_url);
        self.states.create(&state).await?;

        url.query_pairs_mut().append_pair("RelayState", &state.state);

        info!(
            connection_id = %connection.id,
            domain = %connection.domain,
            "SAML login initiated"
        );
        Ok(url.into())
    }

    /// Complete a login from the IdP's HTTP-POST to the ACS endpoint.
    pub async fn handle_callback(&self, relay_state: &str, saml_response: &str) -> Result<LoginResult> {
        if relay_state.trim().is_empty() {
            return Err(SamlRejection::MissingParameter("RelayState").into());
        }
        let state = self.states.consume(relay_state).await?;
        tracing::Span::current().record("connection_id", state.connection_id.as_str());

        if saml_response.trim().is_empty() {
            warn!(connection_id = %state.connection_id, "SAML callback without a response");
            return Err(SamlRejection::MissingParameter("SAMLResponse").into());
        }

        let connection = self
            .connections
            .get_for_callback(&state.connection_id, SsoProtocol::Saml)
            .await?;
        let config = saml_config(&connection)?;

        let email = self
            .verify(&connection, config, saml_response)
            .inspect_err(|reason| {
                warn!(
                    connection_id = %connection.id,
                    relay_state = %redact_token(relay_state),
                    reason = %reason,
                    "SAML response rejected"
                );
            })?;

        if !connection.accepts_email(&email) {
            warn!(
                connection_id = %connection.id,
                email = %redact_email(&email),
                connection_domain = %connection.domain,
                "SAML identity outside the connection domain"
            );
            return Err(SsoError::DomainMismatch {
                email_domain: email_domain(&email).unwrap_or_default(),
                connection_domain: connection.domain.clone(),
            });
        }

        self.completion
            .complete(&email, &connection, &state.redirect_url)
            .await
    }

    fn verify(
        &self,
        connection: &SsoConnection,
        config: &SamlConfig,
        saml_response: &str,
    ) -> std::result::Result<String, SamlRejection> {
        let response = parse_encoded_response(saml_response)?;

        validate_response(
            &response,
            &ResponseExpectations {
                idp_entity_id: &config.entity_id,
                want_signed: config.want_assertion_signed,
                sp_entity_id: &connection.sp_entity_id,
                acs_url: &connection.sp_acs_url,
                now: Utc::now(),
                clock_skew: self.clock_skew,
            },
        )?;

        extract_email(&response.assertion)
    }
}

fn saml_config(connection: &SsoConnection) -> Result<&SamlConfig> {
    connection.saml_config().ok_or_else(|| {
        SsoError::protocol_mismatch(format!("connection {} is not a SAML connection", connection.id))
    })
}
