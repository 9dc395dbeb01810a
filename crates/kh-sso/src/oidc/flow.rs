//! OIDC Flow Engine
//!
//! Authorization code flow with nonce binding and optional PKCE. The login state is
//! persisted before the redirect URL is handed out and consumed before anything
//! else happens on callback.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use kh_common::{redact_email, redact_token};

use super::claims::extract_identity;
use super::discovery::{ProviderMetadataCache, ResolvedEndpoints};
use super::id_token::{verify_id_token, IdTokenExpectations};
use super::pkce::{PkcePair, CHALLENGE_METHOD};
use crate::connection::entity::{email_domain, OidcConfig, SsoConnection, SsoProtocol};
use crate::connection::registry::ConnectionRegistry;
use crate::login::completion::{LoginCompletion, LoginResult};
use crate::shared::error::{Result, SsoError};
use crate::shared::random::generate_token;
use crate::state::store::StateStore;

/// Path of the OIDC redirect URI below the public base URL
pub const CALLBACK_PATH: &str = "/sso/oidc/callback";

/// Token endpoint response (the fields we use)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

pub struct OidcFlow {
    connections: Arc<ConnectionRegistry>,
    states: Arc<StateStore>,
    metadata: Arc<ProviderMetadataCache>,
    completion: Arc<LoginCompletion>,
    callback_url: String,
    leeway_secs: u64,
}

impl OidcFlow {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        states: Arc<StateStore>,
        metadata: Arc<ProviderMetadataCache>,
        completion: Arc<LoginCompletion>,
    ) -> Self {
        let callback_url = format!("{}{}", connections.base_url(), CALLBACK_PATH);
        Self {
            connections,
            states,
            metadata,
            completion,
            callback_url,
            leeway_secs: 60,
        }
    }

    /// Clock leeway for ID token `exp`/`nbf` checks.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// Start a login against an active OIDC connection and return the provider
    /// authorization URL.
    pub async fn initiate(&self, connection: &SsoConnection, redirect_url: &str) -> Result<String> {
        let config = oidc_config(connection)?;

        let nonce = generate_token();
        let pkce = config.pkce_enabled.then(PkcePair::generate);

        let mut state = self
            .states
            .new_state(connection, redirect_url)
            .with_nonce(nonce.clone());
        if let Some(pkce) = &pkce {
            state = state.with_code_verifier(pkce.verifier.clone());
        }
        self.states.create(&state).await?;

        let endpoints = self.metadata.resolve_endpoints(config).await?;

        let mut url = Url::parse(&endpoints.authorization_endpoint).map_err(|e| {
            SsoError::provider(format!(
                "Invalid authorization endpoint '{}': {}",
                endpoints.authorization_endpoint, e
            ))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &config.client_id)
                .append_pair("redirect_uri", &self.callback_url)
                .append_pair("scope", &config.scope_param())
                .append_pair("state", &state.state)
                .append_pair("nonce", &nonce);
            if let Some(pkce) = &pkce {
                query
                    .append_pair("code_challenge", &pkce.challenge)
                    .append_pair("code_challenge_method", CHALLENGE_METHOD);
            }
        }

        info!(
            connection_id = %connection.id,
            domain = %connection.domain,
            pkce = pkce.is_some(),
            "OIDC login initiated"
        );
        Ok(url.into())
    }

    /// Complete a login from the provider's redirect.
    pub async fn handle_callback(&self, state_token: &str, code: &str) -> Result<LoginResult> {
        let state = self.states.consume(state_token).await?;
        tracing::Span::current().record("connection_id", state.connection_id.as_str());

        let connection = self
            .connections
            .get_for_callback(&state.connection_id, SsoProtocol::Oidc)
            .await?;
        let config = oidc_config(&connection)?;

        if code.trim().is_empty() {
            warn!(connection_id = %connection.id, "OIDC callback without an authorization code");
            return Err(SsoError::validation("authorization code is required"));
        }

        let endpoints = self.metadata.resolve_endpoints(config).await?;

        let tokens = self
            .exchange_code(config, &endpoints, code, state.code_verifier.as_deref())
            .await?;
        let id_token = tokens
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SsoError::invalid_id_token("Token response has no id_token"))?;

        let jwks_uri = self.metadata.jwks_uri_for(config, &endpoints).await?;
        let claims = verify_id_token(
            &self.metadata,
            &jwks_uri,
            &id_token,
            &IdTokenExpectations {
                issuer: &config.issuer,
                client_id: &config.client_id,
                nonce: state.nonce.as_deref(),
                leeway_secs: self.leeway_secs,
            },
        )
        .await
        .inspect_err(|e| {
            warn!(connection_id = %connection.id, error = %e, "ID token rejected");
        })?;

        let identity = extract_identity(&claims, config.email_claim(), config.name_claim.as_deref())
            .inspect_err(|e| {
                warn!(connection_id = %connection.id, error = %e, "ID token identity rejected");
            })?;

        if !connection.accepts_email(&identity.email) {
            let email_domain = email_domain(&identity.email).unwrap_or_default();
            warn!(
                connection_id = %connection.id,
                email = %redact_email(&identity.email),
                connection_domain = %connection.domain,
                "OIDC identity outside the connection domain"
            );
            return Err(SsoError::DomainMismatch {
                email_domain,
                connection_domain: connection.domain.clone(),
            });
        }

        debug!(
            connection_id = %connection.id,
            subject = %identity.subject,
            "OIDC identity verified"
        );

        self.completion
            .complete(&identity.email, &connection, &state.redirect_url)
            .await
    }

    async fn exchange_code(
        &self,
        config: &OidcConfig,
        endpoints: &ResolvedEndpoints,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.callback_url.as_str()),
            ("client_id", config.client_id.as_str()),
        ];
        if let Some(secret) = config.client_secret.as_deref().filter(|s| !s.is_empty()) {
            params.push(("client_secret", secret));
        }
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        debug!(
            token_endpoint = %endpoints.token_endpoint,
            code = %redact_token(code),
            "Exchanging authorization code"
        );

        let response = self
            .metadata
            .http_client()
            .post(&endpoints.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| SsoError::provider(format!("Token exchange failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Token endpoint rejected the code");
            return Err(SsoError::provider(format!("Token exchange failed with {}", status)));
        }

        response
            .json()
            .await
            .map_err(|e| SsoError::provider(format!("Failed to parse token response: {}", e)))
    }
}

fn oidc_config(connection: &SsoConnection) -> Result<&OidcConfig> {
    connection.oidc_config().ok_or_else(|| {
        SsoError::protocol_mismatch(format!("connection {} is not an OIDC connection", connection.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::entity::{ConnectionStatus, ProtocolConfig};
    use crate::connection::repository::InMemoryConnectionRepository;
    use crate::login::directory::InMemoryAccountDirectory;
    use crate::login::session::{JwtSessionConfig, JwtSessionIssuer};
    use crate::oidc::pkce::code_challenge;
    use crate::state::repository::InMemoryStateRepository;
    use std::collections::HashMap;
    use std::time::Duration;

    fn flow() -> (OidcFlow, Arc<StateStore>) {
        let connections = Arc::new(ConnectionRegistry::new(
            Arc::new(InMemoryConnectionRepository::new()),
            "https://sso.example.com",
        ));
        let states = Arc::new(StateStore::new(Arc::new(InMemoryStateRepository::new())));
        let metadata = Arc::new(ProviderMetadataCache::new(
            reqwest::Client::new(),
            Duration::from_secs(60),
        ));
        let sessions = JwtSessionIssuer::new_with_secret(JwtSessionConfig {
            secret_key: "test".into(),
            ..Default::default()
        })
        .unwrap();
        let completion = Arc::new(LoginCompletion::new(
            Arc::new(InMemoryAccountDirectory::new()),
            Arc::new(sessions),
        ));
        (
            OidcFlow::new(connections, states.clone(), metadata, completion),
            states,
        )
    }

    fn static_connection(pkce_enabled: bool) -> SsoConnection {
        let mut conn = SsoConnection::new(
            "org-1",
            "Acme",
            "acme.com",
            ProtocolConfig::Oidc(OidcConfig {
                issuer: "https://idp.acme.com".into(),
                client_id: "client-1".into(),
                auth_url: Some("https://idp.acme.com/authorize".into()),
                token_url: Some("https://idp.acme.com/token".into()),
                jwks_uri: Some("https://idp.acme.com/keys".into()),
                use_discovery: false,
                pkce_enabled,
                ..Default::default()
            }),
            "https://sso.example.com",
        );
        conn.status = ConnectionStatus::Active;
        conn
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[tokio::test]
    async fn test_initiate_with_pkce() {
        let (flow, states) = flow();
        let url = flow.initiate(&static_connection(true), "/app").await.unwrap();

        assert!(url.starts_with("https://idp.acme.com/authorize?"));
        let params = query(&url);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "https://sso.example.com/sso/oidc/callback");
        assert_eq!(params["scope"], "openid email profile");
        assert_eq!(params["code_challenge_method"], "S256");

        let stored = states.get_by_state(&params["state"]).await.unwrap();
        assert_eq!(stored.nonce.as_deref(), Some(params["nonce"].as_str()));
        assert_eq!(stored.redirect_url, "/app");
        let verifier = stored.code_verifier.unwrap();
        assert_eq!(code_challenge(&verifier), params["code_challenge"]);
    }

    #[tokio::test]
    async fn test_initiate_without_pkce() {
        let (flow, states) = flow();
        let url = flow.initiate(&static_connection(false), "/").await.unwrap();

        let params = query(&url);
        assert!(!params.contains_key("code_challenge"));
        assert!(!params.contains_key("code_challenge_method"));
        assert!(params.contains_key("nonce"));

        let stored = states.get_by_state(&params["state"]).await.unwrap();
        assert!(stored.code_verifier.is_none());
    }

    #[tokio::test]
    async fn test_callback_with_unknown_state() {
        let (flow, _) = flow();
        let err = flow.handle_callback("nope", "code").await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidState));
    }
}
