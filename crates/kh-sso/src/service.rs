//! SSO Service
//!
//! Wires the registry, state store and both flow engines together and dispatches a
//! login to the engine matching the connection's protocol.

use std::sync::Arc;
use std::time::Duration;
use kh_common::redact_token;
use tracing::{field, info, info_span, Instrument};

use crate::connection::entity::ProtocolConfig;
use crate::connection::registry::ConnectionRegistry;
use crate::connection::repository::ConnectionRepository;
use crate::login::completion::{LoginCompletion, LoginResult};
use crate::login::directory::AccountDirectory;
use crate::login::session::SessionIssuer;
use crate::oidc::discovery::ProviderMetadataCache;
use crate::oidc::flow::OidcFlow;
use crate::saml::flow::SamlFlow;
use crate::shared::error::{Result, SsoError};
use crate::state::repository::StateRepository;
use crate::state::store::StateStore;

/// Runtime settings for the SSO core
#[derive(Debug, Clone)]
pub struct SsoSettings {
    /// Public base URL; SP identifiers and the OIDC redirect URI derive from it
    pub base_url: String,
    pub state_ttl: Duration,
    pub clock_skew: Duration,
    pub http_timeout: Duration,
    pub metadata_cache_ttl: Duration,
}

impl Default for SsoSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            state_ttl: Duration::from_secs(600),
            clock_skew: Duration::from_secs(120),
            http_timeout: Duration::from_secs(30),
            metadata_cache_ttl: Duration::from_secs(3600),
        }
    }
}

pub struct SsoService {
    registry: Arc<ConnectionRegistry>,
    states: Arc<StateStore>,
    oidc: OidcFlow,
    saml: SamlFlow,
}

impl SsoService {
    pub fn new(
        settings: SsoSettings,
        connections: Arc<dyn ConnectionRepository>,
        states: Arc<dyn StateRepository>,
        directory: Arc<dyn AccountDirectory>,
        sessions: Arc<dyn SessionIssuer>,
    ) -> Result<Self> {
        let base_url = settings.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SsoError::validation("base_url must not be empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| SsoError::internal(format!("Failed to build HTTP client: {}", e)))?;

        let state_ttl = chrono::Duration::from_std(settings.state_ttl)
            .map_err(|e| SsoError::validation(format!("Invalid state TTL: {}", e)))?;
        let clock_skew = chrono::Duration::from_std(settings.clock_skew)
            .map_err(|e| SsoError::validation(format!("Invalid clock skew: {}", e)))?;

        let registry = Arc::new(ConnectionRegistry::new(connections, base_url));
        let states = Arc::new(StateStore::new(states).with_ttl(state_ttl));
        let metadata = Arc::new(ProviderMetadataCache::new(http, settings.metadata_cache_ttl));
        let completion = Arc::new(LoginCompletion::new(directory, sessions));

        let oidc = OidcFlow::new(registry.clone(), states.clone(), metadata, completion.clone())
            .with_leeway(settings.clock_skew.as_secs());
        let saml = SamlFlow::new(registry.clone(), states.clone(), completion)
            .with_clock_skew(clock_skew);

        info!(
            base_url = %registry.base_url(),
            state_ttl_secs = settings.state_ttl.as_secs(),
            "SSO service initialized"
        );

        Ok(Self {
            registry,
            states,
            oidc,
            saml,
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn states(&self) -> &Arc<StateStore> {
        &self.states
    }

    pub fn oidc(&self) -> &OidcFlow {
        &self.oidc
    }

    pub fn saml(&self) -> &SamlFlow {
        &self.saml
    }

    /// Start a login for `domain`; returns the URL to send the browser to.
    pub async fn initiate_login(&self, domain: &str, redirect_url: &str) -> Result<String> {
        let connection = self.registry.find_active_by_domain(domain).await?;

        match &connection.protocol_config {
            ProtocolConfig::Oidc(_) => self.oidc.initiate(&connection, redirect_url).await,
            ProtocolConfig::Saml(_) => self.saml.initiate(&connection, redirect_url).await,
        }
    }

    pub async fn handle_oidc_callback(&self, state: &str, code: &str) -> Result<LoginResult> {
        let span = info_span!(
            "sso_callback",
            protocol = "oidc",
            state = %redact_token(state),
            connection_id = field::Empty,
        );
        self.oidc.handle_callback(state, code).instrument(span).await
    }

    pub async fn handle_saml_callback(&self, relay_state: &str, saml_response: &str) -> Result<LoginResult> {
        let span = info_span!(
            "sso_callback",
            protocol = "saml",
            state = %redact_token(relay_state),
            connection_id = field::Empty,
        );
        self.saml
            .handle_callback(relay_state, saml_response)
            .instrument(span)
            .await
    }

    pub async fn sp_metadata(&self, connection_id: &str) -> Result<String> {
        self.registry.sp_metadata(connection_id).await
    }
}
