//! SSO Connection Entity

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::login::directory::OrganizationRole;
use crate::shared::tsid::TsidGenerator;

/// Federation protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SsoProtocol {
    Saml,
    Oidc,
}

impl SsoProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SsoProtocol::Saml => "saml",
            SsoProtocol::Oidc => "oidc",
        }
    }
}

impl std::fmt::Display for SsoProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection lifecycle. Only `Active` connections accept logins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Draft,
    Active,
    Inactive,
}

/// SAML identity provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SamlConfig {
    /// IdP entity ID; must match the assertion Issuer
    #[serde(default)]
    pub entity_id: String,
    /// IdP single sign-on endpoint (redirect binding)
    #[serde(default)]
    pub sso_url: String,
    /// IdP signing certificate (PEM or bare base64)
    #[serde(default)]
    pub certificate: String,
    #[serde(default = "default_true")]
    pub want_assertion_signed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slo_url: Option<String>,
    #[serde(default)]
    pub sign_authn_requests: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_id_format: Option<String>,
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            sso_url: String::new(),
            certificate: String::new(),
            want_assertion_signed: true,
            slo_url: None,
            sign_authn_requests: false,
            name_id_format: None,
        }
    }
}

impl SamlConfig {
    /// Fields required before a SAML connection can be created or activated
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.entity_id.trim().is_empty() {
            missing.push("entity_id");
        }
        if self.sso_url.trim().is_empty() {
            missing.push("sso_url");
        }
        if self.certificate.trim().is_empty() {
            missing.push("certificate");
        }
        missing
    }
}

/// OIDC identity provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// Key set URL used when discovery is skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info_url: Option<String>,
    #[serde(default = "default_true")]
    pub use_discovery: bool,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_true")]
    pub pkce_enabled: bool,
    #[serde(default = "default_email_claim")]
    pub email_claim: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_claim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_claim: Option<String>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            client_secret: None,
            auth_url: None,
            token_url: None,
            jwks_uri: None,
            user_info_url: None,
            use_discovery: true,
            scopes: default_scopes(),
            pkce_enabled: true,
            email_claim: default_email_claim(),
            name_claim: None,
            groups_claim: None,
        }
    }
}

impl OidcConfig {
    /// Fields required before an OIDC connection can be activated
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.issuer.trim().is_empty() {
            missing.push("issuer");
        }
        if self.client_id.trim().is_empty() {
            missing.push("client_id");
        }
        missing
    }

    /// Discovery is needed when requested or when either static endpoint is absent.
    pub fn needs_discovery(&self) -> bool {
        self.use_discovery || is_blank(&self.auth_url) || is_blank(&self.token_url)
    }

    /// Space-separated scope string, falling back to the defaults when none are set.
    pub fn scope_param(&self) -> String {
        if self.scopes.is_empty() {
            default_scopes().join(" ")
        } else {
            self.scopes.join(" ")
        }
    }

    pub fn email_claim(&self) -> &str {
        let claim = self.email_claim.trim();
        if claim.is_empty() {
            "email"
        } else {
            claim
        }
    }
}

/// Protocol-specific configuration. Exactly one variant per connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProtocolConfig {
    Saml(SamlConfig),
    Oidc(OidcConfig),
}

impl ProtocolConfig {
    pub fn protocol(&self) -> SsoProtocol {
        match self {
            ProtocolConfig::Saml(_) => SsoProtocol::Saml,
            ProtocolConfig::Oidc(_) => SsoProtocol::Oidc,
        }
    }

    pub fn missing_activation_fields(&self) -> Vec<&'static str> {
        match self {
            ProtocolConfig::Saml(cfg) => cfg.missing_fields(),
            ProtocolConfig::Oidc(cfg) => cfg.missing_fields(),
        }
    }
}

/// SSO connection for one organization and one email domain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoConnection {
    /// TSID, also the MongoDB _id
    #[serde(rename = "_id")]
    pub id: String,

    pub uuid: String,

    pub organization_id: String,

    pub name: String,

    /// Normalized email domain, unique across all organizations
    pub domain: String,

    pub status: ConnectionStatus,

    pub protocol_config: ProtocolConfig,

    #[serde(default)]
    pub default_role: OrganizationRole,

    #[serde(default)]
    pub auto_provision: bool,

    #[serde(default)]
    pub jit_provisioning: bool,

    /// Our SAML entity ID: `{base}/sso/metadata/{id}`
    pub sp_entity_id: String,

    /// Our assertion consumer endpoint: `{base}/sso/saml/acs`
    pub sp_acs_url: String,

    /// Pre-rendered metadata document, served verbatim when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp_metadata: Option<String>,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl SsoConnection {
    /// Build a draft connection. SP identifiers derive from `base_url` and the new id
    /// and never change afterwards.
    pub fn new(
        organization_id: impl Into<String>,
        name: impl Into<String>,
        domain: &str,
        protocol_config: ProtocolConfig,
        base_url: &str,
    ) -> Self {
        let id = TsidGenerator::generate();
        let base = base_url.trim_end_matches('/');
        let now = Utc::now();

        Self {
            sp_entity_id: format!("{}/sso/metadata/{}", base, id),
            sp_acs_url: format!("{}/sso/saml/acs", base),
            id,
            uuid: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            name: name.into(),
            domain: normalize_domain(domain),
            status: ConnectionStatus::Draft,
            protocol_config,
            default_role: OrganizationRole::Member,
            auto_provision: false,
            jit_provisioning: false,
            sp_metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn protocol(&self) -> SsoProtocol {
        self.protocol_config.protocol()
    }

    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }

    pub fn saml_config(&self) -> Option<&SamlConfig> {
        match &self.protocol_config {
            ProtocolConfig::Saml(cfg) => Some(cfg),
            ProtocolConfig::Oidc(_) => None,
        }
    }

    pub fn oidc_config(&self) -> Option<&OidcConfig> {
        match &self.protocol_config {
            ProtocolConfig::Oidc(cfg) => Some(cfg),
            ProtocolConfig::Saml(_) => None,
        }
    }

    /// The part after the last `@` must equal the connection domain.
    pub fn accepts_email(&self, email: &str) -> bool {
        email_domain(email).is_some_and(|d| d == self.domain)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Lowercase and trim an email domain; a leading `@` is dropped.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('@').trim().to_lowercase()
}

/// Lowercased domain part of an email address, if it has one.
pub fn email_domain(email: &str) -> Option<String> {
    let (local, domain) = email.trim().rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(domain.to_lowercase())
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn default_true() -> bool {
    true
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "email".to_string(), "profile".to_string()]
}

fn default_email_claim() -> String {
    "email".to_string()
}
