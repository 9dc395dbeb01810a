//! Connection Registry
//!
//! Lifecycle rules for SSO connections: domain normalization and uniqueness, the
//! immutable protocol, activation requirements, and SP identifiers.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::connection::entity::{
    normalize_domain, ConnectionStatus, OidcConfig, ProtocolConfig, SamlConfig, SsoConnection,
    SsoProtocol,
};
use crate::connection::metadata::render_sp_metadata;
use crate::connection::repository::ConnectionRepository;
use crate::login::directory::OrganizationRole;
use crate::shared::error::{Result, SsoError};
use crate::shared::tsid::TsidGenerator;

/// Input for creating a connection
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDraft {
    #[serde(default)]
    pub name: String,
    pub domain: String,
    pub protocol: SsoProtocol,
    #[serde(default)]
    pub saml_config: Option<SamlConfig>,
    #[serde(default)]
    pub oidc_config: Option<OidcConfig>,
    #[serde(default)]
    pub default_role: Option<OrganizationRole>,
    #[serde(default)]
    pub auto_provision: bool,
    #[serde(default)]
    pub jit_provisioning: bool,
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub saml_config: Option<SamlConfig>,
    pub oidc_config: Option<OidcConfig>,
    pub default_role: Option<OrganizationRole>,
    pub auto_provision: Option<bool>,
    pub jit_provisioning: Option<bool>,
    pub status: Option<ConnectionStatus>,
}

pub struct ConnectionRegistry {
    repo: Arc<dyn ConnectionRepository>,
    base_url: String,
}

impl ConnectionRegistry {
    pub fn new(repo: Arc<dyn ConnectionRepository>, base_url: impl Into<String>) -> Self {
        Self {
            repo,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create(&self, organization_id: &str, draft: ConnectionDraft) -> Result<SsoConnection> {
        let domain = normalize_domain(&draft.domain);
        if domain.is_empty() {
            return Err(SsoError::validation("domain is required"));
        }

        let protocol_config = match (draft.protocol, draft.saml_config, draft.oidc_config) {
            (SsoProtocol::Saml, Some(saml), None) => {
                let missing = saml.missing_fields();
                if !missing.is_empty() {
                    return Err(SsoError::validation(format!(
                        "SAML connection requires: {}",
                        missing.join(", ")
                    )));
                }
                ProtocolConfig::Saml(saml)
            }
            (SsoProtocol::Oidc, None, Some(oidc)) => ProtocolConfig::Oidc(oidc),
            (protocol, _, _) => {
                return Err(SsoError::protocol_mismatch(format!(
                    "{} connection requires exactly a {} configuration",
                    protocol, protocol
                )));
            }
        };

        if self.repo.find_by_domain(&domain).await?.is_some() {
            return Err(SsoError::duplicate("SsoConnection", "domain", &domain));
        }

        let name = if draft.name.trim().is_empty() {
            domain.clone()
        } else {
            draft.name.trim().to_string()
        };

        let mut connection =
            SsoConnection::new(organization_id, name, &domain, protocol_config, &self.base_url);
        connection.default_role = draft.default_role.unwrap_or_default();
        connection.auto_provision = draft.auto_provision;
        connection.jit_provisioning = draft.jit_provisioning;

        self.repo.insert(&connection).await?;

        info!(
            connection_id = %connection.id,
            organization_id = %connection.organization_id,
            domain = %connection.domain,
            protocol = %connection.protocol(),
            "SSO connection created"
        );

        Ok(connection)
    }

    pub async fn get(&self, id: &str) -> Result<SsoConnection> {
        if !TsidGenerator::is_valid(id) {
            return Err(SsoError::ConnectionNotFound(id.to_string()));
        }
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| SsoError::ConnectionNotFound(id.to_string()))
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Result<SsoConnection> {
        self.repo
            .find_by_uuid(uuid)
            .await?
            .ok_or_else(|| SsoError::ConnectionNotFound(uuid.to_string()))
    }

    pub async fn list_by_organization(&self, organization_id: &str) -> Result<Vec<SsoConnection>> {
        self.repo.find_by_organization(organization_id).await
    }

    pub async fn update(&self, id: &str, patch: ConnectionPatch) -> Result<SsoConnection> {
        let mut connection = self.get(id).await?;

        if let Some(name) = patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(SsoError::validation("name must not be empty"));
            }
            connection.name = name.to_string();
        }

        if let Some(domain) = patch.domain {
            let domain = normalize_domain(&domain);
            if domain.is_empty() {
                return Err(SsoError::validation("domain must not be empty"));
            }
            if domain != connection.domain {
                if let Some(other) = self.repo.find_by_domain(&domain).await? {
                    if other.id != connection.id {
                        return Err(SsoError::duplicate("SsoConnection", "domain", &domain));
                    }
                }
                connection.domain = domain;
            }
        }

        apply_protocol_patch(&mut connection, patch.saml_config, patch.oidc_config)?;

        if let Some(auto_provision) = patch.auto_provision {
            connection.auto_provision = auto_provision;
        }
        if let Some(role) = patch.default_role {
            connection.default_role = role;
        }
        if let Some(jit) = patch.jit_provisioning {
            connection.jit_provisioning = jit;
        }
        if let Some(status) = patch.status {
            connection.status = status;
        }

        // An active connection must stay usable after the edit
        if connection.is_active() {
            ensure_activatable(&connection)?;
        }

        connection.touch();
        self.repo.update(&connection).await?;

        info!(connection_id = %connection.id, status = ?connection.status, "SSO connection updated");
        Ok(connection)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if !TsidGenerator::is_valid(id) || !self.repo.delete(id).await? {
            return Err(SsoError::ConnectionNotFound(id.to_string()));
        }
        info!(connection_id = %id, "SSO connection deleted");
        Ok(())
    }

    pub async fn activate(&self, id: &str) -> Result<SsoConnection> {
        let mut connection = self.get(id).await?;
        ensure_activatable(&connection)?;

        connection.status = ConnectionStatus::Active;
        connection.touch();
        self.repo.update(&connection).await?;

        info!(
            connection_id = %connection.id,
            domain = %connection.domain,
            protocol = %connection.protocol(),
            "SSO connection activated"
        );
        Ok(connection)
    }

    /// SP metadata XML for a SAML connection; a stored document wins over rendering.
    pub async fn sp_metadata(&self, id: &str) -> Result<String> {
        let connection = self.get(id).await?;
        let Some(saml) = connection.saml_config() else {
            error!(connection_id = %connection.id, "SP metadata requested for an OIDC connection");
            return Err(SsoError::protocol_mismatch("metadata is only available for SAML connections"));
        };

        if let Some(document) = connection.sp_metadata.as_deref().filter(|d| !d.trim().is_empty()) {
            return Ok(document.to_string());
        }

        Ok(render_sp_metadata(&connection.sp_entity_id, &connection.sp_acs_url, saml))
    }

    /// Connection referenced by a consumed login state. It must still be active and
    /// speak `protocol`; a protocol mismatch means the state was routed to the wrong
    /// callback.
    pub async fn get_for_callback(&self, id: &str, protocol: SsoProtocol) -> Result<SsoConnection> {
        let connection = self.get(id).await?;
        if !connection.is_active() {
            return Err(SsoError::ConnectionInactive(connection.domain));
        }
        if connection.protocol() != protocol {
            error!(
                connection_id = %connection.id,
                expected = %protocol,
                actual = %connection.protocol(),
                "Login callback arrived for a connection of another protocol"
            );
            return Err(SsoError::protocol_mismatch(format!(
                "connection {} is {}, callback expects {}",
                connection.id,
                connection.protocol(),
                protocol
            )));
        }
        Ok(connection)
    }

    /// Resolve the connection that handles logins for `domain`.
    pub async fn find_active_by_domain(&self, domain: &str) -> Result<SsoConnection> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Err(SsoError::validation("domain is required"));
        }

        let connection = self
            .repo
            .find_by_domain(&domain)
            .await?
            .ok_or_else(|| SsoError::ConnectionNotFound(domain.clone()))?;

        if !connection.is_active() {
            return Err(SsoError::ConnectionInactive(domain));
        }
        Ok(connection)
    }
}

fn ensure_activatable(connection: &SsoConnection) -> Result<()> {
    let missing = connection.protocol_config.missing_activation_fields();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SsoError::validation(format!(
            "{} connection cannot be active without: {}",
            connection.protocol(),
            missing.join(", ")
        )))
    }
}

/// Replace the protocol configuration, keeping stored secrets when the patch omits
/// them (responses never echo them back).
fn apply_protocol_patch(
    connection: &mut SsoConnection,
    saml: Option<SamlConfig>,
    oidc: Option<OidcConfig>,
) -> Result<()> {
    match (&mut connection.protocol_config, saml, oidc) {
        (_, None, None) => Ok(()),
        (ProtocolConfig::Saml(current), Some(mut next), None) => {
            if next.certificate.trim().is_empty() {
                next.certificate = std::mem::take(&mut current.certificate);
            }
            *current = next;
            Ok(())
        }
        (ProtocolConfig::Oidc(current), None, Some(mut next)) => {
            if next.client_secret.is_none() {
                next.client_secret = current.client_secret.take();
            }
            *current = next;
            Ok(())
        }
        (config, _, _) => {
            error!(
                connection_id = %connection.id,
                protocol = %config.protocol(),
                "Rejected configuration for a different protocol"
            );
            Err(SsoError::protocol_mismatch(format!(
                "connection protocol is {} and cannot be changed",
                config.protocol()
            )))
        }
    }
}
