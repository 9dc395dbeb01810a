//! SSO Connections Admin API
//!
//! CRUD and activation for an organization's connections. Callers must be an active
//! owner or admin of the organization in the path; connections of other
//! organizations read as not found.

use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::connection::entity::{
    ConnectionStatus, OidcConfig, ProtocolConfig, SamlConfig, SsoConnection, SsoProtocol,
};
use crate::connection::registry::{ConnectionDraft, ConnectionPatch, ConnectionRegistry};
use crate::login::directory::OrganizationRole;
use crate::shared::error::{ErrorResponse, SsoError};
use crate::shared::middleware::{AdminAuth, Authenticated};

/// SAML settings as returned to admins; the certificate is never echoed back
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SamlConfigResponse {
    pub entity_id: String,
    pub sso_url: String,
    pub has_certificate: bool,
    pub want_assertion_signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slo_url: Option<String>,
    pub sign_authn_requests: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_id_format: Option<String>,
}

impl From<&SamlConfig> for SamlConfigResponse {
    fn from(c: &SamlConfig) -> Self {
        Self {
            entity_id: c.entity_id.clone(),
            sso_url: c.sso_url.clone(),
            has_certificate: !c.certificate.trim().is_empty(),
            want_assertion_signed: c.want_assertion_signed,
            slo_url: c.slo_url.clone(),
            sign_authn_requests: c.sign_authn_requests,
            name_id_format: c.name_id_format.clone(),
        }
    }
}

/// OIDC settings as returned to admins; the client secret is never echoed back
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfigResponse {
    pub issuer: String,
    pub client_id: String,
    pub has_client_secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info_url: Option<String>,
    pub use_discovery: bool,
    pub scopes: Vec<String>,
    pub pkce_enabled: bool,
    pub email_claim: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_claim: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups_claim: Option<String>,
}

impl From<&OidcConfig> for OidcConfigResponse {
    fn from(c: &OidcConfig) -> Self {
        Self {
            issuer: c.issuer.clone(),
            client_id: c.client_id.clone(),
            has_client_secret: c.client_secret.as_deref().is_some_and(|s| !s.is_empty()),
            auth_url: c.auth_url.clone(),
            token_url: c.token_url.clone(),
            jwks_uri: c.jwks_uri.clone(),
            user_info_url: c.user_info_url.clone(),
            use_discovery: c.use_discovery,
            scopes: c.scopes.clone(),
            pkce_enabled: c.pkce_enabled,
            email_claim: c.email_claim.clone(),
            name_claim: c.name_claim.clone(),
            groups_claim: c.groups_claim.clone(),
        }
    }
}

/// Connection response DTO
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    pub id: String,
    pub uuid: String,
    pub organization_id: String,
    pub name: String,
    pub domain: String,
    pub protocol: SsoProtocol,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saml_config: Option<SamlConfigResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oidc_config: Option<OidcConfigResponse>,
    pub default_role: OrganizationRole,
    pub auto_provision: bool,
    pub jit_provisioning: bool,
    pub sp_entity_id: String,
    pub sp_acs_url: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&SsoConnection> for ConnectionResponse {
    fn from(c: &SsoConnection) -> Self {
        let (saml_config, oidc_config) = match &c.protocol_config {
            ProtocolConfig::Saml(cfg) => (Some(cfg.into()), None),
            ProtocolConfig::Oidc(cfg) => (None, Some(cfg.into())),
        };
        Self {
            id: c.id.clone(),
            uuid: c.uuid.clone(),
            organization_id: c.organization_id.clone(),
            name: c.name.clone(),
            domain: c.domain.clone(),
            protocol: c.protocol(),
            status: c.status,
            saml_config,
            oidc_config,
            default_role: c.default_role,
            auto_provision: c.auto_provision,
            jit_provisioning: c.jit_provisioning,
            sp_entity_id: c.sp_entity_id.clone(),
            sp_acs_url: c.sp_acs_url.clone(),
            created_at: c.created_at.to_rfc3339(),
            updated_at: c.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionListResponse {
    pub connections: Vec<ConnectionResponse>,
    pub total: usize,
}

/// Connections API state
#[derive(Clone)]
pub struct ConnectionsApiState {
    pub registry: Arc<ConnectionRegistry>,
    pub auth: AdminAuth,
}

impl FromRef<ConnectionsApiState> for AdminAuth {
    fn from_ref(state: &ConnectionsApiState) -> Self {
        state.auth.clone()
    }
}

/// Connection `id` scoped to `org_id`; another organization's connection is not found.
async fn load_owned(state: &ConnectionsApiState, org_id: &str, id: &str) -> Result<SsoConnection, SsoError> {
    let connection = state.registry.get(id).await?;
    if connection.organization_id != org_id {
        return Err(SsoError::ConnectionNotFound(id.to_string()));
    }
    Ok(connection)
}

/// Create an SSO connection
#[utoipa::path(
    post,
    path = "/api/organizations/{org_id}/sso-connections",
    tag = "sso-connections",
    params(("org_id" = String, Path, description = "Organization ID")),
    request_body = ConnectionDraft,
    responses(
        (status = 201, description = "Connection created", body = ConnectionResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 403, description = "Not an organization admin", body = ErrorResponse),
        (status = 409, description = "Domain already in use", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_connection(
    State(state): State<ConnectionsApiState>,
    auth: Authenticated,
    Path(org_id): Path<String>,
    Json(req): Json<ConnectionDraft>,
) -> Result<(StatusCode, Json<ConnectionResponse>), SsoError> {
    state.auth.require_org_admin(&auth, &org_id).await?;

    let connection = state.registry.create(&org_id, req).await?;
    Ok((StatusCode::CREATED, Json((&connection).into())))
}

/// List an organization's SSO connections
#[utoipa::path(
    get,
    path = "/api/organizations/{org_id}/sso-connections",
    tag = "sso-connections",
    params(("org_id" = String, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Connections", body = ConnectionListResponse),
        (status = 403, description = "Not an organization admin", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_connections(
    State(state): State<ConnectionsApiState>,
    auth: Authenticated,
    Path(org_id): Path<String>,
) -> Result<Json<ConnectionListResponse>, SsoError> {
    state.auth.require_org_admin(&auth, &org_id).await?;

    let connections: Vec<ConnectionResponse> = state
        .registry
        .list_by_organization(&org_id)
        .await?
        .iter()
        .map(Into::into)
        .collect();
    let total = connections.len();

    Ok(Json(ConnectionListResponse { connections, total }))
}

/// Get an SSO connection
#[utoipa::path(
    get,
    path = "/api/organizations/{org_id}/sso-connections/{id}",
    tag = "sso-connections",
    params(
        ("org_id" = String, Path, description = "Organization ID"),
        ("id" = String, Path, description = "Connection ID")
    ),
    responses(
        (status = 200, description = "Connection found", body = ConnectionResponse),
        (status = 404, description = "Connection not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_connection(
    State(state): State<ConnectionsApiState>,
    auth: Authenticated,
    Path((org_id, id)): Path<(String, String)>,
) -> Result<Json<ConnectionResponse>, SsoError> {
    state.auth.require_org_admin(&auth, &org_id).await?;

    let connection = load_owned(&state, &org_id, &id).await?;
    Ok(Json((&connection).into()))
}

/// Update an SSO connection
#[utoipa::path(
    put,
    path = "/api/organizations/{org_id}/sso-connections/{id}",
    tag = "sso-connections",
    params(
        ("org_id" = String, Path, description = "Organization ID"),
        ("id" = String, Path, description = "Connection ID")
    ),
    request_body = ConnectionPatch,
    responses(
        (status = 200, description = "Connection updated", body = ConnectionResponse),
        (status = 400, description = "Validation or protocol error", body = ErrorResponse),
        (status = 404, description = "Connection not found", body = ErrorResponse),
        (status = 409, description = "Domain already in use", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_connection(
    State(state): State<ConnectionsApiState>,
    auth: Authenticated,
    Path((org_id, id)): Path<(String, String)>,
    Json(req): Json<ConnectionPatch>,
) -> Result<Json<ConnectionResponse>, SsoError> {
    state.auth.require_org_admin(&auth, &org_id).await?;
    load_owned(&state, &org_id, &id).await?;

    let connection = state.registry.update(&id, req).await?;
    Ok(Json((&connection).into()))
}

/// Delete an SSO connection
#[utoipa::path(
    delete,
    path = "/api/organizations/{org_id}/sso-connections/{id}",
    tag = "sso-connections",
    params(
        ("org_id" = String, Path, description = "Organization ID"),
        ("id" = String, Path, description = "Connection ID")
    ),
    responses(
        (status = 204, description = "Connection deleted"),
        (status = 404, description = "Connection not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_connection(
    State(state): State<ConnectionsApiState>,
    auth: Authenticated,
    Path((org_id, id)): Path<(String, String)>,
) -> Result<StatusCode, SsoError> {
    state.auth.require_org_admin(&auth, &org_id).await?;
    load_owned(&state, &org_id, &id).await?;

    state.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Activate an SSO connection
#[utoipa::path(
    post,
    path = "/api/organizations/{org_id}/sso-connections/{id}/activate",
    tag = "sso-connections",
    params(
        ("org_id" = String, Path, description = "Organization ID"),
        ("id" = String, Path, description = "Connection ID")
    ),
    responses(
        (status = 200, description = "Connection active", body = ConnectionResponse),
        (status = 400, description = "Required protocol fields missing", body = ErrorResponse),
        (status = 404, description = "Connection not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn activate_connection(
    State(state): State<ConnectionsApiState>,
    auth: Authenticated,
    Path((org_id, id)): Path<(String, String)>,
) -> Result<Json<ConnectionResponse>, SsoError> {
    state.auth.require_org_admin(&auth, &org_id).await?;
    load_owned(&state, &org_id, &id).await?;

    let connection = state.registry.activate(&id).await?;
    Ok(Json((&connection).into()))
}

/// Admin router; nest under `/api/organizations`
pub fn sso_connections_router(state: ConnectionsApiState) -> Router {
    Router::new()
        .route(
            "/:org_id/sso-connections",
            post(create_connection).get(list_connections),
        )
        .route(
            "/:org_id/sso-connections/:id",
            get(get_connection)
                .put(update_connection)
                .delete(delete_connection),
        )
        .route("/:org_id/sso-connections/:id/activate", post(activate_connection))
        .with_state(state)
}
