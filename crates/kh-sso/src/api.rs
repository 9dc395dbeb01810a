//! Keyhaven SSO HTTP API
//!
//! Public login endpoints:
//! - `POST|GET /sso/initiate` - start a login for an email domain
//! - `GET /sso/oidc/callback` - OIDC redirect URI
//! - `POST /sso/saml/acs` - SAML assertion consumer (HTTP-POST binding)
//! - `GET /sso/metadata/{connection_id}` - SAML SP metadata
//!
//! Plus `/health` and the OpenAPI document at `/api-docs/openapi.json`.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{IntoParams, Modify, OpenApi, ToSchema};

use crate::connection::api as connections_api;
use crate::login::completion::{LoginResult, OrganizationSummary, UserSummary};
use crate::service::SsoService;
use crate::shared::error::{ErrorResponse, SsoError};

/// Public API state
#[derive(Clone)]
pub struct SsoApiState {
    pub service: Arc<SsoService>,
}

/// Start a login
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct InitiateRequest {
    /// Email domain (e.g. "acme.com")
    pub domain: String,
    /// Where the client wants to land after login
    #[serde(default)]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiateResponse {
    /// Identity provider URL to send the browser to
    pub redirect_url: String,
}

/// OIDC callback query parameters
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OidcCallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// SAML HTTP-POST binding form
#[derive(Debug, Deserialize, ToSchema)]
pub struct SamlAcsForm {
    #[serde(rename = "RelayState", default)]
    pub relay_state: String,
    #[serde(rename = "SAMLResponse", default)]
    pub saml_response: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn initiate(state: &SsoApiState, req: InitiateRequest) -> Result<Json<InitiateResponse>, SsoError> {
    let redirect_url = req
        .redirect_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or("/");

    let redirect_url = state.service.initiate_login(&req.domain, redirect_url).await?;
    Ok(Json(InitiateResponse { redirect_url }))
}

/// Start an SSO login (JSON body)
#[utoipa::path(
    post,
    path = "/sso/initiate",
    tag = "sso",
    request_body = InitiateRequest,
    responses(
        (status = 200, description = "Identity provider URL", body = InitiateResponse),
        (status = 400, description = "Invalid domain", body = ErrorResponse),
        (status = 404, description = "SSO not available for this domain", body = ErrorResponse),
        (status = 502, description = "Identity provider unavailable", body = ErrorResponse)
    )
)]
pub async fn initiate_post(
    State(state): State<SsoApiState>,
    Json(req): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>, SsoError> {
    initiate(&state, req).await
}

/// Start an SSO login (query string)
#[utoipa::path(
    get,
    path = "/sso/initiate",
    tag = "sso",
    params(InitiateRequest),
    responses(
        (status = 200, description = "Identity provider URL", body = InitiateResponse),
        (status = 400, description = "Invalid domain", body = ErrorResponse),
        (status = 404, description = "SSO not available for this domain", body = ErrorResponse)
    )
)]
pub async fn initiate_get(
    State(state): State<SsoApiState>,
    Query(req): Query<InitiateRequest>,
) -> Result<Json<InitiateResponse>, SsoError> {
    initiate(&state, req).await
}

/// Authorization error codes from RFC 6749 §4.1.2.1 and OpenID Connect Core §3.1.2.6.
const IDP_ERROR_CODES: &[&str] = &[
    "invalid_request",
    "unauthorized_client",
    "access_denied",
    "unsupported_response_type",
    "invalid_scope",
    "server_error",
    "temporarily_unavailable",
    "interaction_required",
    "login_required",
    "account_selection_required",
    "consent_required",
    "invalid_request_uri",
    "invalid_request_object",
    "request_not_supported",
    "request_uri_not_supported",
    "registration_not_supported",
];

/// The IdP's error code if it is a registered one; anything else is not echoed back.
fn idp_error_code(error: &str) -> &'static str {
    IDP_ERROR_CODES
        .iter()
        .copied()
        .find(|code| *code == error)
        .unwrap_or("unknown_error")
}

/// OIDC redirect URI
#[utoipa::path(
    get,
    path = "/sso/oidc/callback",
    tag = "sso",
    params(OidcCallbackParams),
    responses(
        (status = 200, description = "Login completed", body = LoginResult),
        (status = 400, description = "Invalid state or IdP error", body = ErrorResponse),
        (status = 401, description = "ID token rejected", body = ErrorResponse),
        (status = 403, description = "Account or membership not usable", body = ErrorResponse)
    )
)]
pub async fn oidc_callback(
    State(state): State<SsoApiState>,
    Query(params): Query<OidcCallbackParams>,
) -> Response {
    let state_token = params.state.unwrap_or_default();

    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        warn!(
            error = ?error,
            description = ?params.error_description,
            "Identity provider returned an error"
        );
        // The attempt is over either way
        if !state_token.is_empty() {
            let _ = state.service.states().consume(&state_token).await;
        }
        let body = ErrorResponse {
            error: "IDP_ERROR".to_string(),
            message: idp_error_code(&error).to_string(),
        };
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }

    let code = params.code.unwrap_or_default();
    match state.service.handle_oidc_callback(&state_token, &code).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_response(),
    }
}

/// SAML assertion consumer service
#[utoipa::path(
    post,
    path = "/sso/saml/acs",
    tag = "sso",
    request_body(content = SamlAcsForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Login completed", body = LoginResult),
        (status = 400, description = "Invalid state", body = ErrorResponse),
        (status = 401, description = "SAML response rejected", body = ErrorResponse),
        (status = 403, description = "Account or membership not usable", body = ErrorResponse)
    )
)]
pub async fn saml_acs(
    State(state): State<SsoApiState>,
    Form(form): Form<SamlAcsForm>,
) -> Result<Json<LoginResult>, SsoError> {
    let result = state
        .service
        .handle_saml_callback(&form.relay_state, &form.saml_response)
        .await?;
    Ok(Json(result))
}

/// SAML service provider metadata
#[utoipa::path(
    get,
    path = "/sso/metadata/{connection_id}",
    tag = "sso",
    params(("connection_id" = String, Path, description = "Connection ID")),
    responses(
        (status = 200, description = "SP metadata", content_type = "application/xml", body = String),
        (status = 400, description = "Not a SAML connection", body = ErrorResponse),
        (status = 404, description = "Connection not found", body = ErrorResponse)
    )
)]
pub async fn sp_metadata(
    State(state): State<SsoApiState>,
    Path(connection_id): Path<String>,
) -> Result<Response, SsoError> {
    let xml = state.service.sp_metadata(&connection_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/xml")], xml).into_response())
}

/// Liveness
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Keyhaven SSO API",
        version = "0.1.0",
        description = "SAML 2.0 and OIDC single sign-on for organizations"
    ),
    paths(
        health_handler,
        initiate_post,
        initiate_get,
        oidc_callback,
        saml_acs,
        sp_metadata,
        connections_api::create_connection,
        connections_api::list_connections,
        connections_api::get_connection,
        connections_api::update_connection,
        connections_api::delete_connection,
        connections_api::activate_connection,
    ),
    components(schemas(
        ErrorResponse,
        InitiateRequest,
        InitiateResponse,
        SamlAcsForm,
        HealthResponse,
        LoginResult,
        OrganizationSummary,
        UserSummary,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "sso", description = "Public login endpoints"),
        (name = "sso-connections", description = "Organization SSO connection management"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Public SSO routes plus health and the OpenAPI document
pub fn sso_router(state: SsoApiState) -> Router {
    Router::new()
        .route("/sso/initiate", post(initiate_post).get(initiate_get))
        .route("/sso/oidc/callback", get(oidc_callback))
        .route("/sso/saml/acs", post(saml_acs))
        .route("/sso/metadata/:connection_id", get(sp_metadata))
        .route("/health", get(health_handler))
        .route("/api-docs/openapi.json", get(openapi_json))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idp_error_code_passes_registered_codes_only() {
        assert_eq!(idp_error_code("access_denied"), "access_denied");
        assert_eq!(idp_error_code("login_required"), "login_required");
        assert_eq!(idp_error_code("ACCESS_DENIED"), "unknown_error");
        assert_eq!(idp_error_code("<script>alert(1)</script>"), "unknown_error");
        assert_eq!(idp_error_code("access_denied please visit evil.example"), "unknown_error");
    }
}
