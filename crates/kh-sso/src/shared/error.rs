//! SSO Error Types
//!
//! Every failure a login attempt can hit maps to one variant. The HTTP body carries a
//! fixed code and message per variant; the detail stays in the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::saml::validation::SamlRejection;

#[derive(Error, Debug)]
pub enum SsoError {
    #[error("SSO connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("SSO connection is not active: {0}")]
    ConnectionInactive(String),

    #[error("Invalid or expired SSO state")]
    InvalidState,

    #[error("Email domain {email_domain} does not match connection domain {connection_domain}")]
    DomainMismatch {
        email_domain: String,
        connection_domain: String,
    },

    #[error("Protocol mismatch: {message}")]
    ProtocolMismatch { message: String },

    #[error("Automatic provisioning is not supported")]
    ProvisioningBlocked,

    #[error("Invalid SAML response: {0}")]
    InvalidSamlResponse(#[from] SamlRejection),

    #[error("Invalid ID token: {message}")]
    InvalidIdToken { message: String },

    #[error("Email address is not verified by the identity provider")]
    EmailNotVerified,

    #[error("No email in identity provider response: {message}")]
    MissingEmail { message: String },

    #[error("No account exists for this email")]
    UserNotExist,

    #[error("User is not a member of organization {organization_id}")]
    NotMember { organization_id: String },

    #[error("Organization membership is {status}")]
    MembershipInactive { status: String },

    #[error("Identity provider error: {message}")]
    Provider { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Duplicate entity: {entity_type} with {field}={value}")]
    Duplicate {
        entity_type: String,
        field: String,
        value: String,
    },

    #[error("Authorization error: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] bson::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SsoError {
    pub fn protocol_mismatch(message: impl Into<String>) -> Self {
        Self::ProtocolMismatch { message: message.into() }
    }

    pub fn invalid_id_token(message: impl Into<String>) -> Self {
        Self::InvalidIdToken { message: message.into() }
    }

    pub fn missing_email(message: impl Into<String>) -> Self {
        Self::MissingEmail { message: message.into() }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn duplicate(
        entity_type: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Duplicate {
            entity_type: entity_type.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// HTTP status, stable error code, and the message shown to clients.
    pub fn public_parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            SsoError::ConnectionNotFound(_) | SsoError::ConnectionInactive(_) => (
                StatusCode::NOT_FOUND,
                "SSO_NOT_AVAILABLE",
                "SSO not available for this domain".into(),
            ),
            SsoError::InvalidState => (
                StatusCode::BAD_REQUEST,
                "INVALID_STATE",
                "Invalid or expired SSO state".into(),
            ),
            SsoError::DomainMismatch { .. } => (
                StatusCode::FORBIDDEN,
                "DOMAIN_MISMATCH",
                "Email domain does not match the SSO connection".into(),
            ),
            SsoError::ProtocolMismatch { .. } => (
                StatusCode::BAD_REQUEST,
                "PROTOCOL_MISMATCH",
                "SSO protocol does not match the connection".into(),
            ),
            SsoError::ProvisioningBlocked => (
                StatusCode::FORBIDDEN,
                "PROVISIONING_BLOCKED",
                "Automatic provisioning is not available; ask an administrator to invite you".into(),
            ),
            SsoError::InvalidSamlResponse(_) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SAML_RESPONSE",
                "SAML response could not be validated".into(),
            ),
            SsoError::InvalidIdToken { .. } => (
                StatusCode::UNAUTHORIZED,
                "INVALID_ID_TOKEN",
                "ID token could not be validated".into(),
            ),
            SsoError::EmailNotVerified => (
                StatusCode::UNAUTHORIZED,
                "EMAIL_NOT_VERIFIED",
                "Email address is not verified by the identity provider".into(),
            ),
            SsoError::MissingEmail { .. } => (
                StatusCode::UNAUTHORIZED,
                "MISSING_EMAIL",
                "Identity provider did not return an email address".into(),
            ),
            SsoError::UserNotExist => (
                StatusCode::FORBIDDEN,
                "USER_NOT_FOUND",
                "No account exists for this email".into(),
            ),
            SsoError::NotMember { .. } => (
                StatusCode::FORBIDDEN,
                "NOT_MEMBER",
                "User is not a member of this organization".into(),
            ),
            SsoError::MembershipInactive { .. } => (
                StatusCode::FORBIDDEN,
                "MEMBERSHIP_INACTIVE",
                "Organization membership is not active".into(),
            ),
            SsoError::Provider { .. } => (
                StatusCode::BAD_GATEWAY,
                "IDP_UNAVAILABLE",
                "Identity provider request failed".into(),
            ),
            SsoError::Validation { message } => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message.clone())
            }
            SsoError::Duplicate { field, .. } => (
                StatusCode::CONFLICT,
                "DUPLICATE",
                format!("An SSO connection with this {} already exists", field),
            ),
            SsoError::Unauthorized { .. } => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".into(),
            ),
            SsoError::Forbidden { .. } => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Insufficient permissions".into(),
            ),
            SsoError::Database(_)
            | SsoError::Serialization(_)
            | SsoError::Deserialization(_)
            | SsoError::Json(_)
            | SsoError::Internal { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".into(),
            ),
        }
    }
}

impl From<reqwest::Error> for SsoError {
    fn from(err: reqwest::Error) -> Self {
        SsoError::Provider {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SsoError>;

/// Error response body
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for SsoError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.public_parts();

        if status.is_server_error() {
            error!(error = %self, code, "Request failed");
        }

        let body = ErrorResponse {
            error: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}
