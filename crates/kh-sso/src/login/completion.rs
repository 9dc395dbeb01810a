//! Login Completion
//!
//! Maps a verified email to an existing account and an active membership in the
//! connection's organization, then asks the session issuer for tokens. Accounts and
//! memberships are never created here.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use kh_common::redact_email;

use crate::connection::entity::SsoConnection;
use crate::login::directory::AccountDirectory;
use crate::login::session::SessionIssuer;
use crate::shared::error::{Result, SsoError};

/// Authentication method recorded in issued sessions
pub const SSO_AUTH_METHOD: &str = "sso";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrganizationSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Successful SSO login
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoginResult {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub organization: OrganizationSummary,
    pub user: UserSummary,
    /// Always false: this flow never creates accounts
    pub is_new_user: bool,
    /// Where the client asked to land after login
    pub redirect_url: String,
}

pub struct LoginCompletion {
    directory: Arc<dyn AccountDirectory>,
    sessions: Arc<dyn SessionIssuer>,
}

impl LoginCompletion {
    pub fn new(directory: Arc<dyn AccountDirectory>, sessions: Arc<dyn SessionIssuer>) -> Self {
        Self { directory, sessions }
    }

    /// Finish a login for `email`, already verified against `connection`'s domain.
    pub async fn complete(
        &self,
        email: &str,
        connection: &SsoConnection,
        redirect_url: &str,
    ) -> Result<LoginResult> {
        let user = self
            .directory
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| {
                warn!(
                    email = %redact_email(email),
                    connection_id = %connection.id,
                    "SSO login for an email with no account"
                );
                SsoError::UserNotExist
            })?;

        let membership = self
            .directory
            .find_membership(&connection.organization_id, &user.id)
            .await?;

        let Some(membership) = membership else {
            if connection.auto_provision {
                warn!(
                    user_id = %user.id,
                    organization_id = %connection.organization_id,
                    "SSO login needs a new membership but provisioning is blocked"
                );
                return Err(SsoError::ProvisioningBlocked);
            }
            warn!(
                user_id = %user.id,
                organization_id = %connection.organization_id,
                "SSO login for a user outside the organization"
            );
            return Err(SsoError::NotMember {
                organization_id: connection.organization_id.clone(),
            });
        };

        if !membership.status.is_active() {
            warn!(
                user_id = %user.id,
                organization_id = %connection.organization_id,
                status = membership.status.as_str(),
                "SSO login for an inactive membership"
            );
            return Err(SsoError::MembershipInactive {
                status: membership.status.as_str().to_string(),
            });
        }

        let organization = self
            .directory
            .find_organization(&connection.organization_id)
            .await?
            .ok_or_else(|| {
                error!(
                    organization_id = %connection.organization_id,
                    connection_id = %connection.id,
                    "Connection references a missing organization"
                );
                SsoError::internal("organization not found")
            })?;

        let tokens = self
            .sessions
            .issue_token_for_user(&user.id, SSO_AUTH_METHOD)
            .await?;

        info!(
            user_id = %user.id,
            organization_id = %organization.id,
            connection_id = %connection.id,
            protocol = %connection.protocol(),
            "SSO login completed"
        );

        Ok(LoginResult {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            organization: OrganizationSummary {
                id: organization.id,
                name: organization.name,
            },
            user: UserSummary {
                id: user.id,
                email: user.email,
                name: user.name,
            },
            is_new_user: false,
            redirect_url: redirect_url.to_string(),
        })
    }
}
