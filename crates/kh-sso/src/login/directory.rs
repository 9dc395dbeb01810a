//! Account Directory
//!
//! Read-only view of users, organizations, and memberships. SSO never writes here:
//! accounts and memberships are created by invitation elsewhere.

use async_trait::async_trait;
use dashmap::DashMap;
use mongodb::{bson::doc, Collection, Database};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::shared::error::Result;

/// Role a user holds inside an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationRole {
    Owner,
    Admin,
    Manager,
    #[default]
    Member,
    Billing,
}

impl OrganizationRole {
    /// Owners and admins may manage SSO connections.
    pub fn can_manage_sso(&self) -> bool {
        matches!(self, OrganizationRole::Owner | OrganizationRole::Admin)
    }
}

/// Membership lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Invited,
    Accepted,
    Confirmed,
    Suspended,
}

impl MembershipStatus {
    /// Only accepted or confirmed members can sign in.
    pub fn is_active(&self) -> bool {
        matches!(self, MembershipStatus::Accepted | MembershipStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Invited => "invited",
            MembershipStatus::Accepted => "accepted",
            MembershipStatus::Confirmed => "confirmed",
            MembershipStatus::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    #[serde(rename = "_id")]
    pub id: String,
    /// Stored lowercased
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub organization_id: String,
    pub user_id: String,
    pub role: OrganizationRole,
    pub status: MembershipStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>>;

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserAccount>>;

    async fn find_membership(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Option<Membership>>;

    async fn find_organization(&self, organization_id: &str) -> Result<Option<Organization>>;
}

/// MongoDB-backed directory over the host application's collections
pub struct MongoAccountDirectory {
    users: Collection<UserAccount>,
    memberships: Collection<Membership>,
    organizations: Collection<Organization>,
}

impl MongoAccountDirectory {
    pub fn new(db: &Database) -> Self {
        Self {
            users: db.collection("users"),
            memberships: db.collection("organization_users"),
            organizations: db.collection("organizations"),
        }
    }
}

#[async_trait]
impl AccountDirectory for MongoAccountDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        Ok(self
            .users
            .find_one(doc! { "email": email.trim().to_lowercase() })
            .await?)
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserAccount>> {
        Ok(self.users.find_one(doc! { "_id": user_id }).await?)
    }

    async fn find_membership(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Option<Membership>> {
        Ok(self
            .memberships
            .find_one(doc! { "organizationId": organization_id, "userId": user_id })
            .await?)
    }

    async fn find_organization(&self, organization_id: &str) -> Result<Option<Organization>> {
        Ok(self
            .organizations
            .find_one(doc! { "_id": organization_id })
            .await?)
    }
}

/// In-process directory for tests and single-node development
#[derive(Default)]
pub struct InMemoryAccountDirectory {
    users: DashMap<String, UserAccount>,
    memberships: DashMap<(String, String), Membership>,
    organizations: DashMap<String, Organization>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, mut user: UserAccount) {
        user.email = user.email.trim().to_lowercase();
        self.users.insert(user.id.clone(), user);
    }

    pub fn add_organization(&self, organization: Organization) {
        self.organizations.insert(organization.id.clone(), organization);
    }

    pub fn add_membership(&self, membership: Membership) {
        self.memberships.insert(
            (membership.organization_id.clone(), membership.user_id.clone()),
            membership,
        );
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn membership_count(&self) -> usize {
        self.memberships.len()
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .users
            .iter()
            .find(|entry| entry.value().email == email)
            .map(|entry| entry.value().clone()))
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserAccount>> {
        Ok(self.users.get(user_id).map(|u| u.value().clone()))
    }

    async fn find_membership(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Option<Membership>> {
        Ok(self
            .memberships
            .get(&(organization_id.to_string(), user_id.to_string()))
            .map(|m| m.value().clone()))
    }

    async fn find_organization(&self, organization_id: &str) -> Result<Option<Organization>> {
        Ok(self
            .organizations
            .get(organization_id)
            .map(|o| o.value().clone()))
    }
}
