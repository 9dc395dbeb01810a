//! Keyhaven SSO
//!
//! Federated login for organization members:
//! - SSO connection registry (one connection per email domain)
//! - OIDC authorization code flow with PKCE and nonce binding
//! - SAML 2.0 redirect binding with POSTed responses
//! - Single-use, short-lived login state
//! - Login completion against existing accounts and memberships
//!
//! ## Module Organization (Aggregate-based)
//!
//! Each aggregate contains:
//! - `entity` - Domain entities
//! - `repository` - Data access (MongoDB and in-memory)
//! - `api` - REST endpoints (where applicable)

pub mod connection;
pub mod state;

// Federation protocols
pub mod oidc;
pub mod saml;

// Account resolution and session hand-off
pub mod login;

// Shared infrastructure
pub mod shared;

pub mod api;
pub mod service;

pub use shared::error::{Result, SsoError};
pub use shared::tsid::TsidGenerator;

pub use connection::entity::{
    ConnectionStatus, OidcConfig, ProtocolConfig, SamlConfig, SsoConnection, SsoProtocol,
};
pub use connection::registry::{ConnectionDraft, ConnectionPatch, ConnectionRegistry};
pub use connection::repository::{
    ConnectionRepository, InMemoryConnectionRepository, MongoConnectionRepository,
};
pub use state::entity::AuthState;
pub use state::repository::{InMemoryStateRepository, MongoStateRepository, StateRepository};
pub use state::store::StateStore;
pub use login::completion::{LoginCompletion, LoginResult};
pub use login::directory::{
    AccountDirectory, InMemoryAccountDirectory, Membership, MembershipStatus,
    MongoAccountDirectory, Organization, OrganizationRole, UserAccount,
};
pub use login::session::{JwtSessionConfig, JwtSessionIssuer, SessionClaims, SessionIssuer, SessionTokens};
pub use oidc::discovery::ProviderMetadataCache;
pub use service::{SsoService, SsoSettings};
