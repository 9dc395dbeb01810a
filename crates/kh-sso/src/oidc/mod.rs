//! OIDC Federation
//!
//! Keyhaven acts as an OIDC relying party: authorization code flow with PKCE (S256)
//! and nonce binding, provider discovery, and ID token verification against the
//! provider's published keys.

pub mod claims;
pub mod discovery;
pub mod flow;
pub mod id_token;
pub mod pkce;

pub use flow::OidcFlow;
