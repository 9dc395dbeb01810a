//! SSO Connection Aggregate
//!
//! Per-organization identity provider configuration, keyed by email domain.

pub mod api;
pub mod entity;
pub mod metadata;
pub mod registry;
pub mod repository;

pub use api::{sso_connections_router, ConnectionsApiState};
