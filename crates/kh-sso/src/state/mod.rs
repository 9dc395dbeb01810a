//! Login State Aggregate
//!
//! Short-lived, single-use records that tie an IdP callback back to the login attempt
//! that started it.

pub mod entity;
pub mod reaper;
pub mod repository;
pub mod store;
