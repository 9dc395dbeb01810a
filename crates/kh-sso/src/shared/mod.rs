//! Shared infrastructure used by every aggregate.

pub mod error;
pub mod indexes;
pub mod middleware;
pub mod random;
pub mod tsid;
