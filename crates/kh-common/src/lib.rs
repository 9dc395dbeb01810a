//! Shared plumbing for Keyhaven services.

pub mod logging;
pub mod redact;

pub use redact::{redact_email, redact_token};
