//! Login completion: external identity to internal account and session.

pub mod completion;
pub mod directory;
pub mod session;
