//! SAML 2.0 service provider side: HTTP-POST binding responses, redirect binding
//! for login initiation.

pub mod flow;
pub mod response;
pub mod validation;

pub use flow::SamlFlow;
pub use validation::SamlRejection;
