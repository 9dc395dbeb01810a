//! Identity extraction from verified ID token claims

use serde_json::Value;

use super::id_token::IdTokenClaims;
use crate::shared::error::{Result, SsoError};

/// The part of an IdP identity a login needs
#[derive(Debug, Clone, PartialEq)]
pub struct OidcIdentity {
    pub subject: String,
    /// Trimmed and lowercased
    pub email: String,
    pub name: Option<String>,
}

/// Pull the email (from `email_claim`) and display name out of verified claims.
///
/// An explicit `email_verified: false` rejects the login; a missing flag does not.
pub fn extract_identity(
    claims: &IdTokenClaims,
    email_claim: &str,
    name_claim: Option<&str>,
) -> Result<OidcIdentity> {
    if is_explicitly_unverified(claims.claim("email_verified")) {
        return Err(SsoError::EmailNotVerified);
    }

    let email = claims
        .claim(email_claim)
        .and_then(|v| v.as_str().map(|s| s.trim().to_lowercase()))
        .filter(|s| s.contains('@'))
        .ok_or_else(|| SsoError::missing_email(format!("claim '{}' is absent or not an email", email_claim)))?;

    let name = name_claim
        .or(Some("name"))
        .and_then(|c| claims.claim(c))
        .and_then(|v| v.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty());

    Ok(OidcIdentity {
        subject: claims.sub.clone(),
        email,
        name,
    })
}

fn is_explicitly_unverified(value: Option<Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => !b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("false"),
        _ => false,
    }
}
