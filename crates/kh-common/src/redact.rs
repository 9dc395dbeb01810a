//! Log-safe renderings of sensitive values.
//!
//! State tokens and nonces are bearer secrets until consumed, so logs only ever see a
//! short prefix. Emails keep the domain (useful for routing diagnostics) and mask the
//! local part.

const TOKEN_PREFIX_LEN: usize = 6;

/// Render a secret token as its first few characters followed by an ellipsis.
pub fn redact_token(token: &str) -> String {
    if token.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = token.chars().take(TOKEN_PREFIX_LEN).collect();
    format!("{}…", prefix)
}

/// Mask the local part of an email address, keeping the first character and domain.
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}
