//! SAML response checks and email extraction
//!
//! Every failure is a `SamlRejection`. Callers collapse them into one external error
//! and log the specific reason.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use url::Url;

use super::response::{SamlAssertion, SamlResponse};

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Attribute names that carry the user's email, compared case-insensitively
const EMAIL_ATTRIBUTE_NAMES: [&str; 5] = [
    "email",
    "mail",
    "emailaddress",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress",
    "urn:oid:0.9.2342.19200300.100.1.3",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamlRejection {
    #[error("missing {0}")]
    MissingParameter(&'static str),

    #[error("response exceeds the size limit")]
    TooLarge,

    #[error("response is not valid base64 UTF-8")]
    InvalidEncoding,

    #[error("malformed XML: {0}")]
    MalformedXml(String),

    #[error("DOCTYPE declarations are not allowed")]
    DoctypeNotAllowed,

    #[error("response has no assertion")]
    MissingAssertion,

    #[error("response has more than one assertion")]
    MultipleAssertions,

    #[error("response status is {0}")]
    StatusNotSuccess(String),

    #[error("signature required but absent")]
    MissingSignature,

    #[error("issuer does not match the connection entity ID")]
    IssuerMismatch,

    #[error("assertion is not yet valid")]
    NotYetValid,

    #[error("assertion has expired")]
    Expired,

    #[error("unparseable timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("recipient does not match the ACS URL")]
    RecipientMismatch,

    #[error("audience does not match the SP entity ID")]
    AudienceMismatch,

    #[error("no email attribute or email NameID")]
    MissingEmail,
}

/// What a response must satisfy for one connection
#[derive(Debug, Clone)]
pub struct ResponseExpectations<'a> {
    /// Connection `entity_id`; an empty value skips the issuer check
    pub idp_entity_id: &'a str,
    pub want_signed: bool,
    pub sp_entity_id: &'a str,
    pub acs_url: &'a str,
    pub now: DateTime<Utc>,
    pub clock_skew: Duration,
}

/// Run every structural, issuer, time and addressing check on a parsed response.
pub fn validate_response(
    response: &SamlResponse,
    expected: &ResponseExpectations<'_>,
) -> Result<(), SamlRejection> {
    let assertion = &response.assertion;

    if let Some(status) = response.status_code.as_deref() {
        if status != STATUS_SUCCESS {
            return Err(SamlRejection::StatusNotSuccess(status.to_string()));
        }
    }

    if expected.want_signed && !response.has_signature && !assertion.has_signature {
        return Err(SamlRejection::MissingSignature);
    }

    let idp_entity_id = expected.idp_entity_id.trim();
    if !idp_entity_id.is_empty() {
        let issuer = assertion
            .issuer
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(response.issuer.as_deref())
            .map(str::trim);
        if issuer != Some(idp_entity_id) {
            return Err(SamlRejection::IssuerMismatch);
        }
    }

    check_time_window(assertion, expected.now, expected.clock_skew)?;

    if let Some(recipient) = assertion.recipient.as_deref() {
        if !urls_equivalent(recipient, expected.acs_url) {
            return Err(SamlRejection::RecipientMismatch);
        }
    }

    if !assertion.audiences.is_empty()
        && !assertion
            .audiences
            .iter()
            .any(|a| urls_equivalent(a, expected.sp_entity_id))
    {
        return Err(SamlRejection::AudienceMismatch);
    }

    Ok(())
}

/// `NotBefore` may be at most `skew` in the future; `NotOnOrAfter` (on Conditions and
/// on SubjectConfirmationData) at most `skew` in the past.
pub fn check_time_window(
    assertion: &SamlAssertion,
    now: DateTime<Utc>,
    skew: Duration,
) -> Result<(), SamlRejection> {
    if let Some(not_before) = parse_instant(assertion.not_before.as_deref())? {
        if now < not_before - skew {
            return Err(SamlRejection::NotYetValid);
        }
    }

    for not_on_or_after in [
        assertion.not_on_or_after.as_deref(),
        assertion.confirmation_not_on_or_after.as_deref(),
    ] {
        if let Some(deadline) = parse_instant(not_on_or_after)? {
            if now >= deadline + skew {
                return Err(SamlRejection::Expired);
            }
        }
    }

    Ok(())
}

fn parse_instant(value: Option<&str>) -> Result<Option<DateTime<Utc>>, SamlRejection> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => DateTime::parse_from_rfc3339(v)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| SamlRejection::InvalidTimestamp(v.to_string())),
    }
}

/// Lowercased email from the known attributes, falling back to an email-shaped NameID.
pub fn extract_email(assertion: &SamlAssertion) -> Result<String, SamlRejection> {
    let from_attributes = assertion
        .attributes
        .iter()
        .filter(|attr| {
            EMAIL_ATTRIBUTE_NAMES
                .iter()
                .any(|name| attr.name.trim().eq_ignore_ascii_case(name))
        })
        .flat_map(|attr| attr.values.iter())
        .map(|v| v.trim())
        .find(|v| v.contains('@'));

    from_attributes
        .or_else(|| {
            assertion
                .name_id
                .as_deref()
                .map(str::trim)
                .filter(|v| v.contains('@'))
        })
        .map(str::to_lowercase)
        .ok_or(SamlRejection::MissingEmail)
}

/// URL equality ignoring a trailing slash and the case of scheme and host.
pub fn urls_equivalent(a: &str, b: &str) -> bool {
    let a = a.trim().trim_end_matches('/');
    let b = b.trim().trim_end_matches('/');
    if a.is_empty() || b.is_empty() {
        return false;
    }

    match (Url::parse(a), Url::parse(b)) {
        (Ok(ua), Ok(ub)) => {
            ua.scheme() == ub.scheme()
                && ua.host_str() == ub.host_str()
                && ua.port_or_known_default() == ub.port_or_known_default()
                && ua.path().trim_end_matches('/') == ub.path().trim_end_matches('/')
                && ua.query() == ub.query()
        }
        // Non-URL identifiers (URNs parse as URLs, bare names do not)
        _ => a == b,
    }
}
