//! Decode and parse a SAML `Response` posted to the ACS endpoint.
//!
//! Only the pieces that login validation reads are kept. Parsing is namespace
//! agnostic (local names only) and refuses DTDs outright.

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::validation::SamlRejection;

/// Upper bound on the encoded `SAMLResponse` form value
pub const MAX_RESPONSE_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamlResponse {
    pub issuer: Option<String>,
    pub has_signature: bool,
    /// Top-level `StatusCode/@Value`
    pub status_code: Option<String>,
    pub assertion: SamlAssertion,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamlAssertion {
    pub issuer: Option<String>,
    pub has_signature: bool,
    pub name_id: Option<String>,
    pub not_before: Option<String>,
    pub not_on_or_after: Option<String>,
    pub audiences: Vec<String>,
    /// `SubjectConfirmationData/@Recipient`
    pub recipient: Option<String>,
    /// `SubjectConfirmationData/@NotOnOrAfter`
    pub confirmation_not_on_or_after: Option<String>,
    pub attributes: Vec<SamlAttribute>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamlAttribute {
    pub name: String,
    pub values: Vec<String>,
}

/// Base64 decode (padded, falling back to unpadded) into UTF-8 XML.
pub fn decode_response(encoded: &str) -> Result<String, SamlRejection> {
    if encoded.len() > MAX_RESPONSE_BYTES {
        return Err(SamlRejection::TooLarge);
    }

    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(SamlRejection::MissingParameter("SAMLResponse"));
    }

    let bytes = STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=')))
        .map_err(|_| SamlRejection::InvalidEncoding)?;

    String::from_utf8(bytes).map_err(|_| SamlRejection::InvalidEncoding)
}

/// Decode then parse.
pub fn parse_encoded_response(encoded: &str) -> Result<SamlResponse, SamlRejection> {
    parse_response_xml(&decode_response(encoded)?)
}

/// Parse a `Response` document holding exactly one plaintext `Assertion`.
pub fn parse_response_xml(xml: &str) -> Result<SamlResponse, SamlRejection> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut response = SamlResponse::default();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut assertions = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::DocType(_)) => return Err(SamlRejection::DoctypeNotAllowed),
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                on_element(&mut response, &path, &name, &e, &mut assertions)?;
                path.push(name);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                on_element(&mut response, &path, &name, &e, &mut assertions)?;
            }
            Ok(Event::Text(e)) => {
                let value = e
                    .unescape()
                    .map_err(|err| SamlRejection::MalformedXml(err.to_string()))?;
                text.push_str(&value);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else {
                    return Err(SamlRejection::MalformedXml("unbalanced end tag".to_string()));
                };
                let value = std::mem::take(&mut text).trim().to_string();
                on_text(&mut response, &path, &name, value);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SamlRejection::MalformedXml(e.to_string())),
            _ => {}
        }
    }

    if !path.is_empty() {
        return Err(SamlRejection::MalformedXml("unexpected end of document".to_string()));
    }
    if assertions == 0 {
        return Err(SamlRejection::MissingAssertion);
    }
    Ok(response)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
}

fn in_assertion(path: &[String]) -> bool {
    path.len() >= 2 && path[0] == "Response" && path[1] == "Assertion"
}

fn on_element(
    response: &mut SamlResponse,
    path: &[String],
    name: &str,
    e: &BytesStart<'_>,
    assertions: &mut usize,
) -> Result<(), SamlRejection> {
    let parent = path.last().map(String::as_str);

    match (parent, name) {
        (None, "Response") => {}
        (None, other) => {
            return Err(SamlRejection::MalformedXml(format!(
                "expected Response root element, found {}",
                other
            )))
        }
        (Some("Response"), "Assertion") => {
            *assertions += 1;
            if *assertions > 1 {
                return Err(SamlRejection::MultipleAssertions);
            }
        }
        (Some("Response"), "EncryptedAssertion") => {
            return Err(SamlRejection::MalformedXml(
                "encrypted assertions are not supported".to_string(),
            ))
        }
        (Some("Response"), "Signature") if path.len() == 1 => response.has_signature = true,
        (Some("Assertion"), "Signature") if in_assertion(path) && path.len() == 2 => {
            response.assertion.has_signature = true
        }
        (Some("Status"), "StatusCode") if path.len() == 2 && response.status_code.is_none() => {
            response.status_code = attribute(e, "Value");
        }
        (Some("Assertion"), "Conditions") if in_assertion(path) => {
            response.assertion.not_before = attribute(e, "NotBefore");
            response.assertion.not_on_or_after = attribute(e, "NotOnOrAfter");
        }
        (Some("SubjectConfirmation"), "SubjectConfirmationData") if in_assertion(path) => {
            let assertion = &mut response.assertion;
            if assertion.recipient.is_none() {
                assertion.recipient = attribute(e, "Recipient");
            }
            if assertion.confirmation_not_on_or_after.is_none() {
                assertion.confirmation_not_on_or_after = attribute(e, "NotOnOrAfter");
            }
        }
        (Some("AttributeStatement"), "Attribute") if in_assertion(path) => {
            response.assertion.attributes.push(SamlAttribute {
                name: attribute(e, "Name").unwrap_or_default(),
                values: Vec::new(),
            });
        }
        _ => {}
    }
    Ok(())
}

fn on_text(response: &mut SamlResponse, path: &[String], name: &str, value: String) {
    let parent = path.last().map(String::as_str);
    let assertion_scope = in_assertion(path);

    match (parent, name) {
        (Some("Response"), "Issuer") if path.len() == 1 => response.issuer = Some(value),
        (Some("Assertion"), "Issuer") if assertion_scope && path.len() == 2 => {
            response.assertion.issuer = Some(value)
        }
        (Some("Subject"), "NameID") if assertion_scope => response.assertion.name_id = Some(value),
        (Some("AudienceRestriction"), "Audience") if assertion_scope => {
            if !value.is_empty() {
                response.assertion.audiences.push(value);
            }
        }
        (Some("Attribute"), "AttributeValue") if assertion_scope => {
            if let Some(attr) = response.assertion.attributes.last_mut() {
                attr.values.push(value);
            }
        }
        _ => {}
    }
}
