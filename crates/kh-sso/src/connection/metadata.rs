//! SAML Service Provider metadata document.

use quick_xml::escape::escape;

use crate::connection::entity::SamlConfig;

const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
const DEFAULT_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

/// Render minimal SP metadata: our entity ID and the HTTP-POST ACS endpoint.
pub fn render_sp_metadata(sp_entity_id: &str, sp_acs_url: &str, saml: &SamlConfig) -> String {
    let name_id_format = saml
        .name_id_format
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .unwrap_or(DEFAULT_NAME_ID_FORMAT);

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="{authn_signed}" WantAssertionsSigned="{want_signed}" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:NameIDFormat>{name_id_format}</md:NameIDFormat>
    <md:AssertionConsumerService Binding="{binding}" Location="{acs_url}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>
"#,
        entity_id = escape(sp_entity_id),
        authn_signed = saml.sign_authn_requests,
        want_signed = saml.want_assertion_signed,
        name_id_format = escape(name_id_format),
        binding = HTTP_POST_BINDING,
        acs_url = escape(sp_acs_url),
    )
}
