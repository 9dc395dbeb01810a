//! Shared fixtures for the SSO integration tests.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{encode, EncodingKey, Header};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;

use kh_sso::{
    ConnectionDraft, InMemoryAccountDirectory, InMemoryConnectionRepository,
    InMemoryStateRepository, JwtSessionConfig, JwtSessionIssuer, Membership, MembershipStatus,
    OidcConfig, Organization, OrganizationRole, SamlConfig, SsoConnection, SsoProtocol,
    SsoService, SsoSettings, UserAccount,
};

pub const BASE_URL: &str = "https://sso.example.com";
pub const ORG_ID: &str = "org-1";
pub const OTHER_ORG_ID: &str = "org-2";
pub const CLIENT_ID: &str = "keyhaven-client";
pub const KEY_ID: &str = "test-key";
pub const IDP_ENTITY_ID: &str = "https://idp.acme.com";

pub struct Harness {
    pub service: Arc<SsoService>,
    pub directory: Arc<InMemoryAccountDirectory>,
    pub sessions: Arc<JwtSessionIssuer>,
}

/// Directory fixture:
/// - alice@acme.com: confirmed member of org-1
/// - owner@acme.com: confirmed owner of org-1
/// - carol@acme.com: account without membership
/// - dave@acme.com: invited (not yet accepted) member of org-1
pub fn harness() -> Harness {
    harness_with(SsoSettings {
        base_url: BASE_URL.to_string(),
        ..Default::default()
    })
}

pub fn harness_with(settings: SsoSettings) -> Harness {
    let directory = Arc::new(InMemoryAccountDirectory::new());
    directory.add_organization(Organization {
        id: ORG_ID.into(),
        name: "Acme".into(),
        slug: Some("acme".into()),
    });
    directory.add_organization(Organization {
        id: OTHER_ORG_ID.into(),
        name: "Globex".into(),
        slug: None,
    });

    let members = [
        ("user-alice", "alice@acme.com", Some((OrganizationRole::Member, MembershipStatus::Confirmed))),
        ("user-owner", "owner@acme.com", Some((OrganizationRole::Owner, MembershipStatus::Confirmed))),
        ("user-carol", "carol@acme.com", None),
        ("user-dave", "dave@acme.com", Some((OrganizationRole::Member, MembershipStatus::Invited))),
    ];
    for (id, email, membership) in members {
        directory.add_user(UserAccount {
            id: id.into(),
            email: email.into(),
            name: None,
        });
        if let Some((role, status)) = membership {
            directory.add_membership(Membership {
                organization_id: ORG_ID.into(),
                user_id: id.into(),
                role,
                status,
            });
        }
    }

    let sessions = Arc::new(
        JwtSessionIssuer::new_with_secret(JwtSessionConfig {
            secret_key: "integration-test-secret".into(),
            ..Default::default()
        })
        .unwrap(),
    );

    let service = SsoService::new(
        settings,
        Arc::new(InMemoryConnectionRepository::new()),
        Arc::new(InMemoryStateRepository::new()),
        directory.clone(),
        sessions.clone(),
    )
    .unwrap();

    Harness {
        service: Arc::new(service),
        directory,
        sessions,
    }
}

pub fn settings_with_state_ttl(ttl: Duration) -> SsoSettings {
    SsoSettings {
        base_url: BASE_URL.to_string(),
        state_ttl: ttl,
        ..Default::default()
    }
}

impl Harness {
    pub async fn active_oidc_connection(&self, domain: &str, issuer: &str, pkce_enabled: bool) -> SsoConnection {
        let draft = ConnectionDraft {
            name: "Acme OIDC".into(),
            domain: domain.into(),
            protocol: SsoProtocol::Oidc,
            saml_config: None,
            oidc_config: Some(OidcConfig {
                issuer: issuer.into(),
                client_id: CLIENT_ID.into(),
                client_secret: Some("s3cret".into()),
                use_discovery: true,
                pkce_enabled,
                ..Default::default()
            }),
            default_role: None,
            auto_provision: false,
            jit_provisioning: false,
        };
        self.create_and_activate(draft).await
    }

    pub async fn active_saml_connection(&self, domain: &str, auto_provision: bool) -> SsoConnection {
        let draft = ConnectionDraft {
            name: "Acme SAML".into(),
            domain: domain.into(),
            protocol: SsoProtocol::Saml,
            saml_config: Some(SamlConfig {
                entity_id: IDP_ENTITY_ID.into(),
                sso_url: "https://idp.acme.com/sso".into(),
                certificate: "MIICertificate".into(),
                ..Default::default()
            }),
            oidc_config: None,
            default_role: None,
            auto_provision,
            jit_provisioning: false,
        };
        self.create_and_activate(draft).await
    }

    async fn create_and_activate(&self, draft: ConnectionDraft) -> SsoConnection {
        let registry = self.service.registry();
        let connection = registry.create(ORG_ID, draft).await.unwrap();
        registry.activate(&connection.id).await.unwrap()
    }
}

/// Value of query parameter `name` in `url`
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// RSA signing key shared by every test in a binary (generation is slow)
pub struct TestIdpKey {
    pub pem: String,
    pub n: String,
    pub e: String,
}

pub fn idp_key() -> &'static TestIdpKey {
    static KEY: OnceLock<TestIdpKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = private_key.to_pkcs1_pem(LineEnding::LF).unwrap().to_string();
        let public_key = private_key.to_public_key();
        TestIdpKey {
            pem,
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }
    })
}

pub fn jwks_body(kid: &str) -> serde_json::Value {
    let key = idp_key();
    serde_json::json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": key.n,
            "e": key.e,
        }]
    })
}

pub fn discovery_body(issuer: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/authorize", issuer),
        "token_endpoint": format!("{}/token", issuer),
        "jwks_uri": format!("{}/jwks", issuer),
        "response_types_supported": ["code"],
        "id_token_signing_alg_values_supported": ["RS256"],
    })
}

/// Sign `claims` as the mock IdP would
pub fn sign_id_token(claims: &serde_json::Value, kid: &str) -> String {
    let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(idp_key().pem.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

pub fn id_token_claims(issuer: &str, email: &str, nonce: &str) -> serde_json::Value {
    let now = chrono::Utc::now().timestamp();
    serde_json::json!({
        "iss": issuer,
        "sub": format!("idp|{}", email),
        "aud": CLIENT_ID,
        "exp": now + 300,
        "iat": now,
        "nonce": nonce,
        "email": email,
        "email_verified": true,
        "name": "Test User",
    })
}

/// Base64 SAML response with one assertion; `not_on_or_after_offset` is relative to now.
pub fn saml_response(email: &str, not_on_or_after_offset: chrono::Duration, signed: bool) -> String {
    let now = chrono::Utc::now();
    let fmt = |t: chrono::DateTime<chrono::Utc>| t.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let not_before = fmt(now - chrono::Duration::minutes(5));
    let not_on_or_after = fmt(now + not_on_or_after_offset);
    let signature = if signed {
        "<ds:Signature><ds:SignedInfo/><ds:SignatureValue>AAAA</ds:SignatureValue></ds:Signature>"
    } else {
        ""
    };

    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" ID="_resp" Version="2.0" IssueInstant="{not_before}">
  <saml:Issuer>{issuer}</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:Assertion ID="_assertion" Version="2.0" IssueInstant="{not_before}">
    <saml:Issuer>{issuer}</saml:Issuer>
    {signature}
    <saml:Subject>
      <saml:NameID Format="urn:oasis:names:tc:SAML:2.0:nameid-format:persistent">opaque-subject</saml:NameID>
      <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
        <saml:SubjectConfirmationData Recipient="{base}/sso/saml/acs"/>
      </saml:SubjectConfirmation>
    </saml:Subject>
    <saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}"/>
    <saml:AttributeStatement>
      <saml:Attribute Name="http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress">
        <saml:AttributeValue>{email}</saml:AttributeValue>
      </saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#,
        issuer = IDP_ENTITY_ID,
        base = BASE_URL,
    );

    base64::engine::general_purpose::STANDARD.encode(xml)
}
