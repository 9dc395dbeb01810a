//! OIDC login flow against a mock identity provider.

mod common;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use kh_sso::{SessionIssuer, SsoError};

async fn mock_idp() -> MockServer {
    let server = MockServer::start().await;
    let issuer = server.uri();

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_body(&issuer)))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(KEY_ID)))
        .mount(&server)
        .await;

    server
}

async fn mount_token_response(server: &MockServer, id_token: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "idp-access-token",
            "token_type": "Bearer",
            "expires_in": 300,
            "id_token": id_token,
        })))
        .mount(server)
        .await;
}

/// Initiate a login and return (state, nonce, authorization URL).
async fn start_login(h: &Harness) -> (String, String, String) {
    let url = h
        .service
        .initiate_login("acme.com", "/dashboard")
        .await
        .unwrap();
    let state = query_param(&url, "state").unwrap();
    let nonce = query_param(&url, "nonce").unwrap();
    (state, nonce, url)
}

#[tokio::test]
async fn test_end_to_end_login_with_pkce() {
    let server = mock_idp().await;
    let h = harness();
    h.active_oidc_connection("acme.com", &server.uri(), true).await;

    let (state, nonce, url) = start_login(&h).await;
    assert!(url.starts_with(&format!("{}/authorize?", server.uri())));
    assert_eq!(query_param(&url, "code_challenge_method").as_deref(), Some("S256"));
    assert!(query_param(&url, "code_challenge").is_some());
    assert_eq!(query_param(&url, "client_id").as_deref(), Some(CLIENT_ID));

    let verifier = h
        .service
        .states()
        .get_by_state(&state)
        .await
        .unwrap()
        .code_verifier
        .unwrap();

    let id_token = sign_id_token(&id_token_claims(&server.uri(), "Alice@Acme.com", &nonce), KEY_ID);
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(format!("code_verifier={}", verifier)))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "idp-access-token",
            "token_type": "Bearer",
            "id_token": id_token,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = h
        .service
        .handle_oidc_callback(&state, "auth-code-1")
        .await
        .unwrap();

    assert_eq!(result.user.id, "user-alice");
    assert_eq!(result.user.email, "alice@acme.com");
    assert_eq!(result.organization.id, ORG_ID);
    assert_eq!(result.organization.name, "Acme");
    assert!(!result.is_new_user);
    assert_eq!(result.redirect_url, "/dashboard");

    let claims = h.sessions.validate_access_token(&result.access_token).unwrap();
    assert_eq!(claims.sub, "user-alice");
    assert_eq!(claims.amr, "sso");
}

#[tokio::test]
async fn test_state_is_single_use() {
    let server = mock_idp().await;
    let h = harness();
    h.active_oidc_connection("acme.com", &server.uri(), true).await;

    let (state, nonce, _) = start_login(&h).await;
    mount_token_response(
        &server,
        &sign_id_token(&id_token_claims(&server.uri(), "alice@acme.com", &nonce), KEY_ID),
    )
    .await;

    h.service.handle_oidc_callback(&state, "code").await.unwrap();
    let replay = h.service.handle_oidc_callback(&state, "code").await;
    assert!(matches!(replay, Err(SsoError::InvalidState)));
}

#[tokio::test]
async fn test_failed_callback_still_consumes_state() {
    let server = mock_idp().await;
    let h = harness();
    h.active_oidc_connection("acme.com", &server.uri(), true).await;

    let (state, _, _) = start_login(&h).await;
    mount_token_response(
        &server,
        &sign_id_token(&id_token_claims(&server.uri(), "alice@acme.com", "wrong-nonce"), KEY_ID),
    )
    .await;

    let first = h.service.handle_oidc_callback(&state, "code").await;
    assert!(matches!(first, Err(SsoError::InvalidIdToken { .. })));

    let second = h.service.handle_oidc_callback(&state, "code").await;
    assert!(matches!(second, Err(SsoError::InvalidState)));
}

#[tokio::test]
async fn test_nonce_mismatch_is_rejected() {
    let server = mock_idp().await;
    let h = harness();
    h.active_oidc_connection("acme.com", &server.uri(), false).await;

    let (state, nonce, url) = start_login(&h).await;
    assert!(query_param(&url, "code_challenge").is_none());

    let claims = id_token_claims(&server.uri(), "alice@acme.com", &format!("{}-other", nonce));
    mount_token_response(&server, &sign_id_token(&claims, KEY_ID)).await;

    let err = h.service.handle_oidc_callback(&state, "code").await.unwrap_err();
    assert!(matches!(err, SsoError::InvalidIdToken { .. }));
}

#[tokio::test]
async fn test_email_outside_connection_domain() {
    let server = mock_idp().await;
    let h = harness();
    h.active_oidc_connection("acme.com", &server.uri(), true).await;

    let (state, nonce, _) = start_login(&h).await;
    mount_token_response(
        &server,
        &sign_id_token(&id_token_claims(&server.uri(), "user@other.com", &nonce), KEY_ID),
    )
    .await;

    let err = h.service.handle_oidc_callback(&state, "code").await.unwrap_err();
    match err {
        SsoError::DomainMismatch {
            email_domain,
            connection_domain,
        } => {
            assert_eq!(email_domain, "other.com");
            assert_eq!(connection_domain, "acme.com");
        }
        other => panic!("expected DomainMismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unverified_email_is_rejected() {
    let server = mock_idp().await;
    let h = harness();
    h.active_oidc_connection("acme.com", &server.uri(), true).await;

    let (state, nonce, _) = start_login(&h).await;
    let mut claims = id_token_claims(&server.uri(), "alice@acme.com", &nonce);
    claims["email_verified"] = serde_json::json!(false);
    mount_token_response(&server, &sign_id_token(&claims, KEY_ID)).await;

    let err = h.service.handle_oidc_callback(&state, "code").await.unwrap_err();
    assert!(matches!(err, SsoError::EmailNotVerified));
}

#[tokio::test]
async fn test_wrong_audience_is_rejected() {
    let server = mock_idp().await;
    let h = harness();
    h.active_oidc_connection("acme.com", &server.uri(), true).await;

    let (state, nonce, _) = start_login(&h).await;
    let mut claims = id_token_claims(&server.uri(), "alice@acme.com", &nonce);
    claims["aud"] = serde_json::json!("someone-else");
    mount_token_response(&server, &sign_id_token(&claims, KEY_ID)).await;

    let err = h.service.handle_oidc_callback(&state, "code").await.unwrap_err();
    assert!(matches!(err, SsoError::InvalidIdToken { .. }));
}

#[tokio::test]
async fn test_unknown_account_is_not_created() {
    let server = mock_idp().await;
    let h = harness();
    h.active_oidc_connection("acme.com", &server.uri(), true).await;

    let (state, nonce, _) = start_login(&h).await;
    mount_token_response(
        &server,
        &sign_id_token(&id_token_claims(&server.uri(), "newcomer@acme.com", &nonce), KEY_ID),
    )
    .await;

    let users_before = h.directory.user_count();
    let err = h.service.handle_oidc_callback(&state, "code").await.unwrap_err();
    assert!(matches!(err, SsoError::UserNotExist));
    assert_eq!(h.directory.user_count(), users_before);
}

#[tokio::test]
async fn test_token_endpoint_failure_is_provider_error() {
    let server = mock_idp().await;
    let h = harness();
    h.active_oidc_connection("acme.com", &server.uri(), true).await;

    let (state, _, _) = start_login(&h).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let err = h.service.handle_oidc_callback(&state, "code").await.unwrap_err();
    assert!(matches!(err, SsoError::Provider { .. }));
}

#[tokio::test]
async fn test_rotated_key_triggers_jwks_refetch() {
    let server = MockServer::start().await;
    let issuer = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_body(&issuer)))
        .mount(&server)
        .await;
    // First fetch only knows the old key; the refetch returns the rotated one
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body("old-key")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body("rotated-key")))
        .mount(&server)
        .await;

    let h = harness();
    h.active_oidc_connection("acme.com", &issuer, true).await;

    // Warm the key cache with the old key set
    let (state, nonce, _) = start_login(&h).await;
    mount_token_response(
        &server,
        &sign_id_token(&id_token_claims(&issuer, "alice@acme.com", &nonce), "old-key"),
    )
    .await;
    h.service.handle_oidc_callback(&state, "code").await.unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body("rotated-key")))
        .expect(1)
        .mount(&server)
        .await;

    let (state, nonce, _) = start_login(&h).await;
    mount_token_response(
        &server,
        &sign_id_token(&id_token_claims(&issuer, "alice@acme.com", &nonce), "rotated-key"),
    )
    .await;
    let result = h.service.handle_oidc_callback(&state, "code").await.unwrap();
    assert_eq!(result.user.id, "user-alice");
}
