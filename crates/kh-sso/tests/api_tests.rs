//! HTTP API tests: public SSO routes and the connection admin surface.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use kh_sso::api::{sso_router, SsoApiState};
use kh_sso::connection::api::{sso_connections_router, ConnectionsApiState};
use kh_sso::shared::middleware::AdminAuth;
use kh_sso::SessionIssuer;

struct App {
    router: Router,
    harness: Harness,
}

fn app() -> App {
    let harness = harness();
    let auth = AdminAuth::new(harness.sessions.clone(), harness.directory.clone());
    let router = Router::new()
        .merge(sso_router(SsoApiState {
            service: harness.service.clone(),
        }))
        .nest(
            "/api/organizations",
            sso_connections_router(ConnectionsApiState {
                registry: harness.service.registry().clone(),
                auth,
            }),
        );
    App { router, harness }
}

impl App {
    async fn token_for(&self, user_id: &str) -> String {
        self.harness
            .sessions
            .issue_token_for_user(user_id, "password")
            .await
            .unwrap()
            .access_token
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body, content_type)
    }

    async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, body, _) = self.send(req).await;
        (status, body)
    }
}

fn saml_connection_body(domain: &str) -> Value {
    json!({
        "name": "Acme SAML",
        "domain": domain,
        "protocol": "saml",
        "samlConfig": {
            "entityId": "https://idp.acme.com",
            "ssoUrl": "https://idp.acme.com/sso",
            "certificate": "MIICertificate"
        }
    })
}

const CONNECTIONS: &str = "/api/organizations/org-1/sso-connections";

#[tokio::test]
async fn test_admin_requires_authentication() {
    let app = app();
    let (status, body) = app.json(Method::GET, CONNECTIONS, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_plain_member_is_forbidden() {
    let app = app();
    let token = app.token_for("user-alice").await;
    let (status, body) = app
        .json(Method::POST, CONNECTIONS, Some(&token), Some(saml_connection_body("acme.com")))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");
}

#[tokio::test]
async fn test_owner_manages_connections() {
    let app = app();
    let token = app.token_for("user-owner").await;

    let (status, created) = app
        .json(Method::POST, CONNECTIONS, Some(&token), Some(saml_connection_body(" ACME.com ")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["domain"], "acme.com");
    assert_eq!(created["status"], "draft");
    assert_eq!(created["samlConfig"]["hasCertificate"], true);
    assert!(created["samlConfig"].get("certificate").is_none());
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(
        created["spEntityId"],
        format!("{}/sso/metadata/{}", BASE_URL, id)
    );
    assert_eq!(created["spAcsUrl"], format!("{}/sso/saml/acs", BASE_URL));

    let (status, list) = app.json(Method::GET, CONNECTIONS, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);

    let item = format!("{}/{}", CONNECTIONS, id);
    let (status, activated) = app
        .json(Method::POST, &format!("{}/activate", item), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activated["status"], "active");

    let (status, updated) = app
        .json(Method::PUT, &item, Some(&token), Some(json!({ "name": "Renamed" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Renamed");
    assert_eq!(updated["samlConfig"]["hasCertificate"], true);

    let (status, _) = app.json(Method::DELETE, &item, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.json(Method::GET, &item, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "SSO_NOT_AVAILABLE");
}

#[tokio::test]
async fn test_duplicate_domain_conflicts() {
    let app = app();
    let token = app.token_for("user-owner").await;

    let (status, _) = app
        .json(Method::POST, CONNECTIONS, Some(&token), Some(saml_connection_body("acme.com")))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .json(Method::POST, CONNECTIONS, Some(&token), Some(saml_connection_body("ACME.COM")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "DUPLICATE");
}

#[tokio::test]
async fn test_other_organization_connection_reads_as_missing() {
    let app = app();
    let foreign = app
        .harness
        .service
        .registry()
        .create(
            OTHER_ORG_ID,
            serde_json::from_value(saml_connection_body("globex.com")).unwrap(),
        )
        .await
        .unwrap();

    let token = app.token_for("user-owner").await;
    let (status, _) = app
        .json(Method::GET, &format!("{}/{}", CONNECTIONS, foreign.id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .json(Method::DELETE, &format!("{}/{}", CONNECTIONS, foreign.id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_activation_requires_protocol_fields() {
    let app = app();
    let token = app.token_for("user-owner").await;

    let (status, created) = app
        .json(
            Method::POST,
            CONNECTIONS,
            Some(&token),
            Some(json!({
                "name": "Acme OIDC",
                "domain": "acme.io",
                "protocol": "oidc",
                "oidcConfig": { "issuer": "https://login.acme.io" }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let id = created["id"].as_str().unwrap();
    let (status, body) = app
        .json(Method::POST, &format!("{}/{}/activate", CONNECTIONS, id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_initiate_unknown_domain() {
    let app = app();
    let (status, body) = app
        .json(Method::POST, "/sso/initiate", None, Some(json!({ "domain": "nowhere.com" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "SSO_NOT_AVAILABLE");
}

#[tokio::test]
async fn test_initiate_saml_via_query() {
    let app = app();
    app.harness.active_saml_connection("acme.com", false).await;

    let (status, body) = app
        .json(Method::GET, "/sso/initiate?domain=acme.com&redirect_url=%2Fhome", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let redirect = body["redirect_url"].as_str().unwrap();
    assert!(query_param(redirect, "RelayState").is_some());
}

#[tokio::test]
async fn test_saml_acs_form_post() {
    let app = app();
    app.harness.active_saml_connection("acme.com", false).await;
    let url = app
        .harness
        .service
        .initiate_login("acme.com", "/home")
        .await
        .unwrap();
    let relay = query_param(&url, "RelayState").unwrap();
    let response = saml_response("alice@acme.com", chrono::Duration::minutes(5), true);

    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("RelayState", &relay)
        .append_pair("SAMLResponse", &response)
        .finish();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/sso/saml/acs")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();

    let (status, body, _) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(body["refresh_token"].as_str().is_some());
    assert_eq!(body["organization"]["id"], ORG_ID);
    assert_eq!(body["user"]["email"], "alice@acme.com");
    assert_eq!(body["is_new_user"], false);
    assert_eq!(body["redirect_url"], "/home");
}

#[tokio::test]
async fn test_saml_rejections_share_one_error_code() {
    let app = app();
    app.harness.active_saml_connection("acme.com", false).await;
    let url = app.harness.service.initiate_login("acme.com", "/").await.unwrap();
    let relay = query_param(&url, "RelayState").unwrap();
    let unsigned = saml_response("alice@acme.com", chrono::Duration::minutes(5), false);

    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("RelayState", &relay)
        .append_pair("SAMLResponse", &unsigned)
        .finish();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/sso/saml/acs")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();

    let (status, body, _) = app.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_SAML_RESPONSE");
    assert!(!body["message"].as_str().unwrap().to_lowercase().contains("signature"));
}

#[tokio::test]
async fn test_oidc_callback_passes_through_idp_error() {
    let app = app();
    let (status, body) = app
        .json(
            Method::GET,
            "/sso/oidc/callback?error=access_denied&error_description=User%20cancelled&state=abc",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "IDP_ERROR");
    assert_eq!(body["message"], "access_denied");
}

#[tokio::test]
async fn test_oidc_callback_does_not_reflect_unregistered_error() {
    let app = app();
    let (status, body) = app
        .json(
            Method::GET,
            "/sso/oidc/callback?error=%3Cb%3EVisit%20evil.example%3C%2Fb%3E&state=abc",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "IDP_ERROR");
    assert_eq!(body["message"], "unknown_error");
}

#[tokio::test]
async fn test_oidc_callback_with_unknown_state() {
    let app = app();
    let (status, body) = app
        .json(Method::GET, "/sso/oidc/callback?state=bogus&code=x", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_STATE");
}

#[tokio::test]
async fn test_sp_metadata_is_xml() {
    let app = app();
    let connection = app.harness.active_saml_connection("acme.com", false).await;

    let req = Request::builder()
        .uri(format!("/sso/metadata/{}", connection.id))
        .body(Body::empty())
        .unwrap();
    let (status, body, content_type) = app.send(req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/xml"));
    let xml = body.as_str().unwrap();
    assert!(xml.contains(&connection.sp_entity_id));
    assert!(xml.contains("/sso/saml/acs"));
}

#[tokio::test]
async fn test_health_and_openapi() {
    let app = app();
    let (status, body) = app.json(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");

    let (status, doc) = app.json(Method::GET, "/api-docs/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"].get("/sso/initiate").is_some());
    assert!(doc["paths"]
        .get("/api/organizations/{org_id}/sso-connections")
        .is_some());
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let app = app();
    let token = app.token_for("user-owner").await;
    let req = Request::builder()
        .uri(CONNECTIONS)
        .header(header::COOKIE, format!("kh_session={}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
}
