//! Integration tests for the password-grant token exchange.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use track_loadtest::auth::{fetch_token, AuthError, KeycloakConfig};
use track_loadtest::user::UserSession;

const TOKEN_PATH: &str = "/auth/realms/myrealm/protocol/openid-connect/token";

fn keycloak(server: &MockServer) -> KeycloakConfig {
    KeycloakConfig {
        base_url: server.uri(),
        realm: "myrealm".to_string(),
        client_id: "myclient".to_string(),
        username: Some("device".to_string()),
        password: Some("secret".to_string()),
    }
}

#[tokio::test]
async fn returns_access_token_from_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("client_id=myclient"))
        .and(body_string_contains("username=device"))
        .and(body_string_contains("password=secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc",
            "expires_in": 300,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = fetch_token(&reqwest::Client::new(), &keycloak(&server))
        .await
        .unwrap();
    assert_eq!(token, "abc");
}

#[tokio::test]
async fn http_failure_is_fatal_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetch_token(&reqwest::Client::new(), &keycloak(&server))
        .await
        .unwrap_err();
    assert!(
        matches!(err, AuthError::TokenEndpointStatus { status: 500, .. }),
        "unexpected error: {}",
        err
    );
}

#[tokio::test]
async fn invalid_credentials_are_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let err = fetch_token(&reqwest::Client::new(), &keycloak(&server))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenEndpointStatus { status: 401, .. }));
}

#[tokio::test]
async fn response_without_access_token_is_invalid() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;

    let err = fetch_token(&reqwest::Client::new(), &keycloak(&server))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidTokenResponse { .. }));
}

#[tokio::test]
async fn missing_username_never_contacts_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = keycloak(&server);
    config.username = None;

    let err = fetch_token(&reqwest::Client::new(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials));
}

#[tokio::test]
async fn missing_password_never_contacts_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = keycloak(&server);
    config.password = None;

    let err = fetch_token(&reqwest::Client::new(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_request_error() {
    let config = KeycloakConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        realm: "myrealm".to_string(),
        client_id: "myclient".to_string(),
        username: Some("device".to_string()),
        password: Some("secret".to_string()),
    };

    let err = fetch_token(&reqwest::Client::new(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenRequest { .. }));
}

#[tokio::test]
async fn session_holds_token_and_prefixed_container_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "session-token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut rng = StdRng::seed_from_u64(11);
    let session = UserSession::start(
        &reqwest::Client::new(),
        &keycloak(&server),
        "FAST",
        &mut rng,
    )
    .await
    .unwrap();

    assert_eq!(session.token, "session-token");
    let digits: u32 = session
        .container_id
        .strip_prefix("FAST")
        .unwrap()
        .parse()
        .unwrap();
    assert!((1000..=9999).contains(&digits));
}
