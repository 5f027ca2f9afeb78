//! Keycloak password-grant token exchange.
//!
//! Each simulated user fetches exactly one bearer token when it starts and
//! keeps it for its whole run. There is no refresh and no retry: a user
//! whose token request fails never submits anything.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::TOKEN_REQUESTS_TOTAL;
use crate::utils::env_non_empty;

pub const DEFAULT_KEYCLOAK_URL: &str = "https://localhost:8443";
pub const DEFAULT_KEYCLOAK_REALM: &str = "myrealm";
pub const DEFAULT_KEYCLOAK_CLIENT: &str = "myclient";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("KEYCLOAK_USERNAME and KEYCLOAK_PASSWORD required")]
    MissingCredentials,

    #[error("token request to {url} failed: {source}")]
    TokenRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("token endpoint {url} returned HTTP {status}")]
    TokenEndpointStatus { url: String, status: u16 },

    #[error("token response from {url} has no usable access_token: {source}")]
    InvalidTokenResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Identity provider settings for the password grant.
#[derive(Clone)]
pub struct KeycloakConfig {
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl KeycloakConfig {
    /// Reads `KEYCLOAK_*` variables, falling back to the local defaults.
    ///
    /// Username and password stay optional here; their absence is reported
    /// when a user tries to start.
    pub fn from_env() -> Self {
        Self {
            base_url: env_non_empty("KEYCLOAK_URL")
                .unwrap_or_else(|| DEFAULT_KEYCLOAK_URL.to_string()),
            realm: env_non_empty("KEYCLOAK_REALM")
                .unwrap_or_else(|| DEFAULT_KEYCLOAK_REALM.to_string()),
            client_id: env_non_empty("KEYCLOAK_CLIENT")
                .unwrap_or_else(|| DEFAULT_KEYCLOAK_CLIENT.to_string()),
            username: env_non_empty("KEYCLOAK_USERNAME"),
            password: env_non_empty("KEYCLOAK_PASSWORD"),
        }
    }

    /// OpenID Connect token endpoint of the configured realm.
    pub fn token_url(&self) -> String {
        format!(
            "{}/auth/realms/{}/protocol/openid-connect/token",
            self.base_url.trim_end_matches('/'),
            self.realm
        )
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl fmt::Debug for KeycloakConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeycloakConfig")
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges the configured username/password for a bearer token.
pub async fn fetch_token(
    client: &reqwest::Client,
    config: &KeycloakConfig,
) -> Result<String, AuthError> {
    let (username, password) = config.credentials().ok_or(AuthError::MissingCredentials)?;
    let url = config.token_url();

    debug!(url = %url, client_id = %config.client_id, username = username, "Requesting access token");

    let form = [
        ("grant_type", "password"),
        ("client_id", config.client_id.as_str()),
        ("username", username),
        ("password", password),
    ];

    let response = client
        .post(&url)
        .form(&form)
        .send()
        .await
        .map_err(|source| {
            TOKEN_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
            AuthError::TokenRequest {
                url: url.clone(),
                source,
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        TOKEN_REQUESTS_TOTAL.with_label_values(&["rejected"]).inc();
        warn!(url = %url, status_code = status.as_u16(), "Token endpoint rejected the request");
        return Err(AuthError::TokenEndpointStatus {
            url,
            status: status.as_u16(),
        });
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|source| {
            TOKEN_REQUESTS_TOTAL.with_label_values(&["invalid"]).inc();
            AuthError::InvalidTokenResponse {
                url: url.clone(),
                source,
            }
        })?;

    TOKEN_REQUESTS_TOTAL.with_label_values(&["ok"]).inc();
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> KeycloakConfig {
        KeycloakConfig {
            base_url: base_url.to_string(),
            realm: "fleet".to_string(),
            client_id: "tracker".to_string(),
            username: Some("device".to_string()),
            password: Some("secret".to_string()),
        }
    }

    #[test]
    fn token_url_follows_realm_layout() {
        assert_eq!(
            config("https://localhost:8443").token_url(),
            "https://localhost:8443/auth/realms/fleet/protocol/openid-connect/token"
        );
    }

    #[test]
    fn token_url_ignores_trailing_slash() {
        assert_eq!(
            config("https://idp.local/").token_url(),
            "https://idp.local/auth/realms/fleet/protocol/openid-connect/token"
        );
    }

    #[test]
    fn empty_password_is_not_a_credential() {
        let mut cfg = config("https://idp.local");
        assert!(cfg.has_credentials());
        cfg.password = Some(String::new());
        assert!(!cfg.has_credentials());
        cfg.password = None;
        assert!(!cfg.has_credentials());
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", config("https://idp.local"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.username = None;
        let err = fetch_token(&reqwest::Client::new(), &cfg).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials));
    }
}
