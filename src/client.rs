use std::time::Duration;
use tracing::{info, warn};

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Applies to both the token exchange and tracked requests.
    pub skip_tls_verify: bool,
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            skip_tls_verify: false,
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 32,
        }
    }
}

/// Builds the reqwest client shared by every simulated user.
///
/// Cloning the returned client is cheap and shares its connection pool.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, reqwest::Error> {
    let mut client_builder = reqwest::Client::builder()
        .user_agent(concat!("track-loadtest/", env!("CARGO_PKG_VERSION")))
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host);

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification for token and track requests");
        client_builder = client_builder.danger_accept_invalid_certs(true);
    }

    let client = client_builder.build()?;

    info!(
        timeout = ?config.request_timeout,
        max_idle_per_host = config.pool_max_idle_per_host,
        skip_tls_verify = config.skip_tls_verify,
        "HTTP client configured"
    );

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        assert!(build_client(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn builds_with_tls_verification_disabled() {
        let config = ClientConfig {
            skip_tls_verify: true,
            request_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 4,
        };
        assert!(build_client(&config).is_ok());
    }
}
