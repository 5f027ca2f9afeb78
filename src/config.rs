use std::env;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::auth::KeycloakConfig;
use crate::client::ClientConfig;
use crate::harness::HarnessConfig;
use crate::profile::ProfileMix;
use crate::utils::{env_non_empty, parse_bool, parse_duration_string};

/// One user every 1000 seconds.
pub const MIN_SPAWN_RATE: f64 = 0.001;

/// Upper bound for `TEST_DURATION` and `REQUEST_TIMEOUT`.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    MissingVar(&'static str),

    #[error("TARGET_URL must start with http:// or https:// (got '{0}')")]
    InvalidTargetUrl(String),

    #[error("Invalid {var} value '{value}': {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Main configuration for the load test.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub num_users: usize,

    /// Users started per second
    pub spawn_rate: f64,

    pub test_duration: Duration,

    /// Per-user iteration cap; `None` runs until the duration elapses
    pub max_iterations: Option<u64>,

    pub profile_mix: ProfileMix,
    pub skip_tls_verify: bool,
    pub request_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub keycloak: KeycloakConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let target_url = env_non_empty("TARGET_URL").ok_or(ConfigError::MissingVar("TARGET_URL"))?;
        if !target_url.starts_with("http://") && !target_url.starts_with("https://") {
            return Err(ConfigError::InvalidTargetUrl(target_url));
        }

        let num_users: usize = parse_var("NUM_USERS", 10)?;
        if num_users == 0 {
            return Err(invalid("NUM_USERS", "0", "must be greater than 0"));
        }

        let spawn_rate: f64 = parse_var("SPAWN_RATE", 10.0)?;
        if !(spawn_rate.is_finite() && spawn_rate >= MIN_SPAWN_RATE) {
            return Err(invalid(
                "SPAWN_RATE",
                &spawn_rate.to_string(),
                &format!("must be at least {} users per second", MIN_SPAWN_RATE),
            ));
        }

        let test_duration = duration_var("TEST_DURATION", "60s")?;
        let request_timeout = duration_var("REQUEST_TIMEOUT", "30s")?;

        let max_iterations = match env_non_empty("MAX_ITERATIONS") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| invalid("MAX_ITERATIONS", &raw, &e.to_string()))?,
            ),
            None => None,
        };

        let profile_mix = match env_non_empty("USER_PROFILE") {
            Some(raw) => ProfileMix::from_str(&raw)
                .map_err(|e| invalid("USER_PROFILE", &raw, &e.to_string()))?,
            None => ProfileMix::Mixed,
        };

        let skip_tls_verify = match env_non_empty("SKIP_TLS_VERIFY") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| invalid("SKIP_TLS_VERIFY", &raw, "expected true or false"))?,
            None => true,
        };

        let metrics_port = match env_non_empty("METRICS_PORT") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|e| invalid("METRICS_PORT", &raw, &e.to_string()))?,
            ),
            None => None,
        };

        Ok(Config {
            target_url,
            num_users,
            spawn_rate,
            test_duration,
            max_iterations,
            profile_mix,
            skip_tls_verify,
            request_timeout,
            metrics_port,
            keycloak: KeycloakConfig::from_env(),
        })
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            request_timeout: self.request_timeout,
            ..ClientConfig::default()
        }
    }

    pub fn to_harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            host: self.target_url.clone(),
            users: self.num_users,
            spawn_rate: self.spawn_rate,
            run_time: self.test_duration,
            max_iterations: self.max_iterations,
            profiles: self.profile_mix.profiles(),
        }
    }

    /// Logs the configuration summary. The password is never logged.
    pub fn log_summary(&self) {
        info!(
            target_url = %self.target_url,
            users = self.num_users,
            spawn_rate = self.spawn_rate,
            duration = ?self.test_duration,
            max_iterations = ?self.max_iterations,
            profile = %self.profile_mix,
            skip_tls_verify = self.skip_tls_verify,
            request_timeout = ?self.request_timeout,
            metrics_port = ?self.metrics_port,
            "Starting load test"
        );
        info!(
            token_url = %self.keycloak.token_url(),
            client_id = %self.keycloak.client_id,
            username = ?self.keycloak.username,
            "Identity provider"
        );
        if !self.keycloak.has_credentials() {
            warn!("KEYCLOAK_USERNAME or KEYCLOAK_PASSWORD is not set; every user will fail to start");
        }
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
        _ => Ok(default),
    }
}

fn duration_var(var: &'static str, default: &str) -> Result<Duration, ConfigError> {
    let raw = env_non_empty(var).unwrap_or_else(|| default.to_string());
    let duration = parse_duration_string(&raw).map_err(|reason| ConfigError::InvalidValue {
        var,
        value: raw.clone(),
        reason,
    })?;
    if duration > MAX_DURATION {
        return Err(invalid(var, &raw, "must not exceed 365d"));
    }
    Ok(duration)
}
