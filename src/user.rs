//! Simulated GPS device.
//!
//! A user authenticates once, draws its container id and base coordinate,
//! then loops: pick a weighted task, build the batch, POST it, idle for the
//! profile's think time. Its session is private to the task that runs it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::auth::{fetch_token, AuthError, KeycloakConfig};
use crate::errors::TrackFailure;
use crate::metrics::{
    ACTIVE_USERS, TRACK_FAILURES_TOTAL, TRACK_POINTS_SENT_TOTAL, TRACK_REQUESTS_TOTAL,
    TRACK_REQUEST_DURATION_SECONDS, TRACK_STATUS_CODES,
};
use crate::profile::{ProfileError, UserProfile};
use crate::stats::RunStats;
use crate::trackpoint::{container_id, InvalidTrackPoint, PayloadGenerator, TrackPoint};

pub const TRACK_PATH: &str = "/api/track";

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Credentials and identity held for one user's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub token: String,
    pub container_id: String,
}

impl UserSession {
    /// Fetches the bearer token and draws the container id.
    pub async fn start<R: Rng + ?Sized>(
        client: &reqwest::Client,
        keycloak: &KeycloakConfig,
        container_prefix: &str,
        rng: &mut R,
    ) -> Result<Self, AuthError> {
        let token = fetch_token(client, keycloak).await?;
        Ok(Self {
            token,
            container_id: container_id(container_prefix, rng),
        })
    }
}

/// Per-user settings handed out by the harness.
#[derive(Debug, Clone)]
pub struct UserConfig {
    pub user_id: usize,
    pub host: String,
    pub profile: UserProfile,
    pub max_iterations: Option<u64>,
}

pub struct SimulatedUser {
    config: UserConfig,
    track_url: String,
    client: reqwest::Client,
    keycloak: Arc<KeycloakConfig>,
    stats: Arc<RunStats>,
    rng: StdRng,
}

impl SimulatedUser {
    pub fn new(
        config: UserConfig,
        client: reqwest::Client,
        keycloak: Arc<KeycloakConfig>,
        stats: Arc<RunStats>,
    ) -> Self {
        let track_url = format!("{}{}", config.host.trim_end_matches('/'), TRACK_PATH);
        Self {
            config,
            track_url,
            client,
            keycloak,
            stats,
            rng: StdRng::from_entropy(),
        }
    }

    /// Uses a seeded RNG so task picks and payloads are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Runs the user until `shutdown` flips to true or the iteration cap is
    /// reached. Returns the number of completed task iterations.
    ///
    /// A startup failure ends the user before any tracked request is sent.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<u64, UserError> {
        let user_id = self.config.user_id;
        ACTIVE_USERS.inc();
        let result = self.run_inner(&mut shutdown).await;
        ACTIVE_USERS.dec();

        match &result {
            Ok(iterations) => info!(
                user_id = user_id,
                iterations = iterations,
                "User stopped"
            ),
            Err(e) => {
                self.stats.record_user_startup_failure();
                error!(user_id = user_id, error = %e, "User failed to start");
            }
        }

        result
    }

    async fn run_inner(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<u64, UserError> {
        let selector = self.config.profile.selector()?;
        let session = UserSession::start(
            &self.client,
            &self.keycloak,
            &self.config.profile.container_prefix,
            &mut self.rng,
        )
        .await?;
        let generator = PayloadGenerator::new(session.container_id.clone(), &mut self.rng);

        debug!(
            user_id = self.config.user_id,
            profile = %self.config.profile.name,
            container_id = %session.container_id,
            base = ?generator.base(),
            tasks = ?selector.probabilities(),
            "User started"
        );

        let mut iterations = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Some(max) = self.config.max_iterations {
                if iterations >= max {
                    break;
                }
            }

            let task = selector.select(&mut self.rng);
            let count = task.batch.sample(&mut self.rng);
            let points = generator.generate(count, &mut self.rng);
            self.submit(&session, &task.name, &points).await;
            iterations += 1;

            let pause = self.config.profile.think_time.sample(&mut self.rng);
            if pause.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = time::sleep(pause) => {}
                _ = shutdown.changed() => {}
            }
        }

        Ok(iterations)
    }

    /// Sends one batch and records its outcome. Failures are not retried.
    async fn submit(&self, session: &UserSession, task: &str, points: &[TrackPoint]) {
        if let Some(invalid) = first_invalid_point(points) {
            debug!(
                user_id = self.config.user_id,
                task = task,
                error = %invalid,
                "Generated batch holds an out-of-range point"
            );
        }

        TRACK_REQUESTS_TOTAL.with_label_values(&[task]).inc();
        TRACK_POINTS_SENT_TOTAL.inc_by(points.len() as u64);

        let request_start = Instant::now();
        let result = self
            .client
            .post(&self.track_url)
            .bearer_auth(&session.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(points)
            .send()
            .await;

        let outcome = match result {
            Ok(mut response) => {
                let status = response.status().as_u16();
                TRACK_STATUS_CODES
                    .with_label_values(&[status_code_label(status)])
                    .inc();

                // Drain the body so the connection goes back to the pool.
                let drained = drain_body(&mut response).await;

                match (TrackFailure::from_status(status), drained) {
                    (Some(failure), _) => Err(failure),
                    (None, Err(e)) => Err(TrackFailure::from_reqwest(&e)),
                    (None, Ok(())) => Ok(()),
                }
            }
            Err(e) => {
                TRACK_STATUS_CODES.with_label_values(&["error"]).inc();
                Err(TrackFailure::from_reqwest(&e))
            }
        };

        let latency = request_start.elapsed();
        TRACK_REQUEST_DURATION_SECONDS
            .with_label_values(&[task])
            .observe(latency.as_secs_f64());

        match outcome {
            Ok(()) => {
                debug!(
                    user_id = self.config.user_id,
                    task = task,
                    points = points.len(),
                    latency_ms = latency.as_millis() as u64,
                    "Track request completed"
                );
                self.stats.record(task, points.len(), latency, Ok(()));
            }
            Err(failure) => {
                TRACK_FAILURES_TOTAL
                    .with_label_values(&[task, failure.category.label()])
                    .inc();
                warn!(
                    user_id = self.config.user_id,
                    task = task,
                    container_id = %session.container_id,
                    failure = %failure,
                    "Track request failed"
                );
                self.stats
                    .record(task, points.len(), latency, Err(failure.category));
            }
        }
    }
}

fn first_invalid_point(points: &[TrackPoint]) -> Option<InvalidTrackPoint> {
    points.iter().find_map(|p| p.validate().err())
}

/// Reads the response body to the end, surfacing truncated or reset bodies.
async fn drain_body(response: &mut reqwest::Response) -> Result<(), reqwest::Error> {
    while response.chunk().await?.is_some() {}
    Ok(())
}

/// Returns a static string label for the status codes the ingestion API uses.
fn status_code_label(code: u16) -> &'static str {
    match code {
        200 => "200",
        202 => "202",
        400 => "400",
        401 => "401",
        403 => "403",
        405 => "405",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_cover_ingestion_codes() {
        assert_eq!(status_code_label(202), "202");
        assert_eq!(status_code_label(503), "503");
        assert_eq!(status_code_label(418), "other");
    }

    #[test]
    fn generated_batches_pass_the_sanity_check() {
        let mut rng = StdRng::seed_from_u64(3);
        let generator = PayloadGenerator::new("LOAD1234", &mut rng);
        let points = generator.generate(20, &mut rng);
        assert_eq!(first_invalid_point(&points), None);
    }

    #[test]
    fn sanity_check_reports_first_bad_point() {
        let mut rng = StdRng::seed_from_u64(3);
        let generator = PayloadGenerator::new("LOAD1234", &mut rng);
        let mut points = generator.generate(3, &mut rng);
        points[1].speed = -1.0;
        points[2].lat = 95.0;
        assert_eq!(
            first_invalid_point(&points),
            Some(InvalidTrackPoint::NegativeSpeed(-1.0))
        );
    }
}
