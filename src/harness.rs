//! User scheduler and shutdown hooks.
//!
//! The harness spawns one tokio task per simulated user at the configured
//! spawn rate, assigns profiles round-robin, and stops the run when the
//! duration elapses, the caller's shutdown future resolves, or every user
//! has finished its iterations. Quitting hooks then receive the final
//! statistics snapshot in registration order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use crate::auth::KeycloakConfig;
use crate::profile::UserProfile;
use crate::stats::{RunStats, StatsSnapshot};
use crate::user::{SimulatedUser, UserConfig, UserError};

/// Cap for deadlines and spawn delays that would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Listener invoked once with the final statistics.
pub type QuittingHook = Box<dyn Fn(&StatsSnapshot) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub host: String,
    pub users: usize,

    /// Users started per second
    pub spawn_rate: f64,

    pub run_time: Duration,
    pub max_iterations: Option<u64>,

    /// Assigned to users round-robin by user index
    pub profiles: Vec<UserProfile>,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    RunTimeElapsed,
    Interrupted,
    UsersFinished,
}

pub struct Harness {
    client: reqwest::Client,
    keycloak: Arc<KeycloakConfig>,
    config: HarnessConfig,
    quitting: Vec<QuittingHook>,
    seed: Option<u64>,
}

impl Harness {
    pub fn new(client: reqwest::Client, keycloak: KeycloakConfig, config: HarnessConfig) -> Self {
        Self {
            client,
            keycloak: Arc::new(keycloak),
            config,
            quitting: Vec::new(),
            seed: None,
        }
    }

    /// Seeds every user's RNG (user `i` gets `seed + i`).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Registers a listener for the end of the run.
    pub fn on_quitting<F>(&mut self, hook: F)
    where
        F: Fn(&StatsSnapshot) + Send + Sync + 'static,
    {
        self.quitting.push(Box::new(hook));
    }

    fn profile_for(&self, user_id: usize) -> Option<UserProfile> {
        if self.config.profiles.is_empty() {
            return None;
        }
        Some(self.config.profiles[user_id % self.config.profiles.len()].clone())
    }

    /// Runs the load test and returns the final snapshot.
    pub async fn run<S>(self, shutdown: S) -> StatsSnapshot
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let stats = Arc::new(RunStats::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let start = Instant::now();
        let deadline = start
            .checked_add(self.config.run_time)
            .unwrap_or_else(|| start + FAR_FUTURE);
        let spawn_interval = spawn_interval(self.config.spawn_rate);

        info!(
            users = self.config.users,
            spawn_rate = self.config.spawn_rate,
            run_time = ?self.config.run_time,
            "Spawning users"
        );

        let mut users = JoinSet::new();
        let mut early_stop = None;

        for user_id in 0..self.config.users {
            if user_id > 0 && !spawn_interval.is_zero() {
                tokio::select! {
                    _ = time::sleep(spawn_interval) => {}
                    _ = time::sleep_until(deadline) => {
                        early_stop = Some(StopReason::RunTimeElapsed);
                    }
                    _ = &mut shutdown => {
                        early_stop = Some(StopReason::Interrupted);
                    }
                }
                if early_stop.is_some() {
                    break;
                }
            }

            let Some(profile) = self.profile_for(user_id) else {
                error!("No user profiles configured; nothing to spawn");
                break;
            };

            let user_config = UserConfig {
                user_id,
                host: self.config.host.clone(),
                profile,
                max_iterations: self.config.max_iterations,
            };
            let mut user = SimulatedUser::new(
                user_config,
                self.client.clone(),
                self.keycloak.clone(),
                stats.clone(),
            );
            if let Some(seed) = self.seed {
                user = user.with_seed(seed.wrapping_add(user_id as u64));
            }

            users.spawn(user.run(stop_rx.clone()));
            debug!(user_id = user_id, "User spawned");
        }

        let reason = match early_stop {
            Some(reason) => reason,
            None => {
                info!(spawned = users.len(), "All users spawned");
                tokio::select! {
                    _ = time::sleep_until(deadline) => StopReason::RunTimeElapsed,
                    _ = &mut shutdown => StopReason::Interrupted,
                    _ = drain_users(&mut users) => StopReason::UsersFinished,
                }
            }
        };

        info!(reason = ?reason, "Stopping users");
        let _ = stop_tx.send(true);
        drain_users(&mut users).await;

        let snapshot = stats.snapshot();
        for hook in &self.quitting {
            hook(&snapshot);
        }

        snapshot
    }
}

/// Delay between user starts; rates too small to represent spawn one user
/// per `FAR_FUTURE`.
fn spawn_interval(spawn_rate: f64) -> Duration {
    if !(spawn_rate > 0.0 && spawn_rate.is_finite()) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(1.0 / spawn_rate)
        .map(|interval| interval.min(FAR_FUTURE))
        .unwrap_or(FAR_FUTURE)
}

async fn drain_users(users: &mut JoinSet<Result<u64, UserError>>) {
    while let Some(joined) = users.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "User task panicked");
        }
    }
}
