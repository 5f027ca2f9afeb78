//! Workload profiles: weighted task sets with think time.
//!
//! A profile describes how one kind of simulated device behaves: which
//! submissions it makes, how often relative to each other, and how long it
//! idles between them.

use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("profile '{profile}' has no tasks")]
    NoTasks { profile: String },

    #[error("task '{task}' in profile '{profile}' has zero weight. Remove tasks with zero weight.")]
    ZeroWeight { profile: String, task: String },

    #[error("task '{task}' in profile '{profile}' has an empty batch range {min}..={max}")]
    EmptyBatch {
        profile: String,
        task: String,
        min: usize,
        max: usize,
    },

    #[error("unknown user profile '{0}'. Use 'standard', 'high_throughput', or 'mixed'.")]
    UnknownProfile(String),
}

/// Number of track points one task submission carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSize {
    Fixed(usize),

    /// Uniform in `min..=max`
    Range { min: usize, max: usize },
}

impl BatchSize {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let (min, max) = self.bounds();
        if min >= max {
            return min;
        }
        rng.gen_range(min..=max)
    }

    /// Inclusive bounds of the sizes this batch can produce.
    pub fn bounds(&self) -> (usize, usize) {
        match *self {
            BatchSize::Fixed(n) => (n, n),
            BatchSize::Range { min, max } => (min, max),
        }
    }
}

/// Idle interval between a simulated user's successive tasks.
///
/// Think time does NOT count towards request latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkTime {
    Fixed(Duration),

    /// Uniform between min and max, inclusive
    Random { min: Duration, max: Duration },
}

impl ThinkTime {
    pub fn between(min: Duration, max: Duration) -> Self {
        ThinkTime::Random { min, max }
    }

    /// Draws the next pause.
    ///
    /// Random delays are sampled at microsecond resolution; the
    /// high-throughput window is only ten milliseconds wide.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            ThinkTime::Fixed(duration) => duration,
            ThinkTime::Random { min, max } => {
                let min_us = min.as_micros() as u64;
                let max_us = max.as_micros() as u64;

                if min_us >= max_us {
                    return min;
                }

                Duration::from_micros(rng.gen_range(min_us..=max_us))
            }
        }
    }
}

/// One kind of `/api/track` submission.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackTask {
    pub name: String,

    /// Relative selection weight; probability is weight / sum(weights)
    pub weight: u32,

    pub batch: BatchSize,
}

impl TrackTask {
    pub fn new(name: impl Into<String>, weight: u32, batch: BatchSize) -> Self {
        Self {
            name: name.into(),
            weight,
            batch,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub name: String,

    /// Prefix of the container ids this profile's users report under
    pub container_prefix: String,

    pub tasks: Vec<TrackTask>,

    pub think_time: ThinkTime,
}

impl UserProfile {
    /// Regular devices: mostly single points, some buffer flushes, and the
    /// occasional reconnect after being offline.
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            container_prefix: "LOAD".to_string(),
            tasks: vec![
                TrackTask::new("send_single_point", 10, BatchSize::Fixed(1)),
                TrackTask::new("send_small_batch", 5, BatchSize::Range { min: 3, max: 5 }),
                TrackTask::new("send_large_batch", 1, BatchSize::Range { min: 10, max: 20 }),
            ],
            think_time: ThinkTime::between(Duration::from_millis(100), Duration::from_millis(500)),
        }
    }

    /// Aggressive devices probing maximum sustained throughput.
    pub fn high_throughput() -> Self {
        Self {
            name: "high_throughput".to_string(),
            container_prefix: "FAST".to_string(),
            tasks: vec![TrackTask::new("send_batch", 1, BatchSize::Fixed(5))],
            think_time: ThinkTime::between(Duration::ZERO, Duration::from_millis(10)),
        }
    }

    pub fn with_think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<TrackTask>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Validates the task set and builds its weighted selector.
    pub fn selector(&self) -> Result<TaskSelector, ProfileError> {
        TaskSelector::new(&self.name, self.tasks.clone())
    }
}

/// Weighted random task selection.
///
/// Keeps cumulative weights so each pick is a single draw plus a binary search.
#[derive(Debug, Clone)]
pub struct TaskSelector {
    tasks: Vec<TrackTask>,
    cumulative_weights: Vec<u64>,
    total_weight: u64,
}

impl TaskSelector {
    pub fn new(profile: &str, tasks: Vec<TrackTask>) -> Result<Self, ProfileError> {
        if tasks.is_empty() {
            return Err(ProfileError::NoTasks {
                profile: profile.to_string(),
            });
        }

        let mut cumulative = Vec::with_capacity(tasks.len());
        let mut sum = 0u64;

        for task in &tasks {
            if task.weight == 0 {
                return Err(ProfileError::ZeroWeight {
                    profile: profile.to_string(),
                    task: task.name.clone(),
                });
            }
            let (min, max) = task.batch.bounds();
            if min > max {
                return Err(ProfileError::EmptyBatch {
                    profile: profile.to_string(),
                    task: task.name.clone(),
                    min,
                    max,
                });
            }
            sum += u64::from(task.weight);
            cumulative.push(sum);
        }

        Ok(Self {
            tasks,
            cumulative_weights: cumulative,
            total_weight: sum,
        })
    }

    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &TrackTask {
        let draw = rng.gen_range(0..self.total_weight);
        let index = self.cumulative_weights.partition_point(|&weight| weight <= draw);
        &self.tasks[index]
    }

    /// Selection probability of each task, in declaration order.
    pub fn probabilities(&self) -> Vec<(String, f64)> {
        self.tasks
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    f64::from(t.weight) / self.total_weight as f64,
                )
            })
            .collect()
    }
}

/// Which profiles the harness assigns to spawned users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMix {
    Standard,
    HighThroughput,

    /// Users alternate between the standard and high-throughput profiles
    Mixed,
}

impl ProfileMix {
    /// Profiles assigned round-robin by user index.
    pub fn profiles(&self) -> Vec<UserProfile> {
        match self {
            ProfileMix::Standard => vec![UserProfile::standard()],
            ProfileMix::HighThroughput => vec![UserProfile::high_throughput()],
            ProfileMix::Mixed => vec![UserProfile::standard(), UserProfile::high_throughput()],
        }
    }
}

impl FromStr for ProfileMix {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(ProfileMix::Standard),
            "high_throughput" => Ok(ProfileMix::HighThroughput),
            "mixed" => Ok(ProfileMix::Mixed),
            _ => Err(ProfileError::UnknownProfile(s.to_string())),
        }
    }
}

impl fmt::Display for ProfileMix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileMix::Standard => "standard",
            ProfileMix::HighThroughput => "high_throughput",
            ProfileMix::Mixed => "mixed",
        };
        f.write_str(name)
    }
}
