//! Load generator for the GPS telemetry ingestion API.
//!
//! Simulated devices authenticate against Keycloak with a password grant and
//! post batches of track points to `/api/track`, while the harness collects
//! latency and failure statistics for the final report.

pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod harness;
pub mod metrics;
pub mod profile;
pub mod report;
pub mod stats;
pub mod trackpoint;
pub mod user;
pub mod utils;
