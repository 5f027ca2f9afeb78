use mimalloc::MiMalloc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use track_loadtest::client::build_client;
use track_loadtest::config::Config;
use track_loadtest::harness::Harness;
use track_loadtest::metrics::{register_metrics, start_metrics_server};
use track_loadtest::report::{log_breakdown, print_final_results};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!(
        "  TARGET_URL              - Telemetry API base URL (must start with http:// or https://)"
    );
    eprintln!("  KEYCLOAK_USERNAME       - Test user for the password grant");
    eprintln!("  KEYCLOAK_PASSWORD       - Test user's password");
    eprintln!();
    eprintln!("Identity provider:");
    eprintln!("  KEYCLOAK_URL            - Keycloak URL (default: https://localhost:8443)");
    eprintln!("  KEYCLOAK_REALM          - Realm name (default: myrealm)");
    eprintln!("  KEYCLOAK_CLIENT         - Client ID (default: myclient)");
    eprintln!();
    eprintln!("Load shape:");
    eprintln!("  NUM_USERS               - Simulated devices (default: 10, must be > 0)");
    eprintln!("  SPAWN_RATE              - Users started per second (default: 10)");
    eprintln!("  TEST_DURATION           - Run time: 500ms, 60s, 10m, 2h (default: 60s)");
    eprintln!("  MAX_ITERATIONS          - Stop each user after this many tasks (optional)");
    eprintln!("  USER_PROFILE            - standard, high_throughput, or mixed (default: mixed)");
    eprintln!();
    eprintln!("Client and output:");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: true)");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout (default: 30s)");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port (optional)");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: track_loadtest)");
    eprintln!("  LOG_FORMAT              - text or json (default: text)");
    eprintln!("  RUST_LOG                - Log filter (default: info)");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C; run will stop on duration only");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    // Load configuration from environment variables
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };
    config.log_summary();

    if let Some(port) = config.metrics_port {
        register_metrics()?;
        tokio::spawn(start_metrics_server(port));
    }

    let client = build_client(&config.to_client_config())?;

    let mut harness = Harness::new(client, config.keycloak.clone(), config.to_harness_config());
    harness.on_quitting(print_final_results);
    harness.on_quitting(log_breakdown);

    let snapshot = harness.run(wait_for_ctrl_c()).await;

    if snapshot.failures > 0 || (snapshot.requests == 0 && snapshot.user_startup_failures > 0) {
        info!(
            failures = snapshot.failures,
            user_startup_failures = snapshot.user_startup_failures,
            "Run had failures, exiting with status 1"
        );
        std::process::exit(1);
    }

    Ok(())
}
