use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};
use std::env;
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "track_loadtest".to_string());

    // === Tracked Request Metrics ===

    pub static ref TRACK_REQUESTS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("track_requests_total", "Total number of /api/track submissions")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["task"]
        ).unwrap();

    pub static ref TRACK_FAILURES_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("track_failures_total", "Failed /api/track submissions by category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["task", "category"]
        ).unwrap();

    pub static ref TRACK_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("track_status_codes_total", "Number of /api/track responses by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref TRACK_REQUEST_DURATION_SECONDS: HistogramVec =
        HistogramVec::new(
            HistogramOpts::new(
                "track_request_duration_seconds",
                "/api/track request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str()),
            &["task"]
        ).unwrap();

    pub static ref TRACK_POINTS_SENT_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("track_points_sent_total", "Track points carried by all submissions")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === User Metrics ===

    pub static ref ACTIVE_USERS: IntGauge =
        IntGauge::with_opts(
            Opts::new("active_users", "Number of simulated users currently running")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref TOKEN_REQUESTS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("token_requests_total", "Password-grant token requests by outcome")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["outcome"]  // ok, rejected, invalid, error
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();

    registry.register(Box::new(TRACK_REQUESTS_TOTAL.clone()))?;
    registry.register(Box::new(TRACK_FAILURES_TOTAL.clone()))?;
    registry.register(Box::new(TRACK_STATUS_CODES.clone()))?;
    registry.register(Box::new(TRACK_REQUEST_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(TRACK_POINTS_SENT_TOTAL.clone()))?;

    registry.register(Box::new(ACTIVE_USERS.clone()))?;
    registry.register(Box::new(TOKEN_REQUESTS_TOTAL.clone()))?;

    Ok(())
}

/// Encodes the default registry in the Prometheus text format.
pub fn gather_metrics_string() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# ERROR ENCODING METRICS");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!(error = %e, "Metrics output is not valid UTF-8");
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(_req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let encoder = TextEncoder::new();
    let body = gather_metrics_string();

    let mut response = Response::new(Body::from(body));
    if let Ok(content_type) = encoder.format_type().parse::<hyper::header::HeaderValue>() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, hyper::Error>(service_fn(metrics_handler))
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Metrics server failed to bind");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_without_registration() {
        let before = TRACK_REQUESTS_TOTAL.with_label_values(&["unit_counter"]).get();
        TRACK_REQUESTS_TOTAL.with_label_values(&["unit_counter"]).inc();
        assert_eq!(
            TRACK_REQUESTS_TOTAL.with_label_values(&["unit_counter"]).get(),
            before + 1
        );
    }

    #[tokio::test]
    async fn handler_serves_text_format() {
        let response = metrics_handler(Request::new(Body::empty())).await.unwrap();
        assert_eq!(response.status(), 200);
        let content_type = response
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
