use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "slotbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "slotbook_http_request_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: commit attempts by terminal outcome. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "slotbook_bookings_total";

/// Counter: best-effort side effects that failed after commit. Labels: kind.
pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "slotbook_side_effect_failures_total";

// ── Collaborators ───────────────────────────────────────────────

/// Histogram: external calendar busy lookup duration in seconds.
pub const CALENDAR_FETCH_DURATION_SECONDS: &str = "slotbook_calendar_fetch_duration_seconds";

/// Histogram: booking log group-commit flush duration in seconds.
pub const STORE_FLUSH_DURATION_SECONDS: &str = "slotbook_store_flush_duration_seconds";

/// Histogram: booking log group-commit batch size (events per flush).
pub const STORE_FLUSH_BATCH_SIZE: &str = "slotbook_store_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging(json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("slotbook=info,info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
