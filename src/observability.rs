use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "joyride_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "joyride_request_duration_seconds";

/// Counter: reservation attempts. Labels: outcome (confirmed, conflict, rejected, unavailable).
pub const RESERVATIONS_TOTAL: &str = "joyride_reservations_total";

/// Counter: bookings moved to CANCELLED.
pub const CANCELLATIONS_TOTAL: &str = "joyride_cancellations_total";

/// Counter: failed logins and rejected bearer tokens.
pub const AUTH_FAILURES_TOTAL: &str = "joyride_auth_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live bearer sessions.
pub const SESSIONS_ACTIVE: &str = "joyride_sessions_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "joyride_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "joyride_wal_flush_batch_size";

#[derive(Debug, thiserror::Error)]
#[error("failed to install Prometheus exporter: {0}")]
pub struct ExporterError(String);

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), ExporterError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ExporterError(e.to_string()))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
