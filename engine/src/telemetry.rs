// Structured logging and Prometheus metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured JSON logging.
///
/// Log levels come from `RUST_LOG` when set, falling back to the configured
/// level. Fails only when the filter is invalid or a subscriber is already
/// installed.
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, "Structured logging initialized");
    Ok(())
}

/// Install the Prometheus metrics exporter and register the engine's metrics.
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "trigger_success_total",
        "Total number of successful trigger executions"
    );
    describe_counter!(
        "trigger_failed_total",
        "Total number of failed trigger executions"
    );
    describe_counter!(
        "trigger_claim_conflicts_total",
        "Total number of claims lost to a competing instance"
    );
    describe_histogram!(
        "trigger_duration_seconds",
        "Duration of trigger handler executions in seconds"
    );

    tracing::info!(metrics_port = metrics_port, "Prometheus metrics exporter initialized");
    Ok(())
}

#[inline]
pub fn record_trigger_success(handler: &str) {
    counter!("trigger_success_total", "handler" => handler.to_string()).increment(1);
}

#[inline]
pub fn record_trigger_failure(handler: &str) {
    counter!("trigger_failed_total", "handler" => handler.to_string()).increment(1);
}

#[inline]
pub fn record_claim_conflict(handler: &str) {
    counter!("trigger_claim_conflicts_total", "handler" => handler.to_string()).increment(1);
}

#[inline]
pub fn record_trigger_duration(handler: &str, duration_seconds: f64) {
    histogram!("trigger_duration_seconds", "handler" => handler.to_string())
        .record(duration_seconds);
}
