// src/observability/mod.rs
//! Observability: tracing subscriber and Prometheus metrics
//!
//! The library only emits through the `tracing` and `metrics` facades. The
//! daemon installs the subscriber and exporter at boot; without them every
//! macro is a no-op.

use crate::utils::config::{LogFormat, LoggingConfig, MetricsConfig};
use crate::utils::errors::{OrchestratorError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Metric names
pub mod metric_names {
    pub const TASKS_ENQUEUED: &str = "orchestrator_tasks_enqueued_total";
    pub const TASKS_STARTED: &str = "orchestrator_tasks_started_total";
    pub const TASKS_COMPLETED: &str = "orchestrator_tasks_completed_total";
    pub const TASKS_FAILED: &str = "orchestrator_tasks_failed_total";
    pub const TASKS_CANCELLED: &str = "orchestrator_tasks_cancelled_total";
    pub const TASKS_RETRIED: &str = "orchestrator_tasks_retried_total";

    /// Gauge: agents currently registered
    pub const AGENTS_ACTIVE: &str = "orchestrator_agents_active";
    pub const HEARTBEAT_TIMEOUTS: &str = "orchestrator_heartbeat_timeouts_total";
    pub const TOOL_CALLS: &str = "orchestrator_tool_calls_total";
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is an
/// error from the subscriber registry.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| OrchestratorError::Config(format!("Invalid log level {}: {}", config.level, e)))?;

    let base = fmt::layer().with_target(true);
    let layer = match config.format {
        LogFormat::Json => base.json().boxed(),
        LogFormat::Text => base.boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| OrchestratorError::Config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Start the Prometheus scrape endpoint when enabled
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| OrchestratorError::Config(format!("Invalid metrics address {}: {}", config.listen, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| OrchestratorError::Config(format!("Failed to install metrics exporter: {}", e)))?;

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}
