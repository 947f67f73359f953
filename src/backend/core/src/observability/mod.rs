//! Observability: structured logging, optional OTLP tracing, Prometheus metrics.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Histogram buckets for job durations, in seconds.
const JOB_DURATION_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 1.0, 2.5, 10.0, 30.0, 120.0];

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over `log_level` when set.
pub fn init_tracing(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let telemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config().with_resource(opentelemetry_sdk::Resource::new(vec![
                        opentelemetry::KeyValue::new("service.name", service_name.to_string()),
                    ])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let json = config.json_logging;
    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().pretty()))
        .try_init()?;

    Ok(())
}

/// Shutdown OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Handle on the installed Prometheus recorder.
#[derive(Clone, Default)]
pub struct Metrics {
    handle: Option<PrometheusHandle>,
}

impl Metrics {
    /// A handle that renders nothing; metric macros become no-ops.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn prometheus_builder() -> anyhow::Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new().set_buckets_for_metric(
        metrics_exporter_prometheus::Matcher::Full("taskq_job_duration_seconds".to_string()),
        JOB_DURATION_BUCKETS,
    )?)
}

/// Install the global Prometheus recorder; the caller renders it.
pub fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<Metrics> {
    if !config.metrics_enabled {
        return Ok(Metrics::disabled());
    }

    let handle = prometheus_builder()?.install_recorder()?;

    register_metric_descriptions();
    tracing::info!("Metrics initialized");

    Ok(Metrics {
        handle: Some(handle),
    })
}

/// Install the global Prometheus recorder behind its own scrape listener.
///
/// For processes without an HTTP server of their own. Must run inside a
/// Tokio runtime. Returns `false` when metrics are disabled.
pub fn serve_metrics(config: &ObservabilityConfig, listen: SocketAddr) -> anyhow::Result<bool> {
    if !config.metrics_enabled {
        return Ok(false);
    }

    prometheus_builder()?.with_http_listener(listen).install()?;

    register_metric_descriptions();
    tracing::info!(%listen, "Metrics listener started");
    Ok(true)
}

fn register_metric_descriptions() {
    describe_counter!("taskq_jobs_submitted_total", "Jobs accepted by the gateway");
    describe_counter!("taskq_jobs_finished_total", "Jobs that reached a terminal state, by status");
    describe_counter!("taskq_jobs_skipped_total", "Envelopes dropped without running, by reason");
    describe_counter!("taskq_outbox_relayed_total", "Envelopes moved from the outbox to the queue");
    describe_counter!("taskq_dead_lettered_total", "Envelopes parked on the dead-letter list");
    describe_counter!("taskq_worker_retries_total", "Worker reconnect attempts, by dependency");
    describe_counter!("taskq_errors_total", "Errors by code");
    describe_histogram!("taskq_job_duration_seconds", "Handler execution time in seconds");
}
