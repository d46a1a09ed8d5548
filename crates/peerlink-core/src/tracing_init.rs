//! Shared tracing/logging initialization.
//!
//! The `peerlink` binary sets up `tracing_subscriber` with an env-filter and
//! optional JSON output, plus an `OpenTelemetry` layer when the `metrics`
//! feature is enabled and an endpoint is configured.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"peerlink_peers=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialise tracing and, when `metrics_endpoint` is set, the OTLP pipeline.
///
/// Falls back to plain [`init_tracing`] if the exporters cannot be built; the
/// failure is logged once the subscriber is installed.
#[cfg(feature = "metrics")]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> Option<crate::metrics::MetricsGuard> {
    use opentelemetry::trace::TracerProvider as _;

    let Some(endpoint) = metrics_endpoint else {
        init_tracing(default_filter, log_json);
        return None;
    };

    match crate::metrics::init_metrics(endpoint) {
        Ok(guard) => {
            let otel_layer =
                tracing_opentelemetry::layer().with_tracer(guard.tracer_provider().tracer("peerlink"));
            if log_json {
                tracing_subscriber::registry()
                    .with(env_filter(default_filter))
                    .with(tracing_subscriber::fmt::layer().json())
                    .with(otel_layer)
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(env_filter(default_filter))
                    .with(tracing_subscriber::fmt::layer())
                    .with(otel_layer)
                    .init();
            }
            Some(guard)
        }
        Err(e) => {
            init_tracing(default_filter, log_json);
            tracing::warn!(error = %e, endpoint, "Metrics pipeline disabled");
            None
        }
    }
}

/// Without the `metrics` feature the endpoint is ignored.
#[cfg(not(feature = "metrics"))]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    _metrics_endpoint: Option<&str>,
) -> Option<()> {
    init_tracing(default_filter, log_json);
    None
}
