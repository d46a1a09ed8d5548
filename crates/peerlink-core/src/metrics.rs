//! Shared `OpenTelemetry` metrics initialisation.
//!
//! This module is only compiled when the `metrics` Cargo feature is enabled.
//! It sets up the OTLP exporter for both traces and metrics, sending
//! telemetry to a configurable endpoint (e.g. an `OpenTelemetry` Collector),
//! and exposes [`PeerMetrics`] for recording reconciliation passes.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Errors that can occur during metrics / tracing pipeline initialisation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to build an OTLP exporter.
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    /// Failed during `OTel` SDK shutdown or flush.
    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Opaque handle that keeps the `OpenTelemetry` providers alive.
///
/// When dropped, the providers are **not** shut down automatically -- call
/// [`MetricsGuard::shutdown`] for a graceful flush before exiting.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    /// Tracer provider backing the `tracing-opentelemetry` layer.
    pub const fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// Gracefully shut down both providers, flushing any buffered telemetry.
    ///
    /// # Errors
    ///
    /// Returns an error if either provider fails to shut down cleanly.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Initialise the `OpenTelemetry` OTLP pipeline for traces **and** metrics.
///
/// * `endpoint` -- OTLP receiver URL, e.g. `"http://localhost:4317"` (gRPC).
///
/// # Errors
///
/// Returns [`MetricsError`] if the OTLP exporters cannot be constructed.
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    // --- Traces ---
    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter)
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    // --- Metrics ---
    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();

    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassCounts {
    pub added: u64,
    pub add_failures: u64,
    pub removed: u64,
    pub remove_failures: u64,
    pub skipped: u64,
    pub registered: u64,
}

/// Instruments for reconciliation passes, bound to the global meter.
#[derive(Clone)]
pub struct PeerMetrics {
    passes: Counter<u64>,
    added: Counter<u64>,
    add_failures: Counter<u64>,
    removed: Counter<u64>,
    remove_failures: Counter<u64>,
    skipped: Counter<u64>,
    registered: Gauge<u64>,
}

impl PeerMetrics {
    pub fn new() -> Self {
        let meter = global::meter("peerlink");
        Self {
            passes: meter
                .u64_counter("peerlink.reconcile.passes")
                .with_description("Completed reconciliation passes")
                .build(),
            added: meter
                .u64_counter("peerlink.peers.added")
                .with_description("Peers connected")
                .build(),
            add_failures: meter
                .u64_counter("peerlink.peers.add_failures")
                .with_description("Peer connect attempts that failed")
                .build(),
            removed: meter
                .u64_counter("peerlink.peers.removed")
                .with_description("Peers disconnected")
                .build(),
            remove_failures: meter
                .u64_counter("peerlink.peers.remove_failures")
                .with_description("Peer teardowns that reported an error")
                .build(),
            skipped: meter
                .u64_counter("peerlink.addresses.skipped")
                .with_description("Membership addresses that were not IP literals")
                .build(),
            registered: meter
                .u64_gauge("peerlink.peers.registered")
                .with_description("Peers currently registered")
                .build(),
        }
    }

    /// Record the outcome of one pass.
    pub fn record_pass(&self, counts: PassCounts) {
        self.passes.add(1, &[]);
        self.added.add(counts.added, &[]);
        self.add_failures.add(counts.add_failures, &[]);
        self.removed.add(counts.removed, &[]);
        self.remove_failures.add(counts.remove_failures, &[]);
        self.skipped.add(counts.skipped, &[]);
        self.registered.record(counts.registered, &[]);
    }
}

impl Default for PeerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
