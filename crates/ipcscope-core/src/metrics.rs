//! OTLP export of traces and metrics.
//!
//! Only compiled with the `metrics` Cargo feature. Spans from the daemon's
//! `tracing` instrumentation are exported to the configured collector; the
//! meter provider is installed globally but no instruments are registered.

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracerProvider, Tracer};

/// Service name reported to the collector.
pub const SERVICE_NAME: &str = "ipcscope";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the providers alive. Dropping it does not flush; call
/// [`MetricsGuard::shutdown`] before exiting.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    /// Tracer for the `tracing-opentelemetry` bridge layer.
    pub fn tracer(&self) -> Tracer {
        self.tracer_provider.tracer(SERVICE_NAME)
    }

    /// Flush and shut down both providers.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Build the OTLP pipeline for traces and metrics against `endpoint`
/// (gRPC, e.g. `http://localhost:4317`) and install both providers globally.
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let resource = Resource::builder().with_service_name(SERVICE_NAME).build();

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(trace_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}
