//! Tracing/logging initialization for the daemon binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"ipcscope_daemon=info"`).
/// * `log_json` -- emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = env_filter(default_filter);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Same as [`init_tracing`], plus an OTLP bridge when `metrics_endpoint` is set.
///
/// The returned guard must live as long as the process. A pipeline that fails
/// to build is logged and skipped; logging itself always comes up.
#[cfg(feature = "metrics")]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> Option<crate::metrics::MetricsGuard> {
    let (guard, failure) = match metrics_endpoint.map(crate::metrics::init_metrics) {
        Some(Ok(guard)) => (Some(guard), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };
    let otel = guard
        .as_ref()
        .map(|g| tracing_opentelemetry::layer().with_tracer(g.tracer()));

    let env_filter = env_filter(default_filter);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(otel)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(otel)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Some(e) = failure {
        tracing::warn!(error = %e, "OTLP pipeline disabled");
    } else if let Some(endpoint) = metrics_endpoint {
        tracing::info!(endpoint, "OTLP export enabled");
    }
    guard
}

/// Without the `metrics` feature there is no pipeline to hold.
#[cfg(not(feature = "metrics"))]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    _metrics_endpoint: Option<&str>,
) -> Option<std::convert::Infallible> {
    init_tracing(default_filter, log_json);
    None
}
