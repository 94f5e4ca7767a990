//! ipcscope Daemon
//!
//! Supervises the IPC demo programs and serves their combined activity as a
//! live event stream over HTTP/SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use ipcscope_core::config::{Config, load_config};
use ipcscope_daemon::bus::{EventBus, spawn_heartbeat_task};
use ipcscope_daemon::server::{AppState, build_router};
use ipcscope_daemon::supervisor::ProcessSupervisor;

#[derive(Parser, Debug)]
#[command(name = "ipcscope-daemon")]
#[command(version, about = "ipcscope daemon - IPC demo supervisor and event stream")]
struct Args {
    /// HTTP bind address (overrides config and IPCSCOPE_ADDR)
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Root of the demo program tree (overrides config and IPCSCOPE_BACKEND_DIR)
    #[arg(long)]
    backend_dir: Option<PathBuf>,

    /// Directory holding `.ipcscope/settings.json` (defaults to the current directory)
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Milliseconds to wait after SIGTERM before killing a demo process.
    #[arg(long)]
    terminate_timeout_ms: Option<u64>,

    /// Allow more than one live process per role.
    #[arg(long)]
    allow_duplicate_roles: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "IPCSCOPE_LOG_JSON")]
    log_json: bool,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "IPCSCOPE_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

impl Args {
    /// Command-line values win over every config layer.
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.server.addr = addr;
        }
        if let Some(dir) = &self.backend_dir {
            config.server.backend_dir.clone_from(dir);
        }
        if let Some(level) = &self.log_level {
            config.server.log_level.clone_from(level);
        }
        if let Some(ms) = self.terminate_timeout_ms {
            config.supervisor.terminate_timeout_ms = ms;
        }
        if self.allow_duplicate_roles {
            config.supervisor.allow_duplicate_roles = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let project_dir = match &args.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut config = load_config(Some(&project_dir))?;
    args.apply(&mut config);

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    // Hold the guard so the OTel pipeline stays alive for the process lifetime.
    let log_filter = format!("ipcscope_daemon={}", config.server.log_level);
    let metrics_guard = ipcscope_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        args.log_json,
        metrics_endpoint,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        backend_dir = %config.server.backend_dir.display(),
        "Starting ipcscope-daemon"
    );
    if !config.server.backend_dir.is_dir() {
        warn!(
            backend_dir = %config.server.backend_dir.display(),
            "Backend directory missing; build the demo programs first"
        );
    }

    let bus = Arc::new(EventBus::new(config.bus.clone()));
    let supervisor = ProcessSupervisor::new(
        config.server.backend_dir.clone(),
        config.supervisor.clone(),
        config.mirror,
        Arc::clone(&bus),
    );

    // Daemon-level shutdown channel, observed by the heartbeat task.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let heartbeat_handle =
        spawn_heartbeat_task(Arc::clone(&bus), config.bus.heartbeat_interval(), shutdown_rx);

    let app = build_router(AppState {
        supervisor: supervisor.clone(),
    });
    let listener = tokio::net::TcpListener::bind(config.server.addr).await?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // The `true` parameter unsets $NOTIFY_SOCKET so demo processes don't
    // notify systemd themselves.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!(addr = %config.server.addr, "HTTP server ready");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    supervisor.shutdown().await;
    if let Err(e) = heartbeat_handle.await {
        warn!(error = %e, "Heartbeat task failed");
    }

    #[cfg(feature = "metrics")]
    if let Some(guard) = metrics_guard {
        if let Err(e) = guard.shutdown() {
            warn!(error = %e, "Failed to flush telemetry");
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = metrics_guard;

    info!("Daemon stopped");
    Ok(())
}
