//! Configuration resolution for ipcscope.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/ipcscope/settings.json)
//! 3. Project config (.ipcscope/settings.json)
//! 4. Environment variables (`IPCSCOPE_*`)
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files may be partial. Layers are merged key by key before being
//! deserialized, so a project file setting one key keeps the global value of
//! every other key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete ipcscope configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub supervisor: SupervisorConfig,
    pub bus: BusConfig,
    pub mirror: MirrorConfig,
}

/// HTTP edge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Root of the demo tree; one sub-directory per category.
    pub backend_dir: PathBuf,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            backend_dir: PathBuf::from("backend"),
            log_level: "info".to_string(),
        }
    }
}

/// Process supervision configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Grace window between SIGTERM and a forced kill.
    pub terminate_timeout_ms: u64,
    /// How long to wait for output readers to drain after exit.
    pub drain_timeout_ms: u64,
    /// How long an exited record stays queryable.
    pub exit_retention_secs: u64,
    /// Output lines kept per process.
    pub output_log_lines: usize,
    /// Pending stdin commands per process.
    pub command_queue: usize,
    pub allow_duplicate_roles: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            terminate_timeout_ms: 3000,
            drain_timeout_ms: 500,
            exit_retention_secs: 30,
            output_log_lines: 500,
            command_queue: 32,
            allow_duplicate_roles: false,
        }
    }
}

impl SupervisorConfig {
    pub const fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub const fn exit_retention(&self) -> Duration {
        Duration::from_secs(self.exit_retention_secs)
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub heartbeat_interval_secs: u64,
    /// Messages buffered per subscriber before it is considered stuck.
    pub subscriber_queue: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            subscriber_queue: 256,
        }
    }
}

/// Shortest heartbeat period; a zero interval is not a valid timer.
const MIN_HEARTBEAT_SECS: u64 = 1;

impl BusConfig {
    pub const fn heartbeat_interval(&self) -> Duration {
        let secs = if self.heartbeat_interval_secs < MIN_HEARTBEAT_SECS {
            MIN_HEARTBEAT_SECS
        } else {
            self.heartbeat_interval_secs
        };
        Duration::from_secs(secs)
    }
}

/// Mirror tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Bytes added by a pipe write whose payload is unknown.
    pub pipe_default_unit: u64,
    /// Bytes removed by a pipe read.
    pub pipe_read_unit: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            pipe_default_unit: 10,
            pipe_read_unit: 10,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            layers.push(load_config_file(&global_path)?);
        }
    }

    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            layers.push(load_config_file(&project_path)?);
        }
    }

    let mut config = resolve_layers(layers)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Project settings file under `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".ipcscope").join("settings.json")
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        dirs::home_dir().map(|h| h.join(".ipcscope").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join("Library/Application Support/ipcscope/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .map(|p| p.join("ipcscope").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

/// Merge file layers over the defaults, lowest priority first.
fn resolve_layers(layers: Vec<Value>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;
    for layer in layers {
        merge_value(&mut merged, layer);
    }
    serde_json::from_value(merged).map_err(|e| Error::Config(format!("Invalid configuration: {e}")))
}

fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(addr) = var("IPCSCOPE_ADDR").and_then(|v| v.parse().ok()) {
        config.server.addr = addr;
    }
    if let Some(dir) = var("IPCSCOPE_BACKEND_DIR") {
        config.server.backend_dir = PathBuf::from(dir);
    }
    if let Some(level) = var("IPCSCOPE_LOG_LEVEL") {
        config.server.log_level = level;
    }
    if let Some(ms) = var("IPCSCOPE_TERMINATE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.supervisor.terminate_timeout_ms = ms;
    }
    if let Some(secs) = var("IPCSCOPE_EXIT_RETENTION_SECS").and_then(|v| v.parse().ok()) {
        config.supervisor.exit_retention_secs = secs;
    }
    if let Some(allow) = var("IPCSCOPE_ALLOW_DUPLICATE_ROLES").and_then(|v| parse_flag(&v)) {
        config.supervisor.allow_duplicate_roles = allow;
    }
    if let Some(secs) = var("IPCSCOPE_HEARTBEAT_SECS").and_then(|v| v.parse().ok()) {
        config.bus.heartbeat_interval_secs = secs;
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
