//! `ipcscope` Core Library
//!
//! Shared functionality for the `ipcscope` daemon:
//! - Line framing and record decoding for IPC-demo program output
//! - Mechanism state mirror and the reconciler that maintains it
//! - Outward event envelopes
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod category;
pub mod config;
pub mod decode;
pub mod envelope;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod mirror;
pub mod tracing_init;

pub use category::{Category, Role};
pub use config::Config;
pub use envelope::{Envelope, ProcessId, Source};
pub use error::{Error, Result};
pub use mirror::{MechanismMirror, StateReconciler};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
