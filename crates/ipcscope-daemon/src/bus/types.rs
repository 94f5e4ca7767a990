//! Event bus types.

use std::sync::Arc;

use serde::Serialize;

/// One item queued for a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// A serialized envelope, shared by every subscriber it was published to.
    Envelope(Arc<str>),
    /// Keepalive with no payload.
    Heartbeat,
}

/// Event bus statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStats {
    pub subscribers: usize,
    /// Subscribers dropped because their sink failed.
    pub evicted: u64,
}
