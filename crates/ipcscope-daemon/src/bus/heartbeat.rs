//! Periodic keepalive for idle event streams.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::broadcaster::EventBus;

/// Spawn a task that sends a heartbeat down every subscription each
/// `interval` until `shutdown` flips. A subscriber whose sink fails is evicted.
pub fn spawn_heartbeat_task(
    bus: Arc<EventBus>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let alive = bus.heartbeat().await;
                    debug!(subscribers = alive, "Heartbeat sent");
                }
                _ = shutdown.changed() => {
                    info!("Heartbeat task shutting down");
                    return;
                }
            }
        }
    })
}
