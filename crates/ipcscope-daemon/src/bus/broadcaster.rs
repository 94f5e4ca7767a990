//! Fan-out of envelopes to every attached viewer.
//!
//! Each subscriber owns a bounded queue drained by its transport. Publishing
//! never waits on a queue: a closed or full queue evicts that subscriber and
//! delivery to the others carries on.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use ipcscope_core::Envelope;
use ipcscope_core::config::BusConfig;

use super::types::{BusMessage, BusStats};

type Sinks = Arc<RwLock<HashMap<String, mpsc::Sender<BusMessage>>>>;

pub struct EventBus {
    subscribers: Sinks,
    config: BusConfig,
    evicted: AtomicU64,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            config,
            evicted: AtomicU64::new(0),
        }
    }

    /// Attach a new subscriber. Its first message is a `connected` envelope.
    pub async fn subscribe(&self) -> Subscription {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue.max(1));

        if let Some(message) = serialize(&Envelope::connected(id.clone())) {
            // Fresh queue with room for at least one message.
            let _ = tx.try_send(message);
        }
        let count = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(id.clone(), tx);
            subscribers.len()
        };
        info!(subscriber_id = %id, subscribers = count, "Subscriber attached");

        Subscription {
            id,
            rx,
            sinks: Arc::clone(&self.subscribers),
        }
    }

    /// Detach a subscriber. Unknown ids are ignored.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        if self.subscribers.write().await.remove(subscriber_id).is_some() {
            info!(subscriber_id, "Subscriber detached");
        }
    }

    /// Serialize `envelope` once and queue it for every subscriber.
    ///
    /// Returns the number of subscribers it was queued for.
    pub async fn publish(&self, envelope: &Envelope) -> usize {
        let Some(message) = serialize(envelope) else {
            return 0;
        };
        let delivered = self.deliver(&message).await;
        debug!(kind = envelope.kind(), delivered, "Envelope published");
        delivered
    }

    /// Queue a heartbeat for every subscriber, evicting dead ones.
    pub async fn heartbeat(&self) -> usize {
        self.deliver(&BusMessage::Heartbeat).await
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn stats(&self) -> BusStats {
        BusStats {
            subscribers: self.subscriber_count().await,
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    async fn deliver(&self, message: &BusMessage) -> usize {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|id, sink| match sink.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber_id = %id, "Subscriber queue full, evicting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscriber_id = %id, "Subscriber gone, evicting");
                false
            }
        });
        let delivered = subscribers.len();
        drop(subscribers);

        let evicted = (before - delivered) as u64;
        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
        }
        delivered
    }
}

fn serialize(envelope: &Envelope) -> Option<BusMessage> {
    match serde_json::to_string(envelope) {
        Ok(json) => Some(BusMessage::Envelope(Arc::from(json))),
        Err(e) => {
            error!(kind = envelope.kind(), error = %e, "Failed to serialize envelope");
            None
        }
    }
}

/// A live attachment to the bus. Dropping it detaches the subscriber.
pub struct Subscription {
    id: String,
    rx: mpsc::Receiver<BusMessage>,
    sinks: Sinks,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next queued message; `None` once the bus evicted this subscriber.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub(crate) fn close_for_test(&mut self) {
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let id = std::mem::take(&mut self.id);
        if let Ok(mut sinks) = self.sinks.try_write() {
            if sinks.remove(&id).is_some() {
                debug!(subscriber_id = %id, "Subscription dropped");
            }
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let sinks = Arc::clone(&self.sinks);
            handle.spawn(async move {
                sinks.write().await.remove(&id);
            });
        }
        // Otherwise the closed receiver gets the sink evicted on the next publish.
    }
}
