//! Event bus: fan-out of envelopes to attached viewers.

mod broadcaster;
pub mod heartbeat;
mod types;

pub use broadcaster::{EventBus, Subscription};
pub use heartbeat::spawn_heartbeat_task;
pub use types::{BusMessage, BusStats};
