//! Outbound notification delivery
//!
//! Machines publish through [`EventSink::notify`] and never learn who
//! listens. [`BroadcastSink`] fans events out over a tokio broadcast channel;
//! embedders with their own bus implement the trait directly.

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::events::ProfileEvent;

/// Receiver of machine notifications
///
/// Called from inside a peer actor, so implementations must not block.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: ProfileEvent);
}

/// Fan-out sink over `tokio::sync::broadcast`
///
/// Slow subscribers lag and lose the oldest events; publishing never waits.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ProfileEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProfileEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl EventSink for BroadcastSink {
    fn notify(&self, event: ProfileEvent) {
        trace!("Publishing {:?}", event);
        if self.sender.send(event).is_err() {
            debug!("No subscribers for profile event");
        }
    }
}
