//! Event Hub - Broadcast Fan-out of Market Events
//!
//! Wraps a tokio `broadcast` channel. Every subscriber (an SSE stream, a
//! websocket session, the rewards engine) gets its own receiver; slow
//! subscribers lag and lose the oldest events instead of blocking the
//! engine.

use tokio::sync::broadcast;
use tracing::trace;

use crate::ports::events::{EventSink, MarketEvent};

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// Broadcast hub implementing [`EventSink`].
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<MarketEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventSink for EventHub {
    fn emit(&self, event: MarketEvent) {
        // Err only means nobody is listening.
        if let Err(e) = self.tx.send(event) {
            trace!(event = e.0.kind(), "No subscribers, event dropped");
        }
    }
}

/// Subscriber-side filter: does `event` concern `user_id`?
///
/// Broadcast events reach everyone; addressed events only their user.
pub fn is_for(event: &MarketEvent, user_id: Option<&str>) -> bool {
    match event.recipient() {
        None => true,
        Some(recipient) => user_id == Some(recipient),
    }
}
