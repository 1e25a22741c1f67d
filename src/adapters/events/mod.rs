//! Event Adapters - Notification Delivery
//!
//! `EventHub` broadcasts to subscribers; `FanoutSink` forwards one event
//! to several sinks (hub plus metrics).

pub mod hub;

use std::sync::Arc;

use crate::ports::events::{EventSink, MarketEvent};

pub use hub::EventHub;

/// Forwards every event to each inner sink, in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: MarketEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}
