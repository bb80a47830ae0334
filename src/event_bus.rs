// =============================================================================
// Event Bus (C21)
// =============================================================================
//
// Single-process pub/sub fabric over `tokio::sync::broadcast`, so the WS push
// loop (`api/ws.rs`) and any future notification sink can observe state
// transitions without the engines that cause them (C8-C18) knowing about
// their consumers.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::MarginStatus;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    SignalIngested { signal_id: String, symbol: String },
    SignalMerged { merged_signal_id: String, source_ids: Vec<String> },
    SignalBlocked { signal_id: String, reason: String },
    IntentCreated { intent_id: String, symbol: String },
    OrderPlaced { intent_id: String, ticket: String },
    OrderFailed { intent_id: String, reason: String },
    PositionOpened { ticket: String, symbol: String },
    TpHit { ticket: String, level_index: u32, close_volume: Decimal },
    SlMoved { ticket: String, new_sl: Decimal },
    PositionClosed { ticket: String, reason: String, realized_pnl: Decimal },
    MarginAlert { status: MarginStatus, margin_level: Decimal },
    SpreadBlocked { symbol: String, current_pips: f64 },
}

/// Thin seam for future delivery channels (Telegram, email, webhook); no
/// concrete implementation ships here — notification transport is out of
/// scope, only the subscriber contract is.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Broadcasts every published event to all live subscribers; lagging
/// subscribers silently miss old events rather than block publishers, which
/// matches the WS push loop's own "always serve the latest" contract.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        trace!(?event, "event published");
        // No receivers is a normal state (e.g. no WS client connected yet).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::SignalIngested {
            signal_id: "s1".to_string(),
            symbol: "EURUSD".to_string(),
        });
        let received = rx.recv().await.expect("event delivered");
        assert!(matches!(received, Event::SignalIngested { .. }));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::SignalBlocked {
            signal_id: "s1".to_string(),
            reason: "test".to_string(),
        });
    }
}
