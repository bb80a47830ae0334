// =============================================================================
// Smart Entry Scheduler (C12)
// =============================================================================
//
// Bounded waiter set that polls a symbol's quote for favorability before
// handing an intent off to C13.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::SmartEntryConfig;
use crate::market_data::QuoteCache;
use crate::spread_gate::SpreadGate;
use crate::symbols::pip_size;
use crate::types::{Direction, SpreadDecision, TradeIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Waiting,
    Executed,
    Timeout,
    Cancelled,
}

struct Waiter {
    intent: TradeIntent,
    deadline: DateTime<Utc>,
}

pub enum PollOutcome {
    HandOff(TradeIntent),
    TimedOutFallbackImmediate(TradeIntent),
    TimedOutCancelled(String),
}

pub struct SmartEntryScheduler {
    quotes: Arc<QuoteCache>,
    spread_gate: Arc<SpreadGate>,
    clock: Arc<dyn Clock>,
    waiters: RwLock<HashMap<String, Waiter>>,
}

impl SmartEntryScheduler {
    pub fn new(quotes: Arc<QuoteCache>, spread_gate: Arc<SpreadGate>, clock: Arc<dyn Clock>) -> Self {
        Self {
            quotes,
            spread_gate,
            clock,
            waiters: RwLock::new(HashMap::new()),
        }
    }

    /// Admit an intent into the active waiter set. Returns `false` if the
    /// bounded concurrent-waiter cap is already reached.
    pub fn admit(&self, intent: TradeIntent, cfg: &SmartEntryConfig) -> bool {
        let mut waiters = self.waiters.write();
        if waiters.len() >= cfg.max_concurrent_entries {
            warn!(intent_id = %intent.intent_id, "smart entry waiter set at capacity, rejecting");
            return false;
        }
        let wait_seconds = intent
            .smart_wait_deadline
            .map(|_| cfg.default_wait_seconds)
            .unwrap_or(cfg.default_wait_seconds);
        let deadline = self.clock.now() + chrono::Duration::seconds(wait_seconds as i64);
        info!(intent_id = %intent.intent_id, deadline = %deadline, "smart entry admitted");
        waiters.insert(
            intent.intent_id.clone(),
            Waiter { intent, deadline },
        );
        true
    }

    pub fn cancel(&self, intent_id: &str) -> bool {
        self.waiters.write().remove(intent_id).is_some()
    }

    fn favorable(direction: Direction, target: Decimal, tolerance_pips: Decimal, ask: Decimal, bid: Decimal) -> bool {
        match direction {
            Direction::Buy => ask <= target + tolerance_pips,
            Direction::Sell => bid >= target - tolerance_pips,
        }
    }

    /// Poll every active waiter once; should be driven by the scheduler
    /// (C21) at `poll_interval_ms`. Returns one outcome per waiter that
    /// transitioned out of `WAITING` this tick.
    pub async fn poll_once(&self, cfg: &SmartEntryConfig) -> Vec<PollOutcome> {
        let ids: Vec<String> = self.waiters.read().keys().cloned().collect();
        let now = self.clock.now();
        let mut outcomes = Vec::new();

        for id in ids {
            let (intent, deadline) = {
                let waiters = self.waiters.read();
                match waiters.get(&id) {
                    Some(w) => (w.intent.clone(), w.deadline),
                    None => continue,
                }
            };

            let quote = match self.quotes.quote(&intent.symbol).await {
                Ok(q) => q,
                Err(_) => continue,
            };
            let pip = pip_size(&intent.symbol);
            let tolerance = Decimal::try_from(cfg.price_tolerance_pips).unwrap_or(Decimal::ZERO) * pip;

            let favorable = Self::favorable(intent.direction, intent.entry_target, tolerance, quote.ask, quote.bid);
            let spread_cfg = crate::config::SpreadConfig::default();
            let spread_ok = matches!(
                self.spread_gate.check(&intent.symbol, &spread_cfg).await,
                SpreadDecision::Allow
            );

            if favorable && spread_ok {
                self.waiters.write().remove(&id);
                info!(intent_id = %id, "smart entry favorable, handing off");
                outcomes.push(PollOutcome::HandOff(intent));
                continue;
            }

            if now >= deadline {
                self.waiters.write().remove(&id);
                if cfg.fallback_to_immediate {
                    info!(intent_id = %id, "smart entry deadline reached, falling back to immediate");
                    outcomes.push(PollOutcome::TimedOutFallbackImmediate(intent));
                } else {
                    info!(intent_id = %id, "smart entry deadline reached, cancelling");
                    outcomes.push(PollOutcome::TimedOutCancelled(id));
                }
            }
        }

        outcomes
    }

    pub fn active_count(&self) -> usize {
        self.waiters.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_is_favorable_when_ask_within_tolerance() {
        assert!(SmartEntryScheduler::favorable(
            Direction::Buy,
            dec!(1.1000),
            dec!(0.0002),
            dec!(1.1001),
            dec!(1.0999)
        ));
        assert!(!SmartEntryScheduler::favorable(
            Direction::Buy,
            dec!(1.1000),
            dec!(0.0002),
            dec!(1.1010),
            dec!(1.1008)
        ));
    }

    #[test]
    fn sell_is_favorable_when_bid_within_tolerance() {
        assert!(SmartEntryScheduler::favorable(
            Direction::Sell,
            dec!(1.1000),
            dec!(0.0002),
            dec!(1.1001),
            dec!(1.0999)
        ));
    }
}
