// =============================================================================
// Trade Executor (C13)
// =============================================================================
//
// Owns the only code path that places, fills, and registers a position.
// A bounded worker pool (semaphore-gated, sized by
// `ExecutorConfig::worker_pool_size`) drains an `mpsc` intent queue; each
// intent gets a fresh C5/C6 preflight re-check immediately before placement
// (the checks that ran upstream in the pipeline may be stale by the time a
// smart-wait admits the intent), then a bounded exponential-backoff retry
// loop against the broker.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex as TokioMutex, Semaphore};
use tracing::{error, info, warn};

use crate::broker::{BrokerBridge, OrderRequest};
use crate::config::{ExecutorConfig, RuntimeConfig};
use crate::event_bus::{Event, EventBus};
use crate::margin_guard::MarginGuard;
use crate::market_data::QuoteCache;
use crate::position_engine::PositionRegistry;
use crate::signal_edit_watcher::SignalEditWatcher;
use crate::spread_gate::SpreadGate;
use crate::types::{IntentState, Position, SpreadDecision, TpLevel, TpStatus, TradeIntent};

const INTENT_QUEUE_CAPACITY: usize = 512;

/// Deterministic per-intent magic-number salt for stealth mode, derived
/// purely from the intent id so retries of the same intent reuse the same
/// salted magic number rather than re-salting on every attempt.
fn stealth_salt(intent_id: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    intent_id.hash(&mut hasher);
    hasher.finish() & 0xFFFF
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Filled { ticket: String },
    Failed { reason: String },
    Blocked { reason: String },
}

pub struct TradeExecutor {
    broker: Arc<dyn BrokerBridge>,
    registry: Arc<PositionRegistry>,
    margin_guard: Arc<MarginGuard>,
    spread_gate: Arc<SpreadGate>,
    quotes: Arc<QuoteCache>,
    events: Arc<EventBus>,
    edit_watcher: Arc<SignalEditWatcher>,
    config: Arc<RwLock<RuntimeConfig>>,
    semaphore: Arc<Semaphore>,
    intent_states: RwLock<HashMap<String, IntentState>>,
    ticket_locks: RwLock<HashMap<String, Arc<TokioMutex<()>>>>,
    sender: mpsc::Sender<TradeIntent>,
    receiver: TokioMutex<Option<mpsc::Receiver<TradeIntent>>>,
}

impl TradeExecutor {
    pub fn new(
        broker: Arc<dyn BrokerBridge>,
        registry: Arc<PositionRegistry>,
        margin_guard: Arc<MarginGuard>,
        spread_gate: Arc<SpreadGate>,
        quotes: Arc<QuoteCache>,
        events: Arc<EventBus>,
        edit_watcher: Arc<SignalEditWatcher>,
        config: Arc<RwLock<RuntimeConfig>>,
    ) -> Arc<Self> {
        let pool_size = config.read().executor.worker_pool_size.max(1);
        let (sender, receiver) = mpsc::channel(INTENT_QUEUE_CAPACITY);
        Arc::new(Self {
            broker,
            registry,
            margin_guard,
            spread_gate,
            quotes,
            events,
            edit_watcher,
            config,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            intent_states: RwLock::new(HashMap::new()),
            ticket_locks: RwLock::new(HashMap::new()),
            sender,
            receiver: TokioMutex::new(Some(receiver)),
        })
    }

    /// Enqueue one intent for execution. Idempotent per `intent_id`: a
    /// resubmit of an intent already in flight or settled is rejected.
    pub async fn submit(&self, intent: TradeIntent) -> bool {
        {
            let mut states = self.intent_states.write();
            if states.contains_key(&intent.intent_id) {
                warn!(intent_id = %intent.intent_id, "duplicate intent submission rejected");
                return false;
            }
            states.insert(intent.intent_id.clone(), IntentState::Pending);
        }
        self.events.publish(Event::IntentCreated {
            intent_id: intent.intent_id.clone(),
            symbol: intent.symbol.clone(),
        });
        if self.sender.send(intent).await.is_err() {
            error!("intent queue closed, executor has shut down");
            return false;
        }
        true
    }

    /// Submit a group of intents derived from one `SplitSignal` route action,
    /// pacing placements by `ExecutorConfig::range_split_pacing_ms` so they
    /// do not all hit the broker in the same instant.
    pub async fn submit_split(&self, intents: Vec<TradeIntent>) {
        let pacing_ms = self.config.read().executor.range_split_pacing_ms;
        for (i, intent) in intents.into_iter().enumerate() {
            if i > 0 && pacing_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(pacing_ms)).await;
            }
            self.submit(intent).await;
        }
    }

    pub fn intent_state(&self, intent_id: &str) -> Option<IntentState> {
        self.intent_states.read().get(intent_id).copied()
    }

    /// A mutex scoped to one broker ticket; callers that modify or close an
    /// existing position (the exit-monitor loops, C18) acquire this before
    /// calling the broker so two loops never race a modify/close against the
    /// same ticket.
    pub fn ticket_lock(&self, ticket: &str) -> Arc<TokioMutex<()>> {
        self.ticket_locks
            .write()
            .entry(ticket.to_string())
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }

    /// Drain the intent queue forever, running up to `worker_pool_size`
    /// intents concurrently. Intended to be spawned once at startup.
    pub async fn run(self: Arc<Self>) {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .expect("TradeExecutor::run must only be called once");

        while let Some(intent) = receiver.recv().await {
            let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let this = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                this.execute_intent(intent).await;
            });
        }
    }

    async fn execute_intent(&self, intent: TradeIntent) {
        self.intent_states.write().insert(intent.intent_id.clone(), IntentState::Executing);

        let outcome = self.try_execute(&intent).await;

        match &outcome {
            ExecutionOutcome::Filled { ticket } => {
                self.intent_states.write().insert(intent.intent_id.clone(), IntentState::Filled);
                self.events.publish(Event::OrderPlaced {
                    intent_id: intent.intent_id.clone(),
                    ticket: ticket.clone(),
                });
            }
            ExecutionOutcome::Failed { reason } => {
                self.intent_states.write().insert(intent.intent_id.clone(), IntentState::Failed);
                self.events.publish(Event::OrderFailed {
                    intent_id: intent.intent_id.clone(),
                    reason: reason.clone(),
                });
            }
            ExecutionOutcome::Blocked { reason } => {
                self.intent_states.write().insert(intent.intent_id.clone(), IntentState::Failed);
                self.events.publish(Event::OrderFailed {
                    intent_id: intent.intent_id.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }

    async fn try_execute(&self, intent: &TradeIntent) -> ExecutionOutcome {
        let symbol = crate::symbols::resolve(&intent.symbol);

        // Fresh C5 preflight: the spread may have widened since routing ran.
        let spread_cfg = self.config.read().spread.clone();
        match self.spread_gate.check(&symbol, &spread_cfg).await {
            SpreadDecision::Allow => {}
            SpreadDecision::Defer { delay_ms } => {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                if !matches!(self.spread_gate.check(&symbol, &spread_cfg).await, SpreadDecision::Allow) {
                    self.events.publish(Event::SpreadBlocked { symbol: symbol.clone(), current_pips: 0.0 });
                    return ExecutionOutcome::Blocked { reason: "spread still too wide after deferral".to_string() };
                }
            }
            SpreadDecision::BlockedHighSpread { current_pips, .. } => {
                self.events.publish(Event::SpreadBlocked { symbol: symbol.clone(), current_pips });
                return ExecutionOutcome::Blocked { reason: "spread too wide".to_string() };
            }
        }

        // Fresh C6 preflight: re-check margin immediately before placement.
        let risk_multiplier = Decimal::ONE;
        let pip_value = crate::symbols::pip_value(&symbol, "USD");
        match self.margin_guard.preflight(intent.direction, intent.volume, pip_value, risk_multiplier) {
            crate::types::MarginDecision::Allowed => {}
            other => {
                return ExecutionOutcome::Blocked { reason: format!("margin preflight blocked: {other:?}") };
            }
        }

        let cfg = self.config.read().executor.clone();
        self.place_with_retry(intent, &symbol, &cfg).await
    }

    async fn place_with_retry(&self, intent: &TradeIntent, symbol: &str, cfg: &ExecutorConfig) -> ExecutionOutcome {
        let stealth = self.config.read().stealth_mode;
        let mut attempt = 0u32;
        loop {
            // Stealth mode (toggled by C19's `/stealth`): drop the
            // identifying comment and salt the magic number per intent so
            // broker-side grouping by comment/magic can't fingerprint this
            // system's orders, on top of C11's volume jitter.
            let (magic, comment) = if stealth {
                (cfg.magic_number ^ stealth_salt(&intent.intent_id), String::new())
            } else {
                (cfg.magic_number, cfg.comment.clone())
            };
            let request = OrderRequest {
                symbol: symbol.to_string(),
                direction: intent.direction,
                is_limit: false,
                volume: intent.volume,
                price: None,
                sl: intent.sl,
                tp: intent.tp_plan.first().map(|(price, _)| *price),
                deviation_pips: cfg.max_slippage_pips,
                magic,
                comment,
            };

            match self.broker.place_order(request).await {
                Ok(response) => {
                    let Some(ticket) = response.ticket else {
                        return ExecutionOutcome::Failed {
                            reason: response.error.unwrap_or_else(|| "broker accepted order without a ticket".to_string()),
                        };
                    };
                    let fill_price = response.price.unwrap_or(intent.entry_target);
                    let fill_volume = response.volume.unwrap_or(intent.volume);
                    self.register_position(intent, &ticket, fill_price, fill_volume);
                    return ExecutionOutcome::Filled { ticket };
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > cfg.retry_attempts {
                        warn!(intent_id = %intent.intent_id, error = %e, attempt, "order placement exhausted retries");
                        return ExecutionOutcome::Failed { reason: e.to_string() };
                    }
                    let backoff_ms = 100u64 * 2u64.saturating_pow(attempt - 1);
                    warn!(intent_id = %intent.intent_id, error = %e, attempt, backoff_ms, "order placement failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }

    fn register_position(&self, intent: &TradeIntent, ticket: &str, fill_price: Decimal, fill_volume: Decimal) {
        let tp_plan_remaining: Vec<TpLevel> = intent
            .tp_plan
            .iter()
            .enumerate()
            .map(|(i, (price, percentage))| TpLevel {
                level_index: i as u32,
                price: *price,
                percentage: *percentage,
                status: TpStatus::Pending,
                closed_volume: Decimal::ZERO,
                close_price: None,
            })
            .collect();

        let position = Position {
            ticket: ticket.to_string(),
            intent_id: intent.intent_id.clone(),
            signal_id: intent.signal_id.clone(),
            message_id: intent.message_id.clone(),
            symbol: intent.symbol.clone(),
            direction: intent.direction,
            entry_price: fill_price,
            volume_at_intent: fill_volume,
            volume_remaining: fill_volume,
            sl: intent.sl,
            tp_plan_remaining,
            open_time: Utc::now(),
            state: crate::types::PositionState::Open,
            current_price: fill_price,
            highest_favorable_price: None,
            breakeven_locked: false,
            closed_volume_total: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            closed_at: None,
            close_reason: None,
        };

        self.registry.open(position);
        self.edit_watcher.register_fill(&intent.message_id, ticket, &intent.original_signal, Utc::now());
        self.events.publish(Event::PositionOpened {
            ticket: ticket.to_string(),
            symbol: intent.symbol.clone(),
        });
        info!(intent_id = %intent.intent_id, ticket, "intent filled and position registered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::sentinel::SentinelBroker;
    use crate::clock::SystemClock;
    use crate::config::RuntimeConfig;
    use rust_decimal_macros::dec;

    fn intent() -> TradeIntent {
        TradeIntent {
            intent_id: "i1".to_string(),
            signal_id: "s1".to_string(),
            message_id: "m1".to_string(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            entry_mode: crate::types::EntryMode::Best,
            entry_target: dec!(1.1000),
            volume: dec!(0.1),
            sl: Some(dec!(1.0950)),
            tp_plan: vec![(dec!(1.1050), dec!(100))],
            smart_wait_deadline: None,
            meta: crate::types::IntentMeta::default(),
            original_signal: crate::types::Signal {
                signal_id: "s1".to_string(),
                message_id: "m1".to_string(),
                provider_id: "p1".to_string(),
                timestamp: Utc::now(),
                symbol: "EURUSD".to_string(),
                direction: Direction::Buy,
                entries: vec![dec!(1.1000)],
                sl: Some(dec!(1.0950)),
                tps: vec![dec!(1.1050)],
                volume: Some(dec!(0.1)),
                confidence: 0.8,
                priority: crate::types::Priority::Medium,
                original_text: String::new(),
                split_index: None,
            },
        }
    }

    async fn build_executor() -> Arc<TradeExecutor> {
        let broker = Arc::new(SentinelBroker::new());
        broker.push_quote("EURUSD", dec!(1.0999), dec!(1.1001));
        let clock = Arc::new(SystemClock);
        let quotes = Arc::new(QuoteCache::new(broker.clone(), clock));
        let spread_gate = Arc::new(SpreadGate::new(quotes.clone()));
        let margin_guard = Arc::new(MarginGuard::new(crate::config::MarginConfig::default()));
        margin_guard.update(dec!(10000), dec!(10000), dec!(100), dec!(9900));
        let registry = Arc::new(PositionRegistry::new());
        let events = Arc::new(EventBus::new());
        let edit_watcher = Arc::new(SignalEditWatcher::new(Arc::new(crate::signal_parser::NullParser)));
        let config = Arc::new(RwLock::new(RuntimeConfig::default()));
        TradeExecutor::new(broker, registry, margin_guard, spread_gate, quotes, events, edit_watcher, config)
    }

    #[tokio::test]
    async fn submitted_intent_is_filled_and_registered() {
        let executor = build_executor().await;
        let registry = executor.registry.clone();
        let runner = tokio::spawn(executor.clone().run());
        assert!(executor.submit(intent()).await);

        // Give the worker pool a moment to drain the queue.
        for _ in 0..50 {
            if registry.open_count() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(registry.open_count(), 1);
        runner.abort();
    }

    #[tokio::test]
    async fn duplicate_intent_id_is_rejected() {
        let executor = build_executor().await;
        assert!(executor.submit(intent()).await);
        assert!(!executor.submit(intent()).await);
    }
}
