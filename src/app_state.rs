// =============================================================================
// Central Application State
// =============================================================================
//
// The single source of truth for the entire engine. All subsystems hold Arc
// references to their own state; AppState ties them together and provides a
// unified snapshot for the dashboard API and WebSocket feed.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - Arc wrappers for subsystem engines that manage their own interior
//     mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::broker::BrokerBridge;
use crate::clock::{Clock, SystemClock};
use crate::command_interpreter::CommandHistory;
use crate::config::RuntimeConfig;
use crate::event_bus::EventBus;
use crate::exit::tp_sl_adjustor::TpSlAdjustor;
use crate::execution::TradeExecutor;
use crate::lot_randomizer::LotRandomizer;
use crate::margin_guard::MarginGuard;
use crate::market_data::QuoteCache;
use crate::multi_signal::MultiSignalHandler;
use crate::position_engine::PositionRegistry;
use crate::rate_limiter::RateLimiter;
use crate::reverse_strategy::ReverseStrategy;
use crate::router::ConditionRouter;
use crate::scheduler::Scheduler;
use crate::signal_edit_watcher::SignalEditWatcher;
use crate::signal_parser::NullParser;
use crate::smart_entry::SmartEntryScheduler;
use crate::types::{MarginSnapshot, Position};
use crate::volatility::{StaticVolatilityModel, VolatilityModel};

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: String,
}

const MAX_RECENT_ERRORS: usize = 50;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    pub state_version: AtomicU64,
    pub ws_sequence_number: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Time / broker collaborators ─────────────────────────────────────
    pub clock: Arc<dyn Clock>,
    pub broker: Arc<dyn BrokerBridge>,
    pub quotes: Arc<QuoteCache>,

    // ── Policy stack (C5-C12) ───────────────────────────────────────────
    pub rate_limiter: Arc<RateLimiter>,
    pub margin_guard: Arc<MarginGuard>,
    pub spread_gate: Arc<crate::spread_gate::SpreadGate>,
    pub multi_signal: Arc<MultiSignalHandler>,
    pub reverse_strategy: Arc<RwLock<ReverseStrategy>>,
    pub router: Arc<RwLock<ConditionRouter>>,
    pub lot_randomizer: Arc<LotRandomizer>,
    pub smart_entry: Arc<SmartEntryScheduler>,
    pub volatility: Arc<dyn VolatilityModel>,

    // ── Execution & position state (C13-C18) ────────────────────────────
    pub executor: Arc<TradeExecutor>,
    pub registry: Arc<PositionRegistry>,
    pub tp_sl_adjustor: Arc<TpSlAdjustor>,
    pub edit_watcher: Arc<SignalEditWatcher>,

    // ── Command surface (C19) ───────────────────────────────────────────
    pub command_history: Arc<CommandHistory>,

    // ── Event fabric (C21) ──────────────────────────────────────────────
    pub events: Arc<EventBus>,
    pub scheduler: Arc<Scheduler>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Operational Status ──────────────────────────────────────────────
    pub no_go_reason: RwLock<Option<String>>,
    pub ws_user_connected: RwLock<bool>,
    pub last_ws_user_event: RwLock<std::time::Instant>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState`. The broker is supplied by the caller
    /// (`main.rs`) since its concrete type depends on `config.account_mode`
    /// and, for the live adapter, on credentials read from the environment.
    pub fn new(config: RuntimeConfig, broker: Arc<dyn BrokerBridge>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let quotes = Arc::new(QuoteCache::new(broker.clone(), clock.clone()));
        let spread_gate = Arc::new(crate::spread_gate::SpreadGate::new(quotes.clone()));

        // Per-engine on-disk history (§6 "Persisted state layout"); off by
        // default. When enabled, each concern gets its own JSON document
        // under `persistence.state_dir`, written atomically on mutation.
        let state_dir = if config.persistence.enabled {
            let dir = std::path::PathBuf::from(&config.persistence.state_dir);
            if let Err(e) = std::fs::create_dir_all(&dir) {
                tracing::warn!(error = %e, dir = %dir.display(), "failed to create persistence state dir, falling back to in-memory state");
                None
            } else {
                Some(dir)
            }
        } else {
            None
        };

        let margin_guard = Arc::new(match &state_dir {
            Some(dir) => MarginGuard::new_with_persistence(config.margin.clone(), dir.join("margin_guard.json")),
            None => MarginGuard::new(config.margin.clone()),
        });
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(match &state_dir {
            Some(dir) => PositionRegistry::new_with_persistence(dir.join("positions.json")),
            None => PositionRegistry::new(),
        });

        let scheduler = Arc::new(Scheduler::new(&config));
        let runtime_config = Arc::new(RwLock::new(config.clone()));
        let edit_watcher = Arc::new(match &state_dir {
            Some(dir) => SignalEditWatcher::new_with_persistence(Arc::new(NullParser), dir.join("edit_watcher.json")),
            None => SignalEditWatcher::new(Arc::new(NullParser)),
        });

        let executor = TradeExecutor::new(
            broker.clone(),
            registry.clone(),
            margin_guard.clone(),
            spread_gate.clone(),
            quotes.clone(),
            events.clone(),
            edit_watcher.clone(),
            runtime_config.clone(),
        );

        let rate_limiter = Arc::new(match &state_dir {
            Some(dir) => RateLimiter::new_with_persistence(config.rate_limiter.clone(), dir.join("rate_limiter.json")),
            None => RateLimiter::new(config.rate_limiter.clone()),
        });
        let reverse_strategy = Arc::new(RwLock::new(match &state_dir {
            Some(dir) => ReverseStrategy::new_with_persistence(config.reverse_rules.clone(), dir.join("reverse_strategy.json")),
            None => ReverseStrategy::new(config.reverse_rules.clone()),
        }));
        let command_history = Arc::new(match &state_dir {
            Some(dir) => CommandHistory::new_with_persistence(dir.join("command_history.json")),
            None => CommandHistory::new(),
        });

        Self {
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),

            runtime_config,
            clock: clock.clone(),
            broker,
            quotes: quotes.clone(),

            rate_limiter,
            margin_guard,
            spread_gate: spread_gate.clone(),
            multi_signal: Arc::new(MultiSignalHandler::new(config.multi_signal.clone())),
            reverse_strategy,
            router: Arc::new(RwLock::new(ConditionRouter::new(config.router_rules.clone(), config.router_default_action.clone()))),
            lot_randomizer: Arc::new(LotRandomizer::new()),
            smart_entry: Arc::new(SmartEntryScheduler::new(quotes, spread_gate, clock)),
            volatility: Arc::new(StaticVolatilityModel::default()),

            executor,
            registry,
            tp_sl_adjustor: Arc::new(TpSlAdjustor::new()),
            edit_watcher,

            command_history,

            events,
            scheduler,

            recent_errors: RwLock::new(Vec::new()),

            no_go_reason: RwLock::new(None),
            ws_user_connected: RwLock::new(false),
            last_ws_user_event: RwLock::new(std::time::Instant::now()),

            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    /// Atomically increment the state version. Call this after every
    /// meaningful mutation to signal WebSocket clients that fresh data is
    /// available.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Read the current state version without modifying it.
    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the entire engine state.
    /// This is the payload sent via the REST `GET /api/v1/state` endpoint
    /// and the WebSocket push feed.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let now = Utc::now();
        let config = self.runtime_config.read();
        let version = self.current_state_version();

        let ws_user_event_age_ms = self.last_ws_user_event.read().elapsed().as_millis() as u64;

        let truth = TruthHeader {
            ws_user_connected: *self.ws_user_connected.read(),
            last_ws_user_event_age_ms: ws_user_event_age_ms,
            no_go_reason: self.no_go_reason.read().clone(),
            state_version: version,
            ws_sequence_number: self.ws_sequence_number.load(Ordering::Relaxed),
            trading_mode: config.trading_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            server_time: now.timestamp_millis(),
        };

        let positions = self.registry.list_open();
        let margin = self.margin_guard.current();
        let recent_errors = self.recent_errors.read().clone();
        let closed_positions = self.registry.list_closed(500);
        let journal_stats = journal_stats_from(&closed_positions);

        let runtime_config_summary = RuntimeConfigSummary {
            trading_mode: config.trading_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            symbols: config.symbols.clone(),
        };

        StateSnapshot {
            state_version: version,
            server_time: now.timestamp_millis(),
            truth,
            positions,
            margin,
            runtime_config: runtime_config_summary,
            recent_errors: Some(recent_errors),
            journal_stats,
        }
    }
}

fn journal_stats_from(closed_positions: &[Position]) -> Option<JournalStats> {
    if closed_positions.is_empty() {
        return None;
    }
    use rust_decimal::Decimal;
    let total_trades = closed_positions.len();
    let wins = closed_positions.iter().filter(|p| p.realized_pnl > Decimal::ZERO).count();
    let win_rate = wins as f64 / total_trades as f64;
    let total_net_pnl: Decimal = closed_positions.iter().map(|p| p.realized_pnl).sum();
    let gross_profit: Decimal = closed_positions
        .iter()
        .map(|p| p.realized_pnl)
        .filter(|pnl| *pnl > Decimal::ZERO)
        .sum();
    let gross_loss: Decimal = closed_positions
        .iter()
        .map(|p| p.realized_pnl)
        .filter(|pnl| *pnl < Decimal::ZERO)
        .map(|pnl| pnl.abs())
        .sum();
    let profit_factor = if gross_loss > Decimal::ZERO {
        Some((gross_profit / gross_loss).to_string())
    } else if gross_profit > Decimal::ZERO {
        None // unbounded; omit rather than serialize an infinity sentinel
    } else {
        Some("0".to_string())
    };

    Some(JournalStats {
        total_trades,
        win_rate,
        total_net_pnl,
        profit_factor,
    })
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Full engine state snapshot sent to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub truth: TruthHeader,
    pub positions: Vec<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin: Option<MarginSnapshot>,
    pub runtime_config: RuntimeConfigSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_errors: Option<Vec<ErrorRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_stats: Option<JournalStats>,
}

/// Operational truth header — the dashboard's primary status banner.
#[derive(Debug, Clone, Serialize)]
pub struct TruthHeader {
    pub ws_user_connected: bool,
    pub last_ws_user_event_age_ms: u64,
    pub no_go_reason: Option<String>,
    pub state_version: u64,
    pub ws_sequence_number: u64,
    pub trading_mode: String,
    pub account_mode: String,
    pub server_time: i64,
}

/// Summary of runtime config for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigSummary {
    pub trading_mode: String,
    pub account_mode: String,
    pub symbols: Vec<String>,
}

/// Trade journal aggregate statistics.
#[derive(Debug, Clone, Serialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_net_pnl: rust_decimal::Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_factor: Option<String>,
}
