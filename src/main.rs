// =============================================================================
// Signal Execution Engine — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. Operators must
// explicitly switch to Live/Running via the dashboard, API, or the C19
// command surface.
// =============================================================================

mod api;
mod app_state;
mod broker;
mod clock;
mod command_interpreter;
mod config;
mod entry_resolver;
mod errors;
mod event_bus;
mod execution;
mod exit;
mod lot_randomizer;
mod lot_sizer;
mod margin_guard;
mod market_data;
mod multi_signal;
mod persistence;
mod position_engine;
mod rate_limiter;
mod reverse_strategy;
mod router;
mod scheduler;
mod signal_edit_watcher;
mod signal_parser;
mod simulator;
mod smart_entry;
mod spread_gate;
mod symbols;
mod types;
mod volatility;

use std::sync::Arc;

use rust_decimal_macros::dec;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::{BrokerBridge, HttpBrokerClient, SentinelBroker};
use crate::config::RuntimeConfig;
use crate::event_bus::Event;
use crate::router::RoutingContext;
use crate::smart_entry::PollOutcome;
use crate::types::{AccountMode, RouteAction, Signal, TradeIntent};

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("signal execution engine starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // SAFETY: always come up paused on a demo account; operators opt in to
    // live trading explicitly via the command surface or API afterwards.
    config.trading_mode = types::TradingMode::Paused;
    config.account_mode = AccountMode::Demo;

    if let Ok(syms) = std::env::var("ENGINE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    info!(symbols = ?config.symbols, "configured trading pairs");
    info!(trading_mode = %config.trading_mode, account_mode = %config.account_mode, "engine starting in SAFE mode (Demo + Paused)");

    let broker: Arc<dyn BrokerBridge> = build_broker(&config);

    let state = Arc::new(AppState::new(config, broker));

    spawn_api_server(state.clone());
    spawn_market_data_refresher(state.clone());
    spawn_margin_guard_loop(state.clone());
    spawn_multi_signal_processor(state.clone());
    spawn_smart_entry_poller(state.clone());
    spawn_exit_monitors(state.clone());

    let executor_runner = state.executor.clone();
    tokio::spawn(async move { executor_runner.run().await });

    info!("all subsystems running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("engine shut down complete");
    Ok(())
}

fn build_broker(config: &RuntimeConfig) -> Arc<dyn BrokerBridge> {
    match config.account_mode {
        AccountMode::Demo => {
            let sentinel = SentinelBroker::new();
            for symbol in &config.symbols {
                sentinel.push_quote(symbol, dec!(1.1000), dec!(1.1002));
            }
            Arc::new(sentinel)
        }
        AccountMode::Live => {
            let base_url = std::env::var("BROKER_BASE_URL").unwrap_or_else(|_| "https://broker.invalid".to_string());
            let api_key = std::env::var("BROKER_API_KEY").unwrap_or_default();
            let api_secret = std::env::var("BROKER_API_SECRET").unwrap_or_default();
            Arc::new(HttpBrokerClient::new(base_url, api_key, api_secret))
        }
    }
}

fn spawn_api_server(state: Arc<AppState>) {
    let bind_addr = std::env::var("ENGINE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    tokio::spawn(async move {
        let app = api::rest::router(state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });
}

/// C2: refresh the quote cache for every configured symbol on a fixed tick.
fn spawn_market_data_refresher(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = state.scheduler.market_data_refresh.ticker();
        loop {
            ticker.tick().await;
            let symbols = state.runtime_config.read().symbols.clone();
            for symbol in &symbols {
                if let Err(e) = state.quotes.quote(symbol).await {
                    warn!(symbol = %symbol, error = %e, "quote refresh failed");
                }
            }
        }
    });
}

/// C6: refresh the margin guard from the broker's account snapshot and fire
/// the emergency-close sweep if the account has fallen below the threshold.
fn spawn_margin_guard_loop(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = state.scheduler.margin_guard_tick.ticker();
        loop {
            ticker.tick().await;
            match state.broker.account().await {
                Ok(account) => {
                    let snapshot = state
                        .margin_guard
                        .update(account.balance, account.equity, account.margin, account.free_margin);
                    state.events.publish(Event::MarginAlert {
                        status: snapshot.status,
                        margin_level: snapshot.margin_level,
                    });

                    if state.margin_guard.should_emergency_close() {
                        let open = state.registry.list_open();
                        let order = crate::margin_guard::emergency_close_order(
                            &open.iter().map(|p| (p.ticket.clone(), p.realized_pnl)).collect::<Vec<_>>(),
                        );
                        let by_ticket: std::collections::HashMap<_, _> =
                            open.iter().map(|p| (p.ticket.clone(), p.clone())).collect();
                        for ticket in order {
                            warn!(ticket = %ticket, "emergency close triggered by margin guard");
                            if let Err(e) = state.broker.close_position(&ticket).await {
                                error!(ticket = %ticket, error = %e, "emergency close failed");
                                continue;
                            }
                            let _lock = state.executor.ticket_lock(&ticket).lock_owned().await;
                            let Some(position) = by_ticket.get(&ticket) else { continue };
                            let close_price = match state.quotes.quote(&position.symbol).await {
                                Ok(quote) if position.direction == types::Direction::Buy => quote.bid,
                                Ok(quote) => quote.ask,
                                Err(_) => account.equity,
                            };
                            if let Some(closed) = state.registry.close(&ticket, close_price, "margin_emergency_close") {
                                state.edit_watcher.unregister_ticket(&closed.message_id, &closed.ticket);
                                state.events.publish(Event::PositionClosed {
                                    ticket: closed.ticket.clone(),
                                    reason: "margin_emergency_close".to_string(),
                                    realized_pnl: closed.realized_pnl,
                                });
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "account snapshot fetch failed"),
            }
        }
    });
}

/// C8: periodically merge buffered signals per symbol, then run the merged
/// signal through C9 (reverse) / C10 (route) / C1+C4+C3+C11 (intent build)
/// and finally either admit it to C12's smart-wait or submit it to C13 directly.
fn spawn_multi_signal_processor(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = state.scheduler.multi_signal_process.ticker();
        loop {
            ticker.tick().await;
            let symbols = state.runtime_config.read().symbols.clone();
            for symbol in &symbols {
                if let Some(signal) = state.multi_signal.process_symbol(symbol) {
                    if let Err(reason) = dispatch_signal(&state, signal.clone()).await {
                        state.events.publish(Event::SignalBlocked {
                            signal_id: signal.signal_id.clone(),
                            reason: reason.clone(),
                        });
                        warn!(signal_id = %signal.signal_id, reason, "signal dropped before reaching the executor");
                    }
                }
            }
        }
    });
}

async fn dispatch_signal(state: &Arc<AppState>, signal: Signal) -> Result<(), String> {
    {
        let cfg = state.runtime_config.read();
        if cfg.global_disabled {
            return Err("trading disabled globally via /disable all".to_string());
        }
        if cfg.disabled_symbols.iter().any(|s| s.eq_ignore_ascii_case(&signal.symbol)) {
            return Err(format!("symbol {} disabled via /disable", signal.symbol));
        }
        if cfg.disabled_providers.iter().any(|p| p.eq_ignore_ascii_case(&signal.provider_id)) {
            return Err(format!("provider {} disabled via /disable", signal.provider_id));
        }
    }

    let volatility = state.volatility.score(&signal.symbol);
    let reversed = state.reverse_strategy.read().apply(&signal, Some(volatility));
    let (direction, sl, tps) = match reversed {
        Some(outcome) if outcome.dropped => return Err("dropped by reverse strategy".to_string()),
        Some(outcome) => (outcome.direction, outcome.sl.or(signal.sl), if outcome.tps.is_empty() { signal.tps.clone() } else { outcome.tps }),
        None => (signal.direction, signal.sl, signal.tps.clone()),
    };

    let quote = state
        .quotes
        .quote(&signal.symbol)
        .await
        .map_err(|e| format!("no quote available: {e}"))?;
    let current_price = match direction {
        types::Direction::Buy => quote.ask,
        types::Direction::Sell => quote.bid,
    };
    let spread_pips = state
        .quotes
        .spread_pips(&signal.symbol)
        .await
        .unwrap_or(f64::INFINITY);
    let margin = state.margin_guard.current();

    let ctx = RoutingContext {
        volatility: Some(volatility),
        confidence: Some(signal.confidence),
        symbol_class: None,
        provider: Some(signal.provider_id.clone()),
        session: None,
        spread_pips: Some(spread_pips),
        margin_level: margin.map(|m| m.margin_level.try_into().unwrap_or(0.0)),
        volume: signal.volume.and_then(|v| v.try_into().ok()),
    };
    let routing = state.router.read().route(&signal.signal_id, &ctx);

    match routing.action {
        RouteAction::BlockSignal { reason } => return Err(reason),
        RouteAction::DelaySignal { minutes } => {
            return Err(format!("deferred {minutes} minutes by router (re-submit on next merge cycle)"));
        }
        RouteAction::RouteToReverse | RouteAction::ProcessNormal | RouteAction::EscalatePriority => {}
        RouteAction::SplitSignal { count } => {
            let intents = build_split_intents(state, &signal, direction, sl.as_ref(), &tps, current_price, count).await?;
            state.executor.submit_split(intents).await;
            return Ok(());
        }
    }

    let intent = build_intent(state, &signal, direction, sl, &tps, current_price, None).await?;
    admit_or_submit(state, intent).await;
    Ok(())
}

async fn build_split_intents(
    state: &Arc<AppState>,
    signal: &Signal,
    direction: types::Direction,
    sl: Option<&rust_decimal::Decimal>,
    tps: &[rust_decimal::Decimal],
    current_price: rust_decimal::Decimal,
    count: u32,
) -> Result<Vec<TradeIntent>, String> {
    let mut intents = Vec::new();
    for i in 0..count {
        let mut intent = build_intent(state, signal, direction, sl.copied(), tps, current_price, Some(i)).await?;
        intent.volume = (intent.volume / rust_decimal::Decimal::from(count)).max(rust_decimal::Decimal::new(1, 2));
        intents.push(intent);
    }
    Ok(intents)
}

async fn build_intent(
    state: &Arc<AppState>,
    signal: &Signal,
    direction: types::Direction,
    sl: Option<rust_decimal::Decimal>,
    tps: &[rust_decimal::Decimal],
    current_price: rust_decimal::Decimal,
    split_index: Option<u32>,
) -> Result<TradeIntent, String> {
    let symbol = symbols::resolve(&signal.symbol);

    let entry_mode = entry_resolver::detect_mode_keyword(&signal.original_text).unwrap_or_default();
    let entry_target = entry_resolver::resolve(&signal.entries, direction, current_price, entry_mode)
        .ok_or_else(|| "no viable entry candidate".to_string())?;

    let pip_value = symbols::pip_value(&symbol, "USD");
    let sl_distance_pips = sl.map(|s| (entry_target - s).abs() / symbols::pip_size(&symbol));

    let balance = match state.broker.account().await {
        Ok(account) => account.balance,
        Err(e) => {
            warn!(error = %e, "account balance fetch failed, using configured fallback");
            rust_decimal::Decimal::from(10_000)
        }
    };

    let cfg = state.runtime_config.read();
    let risk_keyword = lot_sizer::detect_risk_keyword(&signal.original_text, &cfg.lot_sizer);
    let lot_request = lot_sizer::LotSizeRequest {
        mode: cfg.lot_sizer.default_mode,
        parameter: rust_decimal::Decimal::try_from(cfg.lot_sizer.default_parameter).unwrap_or(rust_decimal::Decimal::ONE),
        balance,
        sl_distance_pips,
        pip_value,
        text_lot_hint: signal.volume,
        risk_keyword,
    };
    let lot_result = lot_sizer::size(&lot_request, &cfg.lot_sizer);
    let randomized_volume = state.lot_randomizer.randomize(
        &symbol,
        entry_target,
        chrono::Utc::now().timestamp_millis(),
        direction,
        lot_result.volume,
        &cfg.lot_randomizer,
        rust_decimal::Decimal::new(1, 2),
        rust_decimal::Decimal::from(50),
    );
    drop(cfg);

    let tp_plan = equal_weighted_tp_plan(tps);

    Ok(TradeIntent {
        intent_id: uuid::Uuid::new_v4().to_string(),
        signal_id: signal.signal_id.clone(),
        message_id: signal.message_id.clone(),
        symbol,
        direction,
        entry_mode,
        entry_target,
        volume: randomized_volume,
        sl,
        tp_plan,
        smart_wait_deadline: None,
        meta: types::IntentMeta {
            reversed: false,
            merged_from: Vec::new(),
            split_index,
            priority: signal.priority,
            model_version: None,
        },
        original_signal: signal.clone(),
    })
}

fn equal_weighted_tp_plan(tps: &[rust_decimal::Decimal]) -> Vec<(rust_decimal::Decimal, rust_decimal::Decimal)> {
    if tps.is_empty() {
        return Vec::new();
    }
    let share = rust_decimal::Decimal::from(100) / rust_decimal::Decimal::from(tps.len() as u64);
    tps.iter().map(|tp| (*tp, share)).collect()
}

async fn admit_or_submit(state: &Arc<AppState>, intent: TradeIntent) {
    let cfg = state.runtime_config.read().smart_entry.clone();
    if state.smart_entry.admit(intent.clone(), &cfg) {
        return;
    }
    state.executor.submit(intent).await;
}

/// C12: poll all active smart-wait admissions; hand off favorable or
/// timed-out-fallback intents straight to the executor.
fn spawn_smart_entry_poller(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = state.scheduler.smart_entry_poll.ticker();
        loop {
            ticker.tick().await;
            let cfg = state.runtime_config.read().smart_entry.clone();
            for outcome in state.smart_entry.poll_once(&cfg).await {
                match outcome {
                    PollOutcome::HandOff(intent) | PollOutcome::TimedOutFallbackImmediate(intent) => {
                        state.executor.submit(intent).await;
                    }
                    PollOutcome::TimedOutCancelled(intent_id) => {
                        info!(intent_id, "smart entry wait cancelled without a fill");
                    }
                }
            }
        }
    });
}

/// C14-C17: tick every open position through the exit-management stack.
/// Each engine is a pure function over a `Position` snapshot; this loop owns
/// applying the resulting action back onto the registry and the broker.
fn spawn_exit_monitors(state: Arc<AppState>) {
    spawn_multi_tp_monitor(state.clone());
    spawn_trailing_stop_monitor(state.clone());
    spawn_break_even_monitor(state.clone());
    spawn_tp_sl_adjustor_monitor(state);
}

fn spawn_multi_tp_monitor(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = state.scheduler.multi_tp.ticker();
        loop {
            ticker.tick().await;
            let cfg = state.runtime_config.read().multi_tp.clone();
            for position in state.registry.list_open() {
                let quote = match state.quotes.quote(&position.symbol).await {
                    Ok(q) => q,
                    Err(_) => continue,
                };
                let Some(action) = exit::multi_tp::evaluate_hit(&position, quote.bid, quote.ask, &cfg) else {
                    continue;
                };
                let _lock = state.executor.ticket_lock(&position.ticket).lock_owned().await;
                let close_price = if position.direction == types::Direction::Buy { quote.bid } else { quote.ask };
                if let Err(e) = state
                    .broker
                    .partial_close(&position.ticket, action.close_volume, close_price, cfg.max_slippage_pips)
                    .await
                {
                    error!(ticket = %position.ticket, error = %e, "tp partial close failed");
                    continue;
                }
                if let Some(new_sl) = action.new_sl {
                    let _ = state.broker.modify_position(&position.ticket, Some(new_sl), None).await;
                }
                state.events.publish(Event::TpHit {
                    ticket: position.ticket.clone(),
                    level_index: action.level_index,
                    close_volume: action.close_volume,
                });
                let position_closes = action.position_closes;
                if let Some(result) = state.registry.apply_tp_hit(&position.ticket, &action, close_price, "tp_hit") {
                    if position_closes {
                        state.edit_watcher.unregister_ticket(&result.message_id, &result.ticket);
                        state.events.publish(Event::PositionClosed {
                            ticket: result.ticket.clone(),
                            reason: "tp_hit".to_string(),
                            realized_pnl: result.realized_pnl,
                        });
                    }
                }
            }
        }
    });
}

fn spawn_trailing_stop_monitor(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = state.scheduler.trailing_stop.ticker();
        loop {
            ticker.tick().await;
            let cfg = state.runtime_config.read().trailing_stop.clone();
            for position in state.registry.list_open() {
                let quote = match state.quotes.quote(&position.symbol).await {
                    Ok(q) => q,
                    Err(_) => continue,
                };
                let current_price = if position.direction == types::Direction::Buy { quote.bid } else { quote.ask };
                let params = exit::trailing_stop::TrailingParams {
                    method: exit::trailing_stop::TrailMethod::FixedPips,
                    trail_distance: rust_decimal::Decimal::try_from(cfg.trail_distance_pips).unwrap_or_default(),
                    atr_value: None,
                };
                let Some(update) = exit::trailing_stop::tick(&position, current_price, &params, &cfg) else {
                    continue;
                };
                let _lock = state.executor.ticket_lock(&position.ticket).lock_owned().await;
                if let Err(e) = state.broker.modify_position(&position.ticket, Some(update.new_sl), None).await {
                    error!(ticket = %position.ticket, error = %e, "trailing stop modify failed");
                    continue;
                }
                state.events.publish(Event::SlMoved { ticket: position.ticket.clone(), new_sl: update.new_sl });
                state.registry.apply_trail(&position.ticket, &update);
            }
        }
    });
}

fn spawn_break_even_monitor(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = state.scheduler.break_even.ticker();
        loop {
            ticker.tick().await;
            let cfg = state.runtime_config.read().break_even.clone();
            for position in state.registry.list_open() {
                if position.breakeven_locked {
                    continue;
                }
                let quote = match state.quotes.quote(&position.symbol).await {
                    Ok(q) => q,
                    Err(_) => continue,
                };
                let current_price = if position.direction == types::Direction::Buy { quote.bid } else { quote.ask };
                let Some(new_sl) = exit::break_even::evaluate(&position, current_price, chrono::Utc::now(), &cfg, &[], None) else {
                    continue;
                };
                let _lock = state.executor.ticket_lock(&position.ticket).lock_owned().await;
                if let Err(e) = state.broker.modify_position(&position.ticket, Some(new_sl), None).await {
                    error!(ticket = %position.ticket, error = %e, "break-even modify failed");
                    continue;
                }
                state.events.publish(Event::SlMoved { ticket: position.ticket.clone(), new_sl });
                state.registry.apply_break_even(&position.ticket, new_sl);
            }
        }
    });
}

fn spawn_tp_sl_adjustor_monitor(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = state.scheduler.tp_sl_adjustor.ticker();
        loop {
            ticker.tick().await;
            let cfg = state.runtime_config.read().tp_sl_adjustor.clone();
            for position in state.registry.list_open() {
                let spread_pips = state.quotes.spread_pips(&position.symbol).await.unwrap_or(0.0);
                let volatility_scale = Some(state.volatility.score(&position.symbol));
                let Some(action) = state
                    .tp_sl_adjustor
                    .tick(&position, spread_pips, volatility_scale, chrono::Utc::now(), &cfg)
                else {
                    continue;
                };
                let _lock = state.executor.ticket_lock(&position.ticket).lock_owned().await;
                if let Some(new_sl) = action.new_sl {
                    if let Err(e) = state.broker.modify_position(&position.ticket, Some(new_sl), None).await {
                        error!(ticket = %position.ticket, error = %e, "tp/sl adjustor modify failed");
                        continue;
                    }
                }
                state.registry.apply_adjustment(&position.ticket, &action);
            }
        }
    });
}
