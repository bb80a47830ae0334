// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked via
// the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::command_interpreter::{self, AuthDecision};
use crate::signal_edit_watcher::EditOutcome;
use crate::simulator::{self, SimulationResult};
use crate::types::{AccountMode, Command, CommandKind, CommandResponse, CommandScope, Role, Signal, TradingMode};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/kill", post(control_kill))
        .route("/api/v1/control/account-mode", post(control_account_mode))
        .route("/api/v1/heartbeat", post(heartbeat))
        .route("/api/v1/trade-journal", get(trade_journal))
        .route("/api/v1/trade-journal/stats", get(trade_journal_stats))
        .route("/api/v1/simulate", post(simulate))
        .route("/api/v1/signals", post(ingest_signal))
        .route("/api/v1/signals/edit", post(edit_signal))
        .route("/api/v1/command", post(run_command))
        .route("/api/v1/commands/:user_id", get(command_history))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.build_snapshot();
    Json(snapshot)
}

// =============================================================================
// Positions (authenticated)
// =============================================================================

async fn positions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.list_open())
}

// =============================================================================
// Control endpoints (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    trading_mode: String,
    message: String,
}

async fn control_pause(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Paused;
    }
    state.increment_version();
    info!("trading PAUSED via API");

    Json(ControlResponse {
        trading_mode: "Paused".to_string(),
        message: "Trading paused".to_string(),
    })
}

async fn control_resume(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Live;
    }
    state.increment_version();
    info!("trading RESUMED via API");

    Json(ControlResponse {
        trading_mode: "Live".to_string(),
        message: "Trading resumed".to_string(),
    })
}

async fn control_kill(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Killed;
    }
    state.increment_version();
    warn!("trading KILLED via API");

    Json(ControlResponse {
        trading_mode: "Killed".to_string(),
        message: "Trading killed — manual restart required".to_string(),
    })
}

#[derive(Deserialize)]
struct AccountModeRequest {
    account_mode: String,
    #[serde(default)]
    confirm_live: bool,
}

#[derive(Serialize)]
struct AccountModeResponse {
    account_mode: String,
}

async fn control_account_mode(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccountModeRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let mode = match req.account_mode.to_lowercase().as_str() {
        "demo" => AccountMode::Demo,
        "live" => {
            if !req.confirm_live {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": "Switching to Live mode requires confirm_live: true",
                    })),
                ));
            }
            warn!("switching to LIVE account mode via API");
            AccountMode::Live
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": format!("Invalid account mode: '{}'. Use 'demo' or 'live'.", req.account_mode),
                })),
            ));
        }
    };

    {
        let mut config = state.runtime_config.write();
        config.account_mode = mode;
    }
    state.increment_version();
    info!(account_mode = %mode, "account mode changed via API");

    Ok(Json(AccountModeResponse {
        account_mode: mode.to_string(),
    }))
}

// =============================================================================
// Heartbeat (authenticated)
// =============================================================================

async fn heartbeat(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    *state.last_ws_user_event.write() = std::time::Instant::now();
    state.increment_version();

    Json(serde_json::json!({
        "status": "ok",
        "server_time": Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Trade Journal (authenticated)
// =============================================================================

async fn trade_journal(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.list_closed(500))
}

async fn trade_journal_stats(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let closed = state.registry.list_closed(500);
    let total_trades = closed.len();
    if total_trades == 0 {
        return Json(serde_json::json!({
            "total_trades": 0,
            "win_rate": 0.0,
            "total_net_pnl": "0",
            "profit_factor": serde_json::Value::Null,
        }));
    }

    let wins = closed.iter().filter(|p| p.realized_pnl > Decimal::ZERO).count();
    let win_rate = wins as f64 / total_trades as f64;
    let total_net_pnl: Decimal = closed.iter().map(|p| p.realized_pnl).sum();
    let gross_profit: Decimal = closed
        .iter()
        .map(|p| p.realized_pnl)
        .filter(|pnl| *pnl > Decimal::ZERO)
        .sum();
    let gross_loss: Decimal = closed
        .iter()
        .map(|p| p.realized_pnl)
        .filter(|pnl| *pnl < Decimal::ZERO)
        .map(|pnl| pnl.abs())
        .sum();
    let profit_factor = if gross_loss > Decimal::ZERO {
        serde_json::Value::String((gross_profit / gross_loss).to_string())
    } else if gross_profit > Decimal::ZERO {
        serde_json::Value::Null // unbounded; omit rather than serialize an infinity sentinel
    } else {
        serde_json::Value::String("0".to_string())
    };

    Json(serde_json::json!({
        "total_trades": total_trades,
        "win_rate": win_rate,
        "total_net_pnl": total_net_pnl.to_string(),
        "profit_factor": profit_factor,
    }))
}

// =============================================================================
// Simulate (C20, authenticated)
// =============================================================================

#[derive(Deserialize)]
struct SimulateRequest {
    signal: Signal,
    #[serde(default)]
    balance: Option<Decimal>,
}

async fn simulate(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SimulateRequest>,
) -> Result<Json<SimulationResult>, (StatusCode, Json<serde_json::Value>)> {
    let quote = state.quotes.quote(&req.signal.symbol).await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": format!("no quote available: {e}") })),
        )
    })?;
    let balance = req.balance.unwrap_or(Decimal::from(10_000));
    let cfg = state.runtime_config.read().clone();
    let reverse = state.reverse_strategy.read();
    let router = state.router.read();
    let result = simulator::simulate(&req.signal, &cfg, quote, balance, Some(&*reverse), Some(&*router));
    Ok(Json(result))
}

// =============================================================================
// Signal ingest (authenticated)
// =============================================================================

#[derive(Serialize)]
struct IngestResponse {
    admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn ingest_signal(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(signal): Json<Signal>,
) -> impl IntoResponse {
    let signal_id = signal.signal_id.clone();
    let symbol = signal.symbol.clone();

    let rate_decision = state.rate_limiter.check(&symbol, &signal.provider_id, Utc::now());
    if !matches!(rate_decision, crate::rate_limiter::RateLimitDecision::Allowed) {
        let reason = format!("rate limited: {rate_decision:?}");
        state.events.publish(crate::event_bus::Event::SignalBlocked {
            signal_id,
            reason: reason.clone(),
        });
        state.increment_version();
        return Json(IngestResponse { admitted: false, reason: Some(reason) });
    }

    let admitted = state.multi_signal.submit(signal);
    if admitted {
        state.events.publish(crate::event_bus::Event::SignalIngested { signal_id, symbol });
    }
    state.increment_version();
    Json(IngestResponse { admitted, reason: None })
}

// =============================================================================
// Signal edit (C18, authenticated)
// =============================================================================

#[derive(Deserialize)]
struct SignalEditRequest {
    message_id: String,
    new_text: String,
    provider_id: String,
}

#[derive(Serialize)]
struct SignalEditResponse {
    outcome: &'static str,
    applied_tickets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn edit_signal(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignalEditRequest>,
) -> impl IntoResponse {
    let cfg = state.runtime_config.read().edit_watcher.clone();
    let outcome = state
        .edit_watcher
        .on_signal_edit(&req.message_id, &req.new_text, &req.provider_id, Utc::now(), &cfg);

    let response = match &outcome {
        EditOutcome::NoOp => SignalEditResponse {
            outcome: "no_op",
            applied_tickets: vec![],
            message: None,
        },
        EditOutcome::OutsideWindow => SignalEditResponse {
            outcome: "outside_window",
            applied_tickets: vec![],
            message: Some("edit arrived after the allowed modification window".to_string()),
        },
        EditOutcome::DirectionChangeAlert { message_id } => SignalEditResponse {
            outcome: "direction_change_alert",
            applied_tickets: vec![],
            message: Some(format!("direction change on {message_id} surfaced as an alert, not applied")),
        },
        EditOutcome::Applicable { tickets, diff, new_signal } => {
            let changes = crate::signal_edit_watcher::SignalEditWatcher::allowed_changes(diff, &cfg);
            let mut applied = Vec::new();
            for ticket in tickets {
                let _lock = state.executor.ticket_lock(ticket).lock_owned().await;
                let new_sl = if changes.iter().any(|c| c == "sl") { new_signal.sl } else { None };
                let new_tp = if changes.iter().any(|c| c == "tp") { new_signal.tps.first().copied() } else { None };
                if new_sl.is_none() && new_tp.is_none() {
                    continue;
                }
                let success = match state.broker.modify_position(ticket, new_sl, new_tp).await {
                    Ok(r) if r.ok => true,
                    Ok(r) => {
                        warn!(ticket = %ticket, error = ?r.error, "edit-driven position modification rejected");
                        false
                    }
                    Err(e) => {
                        warn!(ticket = %ticket, error = %e, "edit-driven position modification failed");
                        false
                    }
                };
                state.edit_watcher.record_attempt(crate::signal_edit_watcher::ModificationAttempt {
                    ticket: ticket.clone(),
                    change_type: changes.join(","),
                    success,
                });
                if success {
                    state.registry.apply_edit(ticket, new_sl, new_tp);
                    applied.push(ticket.clone());
                }
            }
            state.increment_version();
            SignalEditResponse {
                outcome: "applicable",
                applied_tickets: applied,
                message: None,
            }
        }
    };

    Json(response)
}

// =============================================================================
// Command interpreter (C19, authenticated)
// =============================================================================

#[derive(Deserialize)]
struct CommandRequest {
    user_id: String,
    text: String,
}

fn resolve_role(user_id: &str, cfg: &crate::config::CommandInterpreterConfig) -> Role {
    if cfg.admin_users.iter().any(|u| u == user_id) {
        Role::Admin
    } else {
        Role::User
    }
}

async fn run_command(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    let cfg = state.runtime_config.read().command_interpreter.clone();
    let role = resolve_role(&req.user_id, &cfg);
    let command = command_interpreter::parse(&req.text, &req.user_id, role);

    let decision = command_interpreter::authorize(&command, &cfg);
    let response = match decision {
        AuthDecision::RequiresAdmin => CommandResponse {
            ok: false,
            message: "this command requires the ADMIN role".to_string(),
            payload: None,
        },
        AuthDecision::FeatureDisabled(feature) => CommandResponse {
            ok: false,
            message: format!("the '{feature}' command surface is disabled"),
            payload: None,
        },
        AuthDecision::Allowed => dispatch_command(&state, &command),
    };

    state.command_history.record(command, cfg.history_len);
    Json(response)
}

/// Adds or removes `target` from a disabled-entity list, case-insensitively
/// and without duplicates, backing the symbol/provider scopes of C19's
/// `/enable` and `/disable` commands.
fn set_membership(list: &mut Vec<String>, target: &str, disable: bool) {
    let upper = target.to_uppercase();
    list.retain(|existing| !existing.eq_ignore_ascii_case(&upper));
    if disable {
        list.push(upper);
    }
}

fn dispatch_command(state: &Arc<AppState>, command: &Command) -> CommandResponse {
    match command.kind {
        CommandKind::Status => {
            let snapshot = state.build_snapshot();
            CommandResponse {
                ok: true,
                message: format!(
                    "{} open positions, trading_mode={}",
                    snapshot.positions.len(),
                    snapshot.truth.trading_mode
                ),
                payload: serde_json::to_value(&snapshot).ok(),
            }
        }
        CommandKind::Pause => {
            state.runtime_config.write().trading_mode = TradingMode::Paused;
            state.increment_version();
            CommandResponse { ok: true, message: "trading paused".to_string(), payload: None }
        }
        CommandKind::Resume => {
            state.runtime_config.write().trading_mode = TradingMode::Live;
            state.increment_version();
            CommandResponse { ok: true, message: "trading resumed".to_string(), payload: None }
        }
        CommandKind::Stealth => {
            let on = command.params.first().map(|p| p == "on" || p == "enable").unwrap_or(false);
            state.runtime_config.write().stealth_mode = on;
            state.increment_version();
            CommandResponse {
                ok: true,
                message: format!("stealth mode set to {on}"),
                payload: None,
            }
        }
        CommandKind::Enable | CommandKind::Disable => {
            let target = command.target.clone().unwrap_or_default();
            let disable = command.kind == CommandKind::Disable;
            let mut cfg = state.runtime_config.write();
            match command.scope {
                CommandScope::Global => cfg.global_disabled = disable,
                CommandScope::Symbol => set_membership(&mut cfg.disabled_symbols, &target, disable),
                CommandScope::Provider => set_membership(&mut cfg.disabled_providers, &target, disable),
                CommandScope::Strategy => {
                    drop(cfg);
                    return CommandResponse {
                        ok: false,
                        message: "strategy-scoped enable/disable has no backing strategy registry in this deployment".to_string(),
                        payload: None,
                    };
                }
            }
            drop(cfg);
            state.increment_version();
            CommandResponse {
                ok: true,
                message: format!("{:?} applied for {} ({:?})", command.kind, target, command.scope),
                payload: None,
            }
        }
        CommandKind::Get => {
            let cfg = state.runtime_config.read();
            let payload = match command.target.as_deref() {
                Some("symbols") => serde_json::to_value(&cfg.symbols).ok(),
                Some("margin") => serde_json::to_value(&cfg.margin).ok(),
                Some("rate_limiter") => serde_json::to_value(&cfg.rate_limiter).ok(),
                _ => serde_json::to_value(&*cfg).ok(),
            };
            CommandResponse { ok: true, message: "config read".to_string(), payload }
        }
        CommandKind::Set => CommandResponse {
            ok: false,
            message: "SET is parsed and authorized but runtime field mutation is not wired for this target; use the dedicated control endpoints".to_string(),
            payload: None,
        },
        CommandKind::Replay => CommandResponse {
            ok: false,
            message: "replay requires a persisted signal history, which this deployment does not retain".to_string(),
            payload: None,
        },
        CommandKind::Help => CommandResponse {
            ok: true,
            message: "available commands: /status /pause /resume /enable /disable /get /set /stealth /replay /help".to_string(),
            payload: None,
        },
        CommandKind::Unknown => CommandResponse {
            ok: false,
            message: format!("unrecognised command: {}", command.raw_text),
            payload: None,
        },
    }
}

async fn command_history(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    Json(state.command_history.for_user(&user_id))
}
