// =============================================================================
// Position Registry (C13's state store)
// =============================================================================
//
// The single place that mutates broker-mirrored position state in this
// process. Owned by the Trade Executor (`execution.rs`); the exit-management
// modules (C14-C17) and the edit watcher (C18) never touch a `Position`
// directly — they compute a proposed action from a snapshot and hand it back
// here to apply. Keeps an open/closed split with a bounded closed-history
// list so recent trade-journal queries don't require unbounded retention.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::exit::multi_tp::TpHitAction;
use crate::exit::tp_sl_adjustor::AdjustmentAction;
use crate::exit::trailing_stop::TrailUpdate;
use crate::persistence;
use crate::types::{Position, PositionState, TpStatus};

const DEFAULT_CLOSED_HISTORY_CAP: usize = 2000;
const POSITION_REGISTRY_STATE_VERSION: u32 = 1;

/// On-disk mirror: the multi-TP trade registry plus every position's
/// trailing/break-even state (`highest_favorable_price`, `breakeven_locked`,
/// `sl`) already lives on `Position` itself, so persisting open+closed
/// covers all of it in one document.
#[derive(Default, Serialize, Deserialize)]
struct PersistedPositions {
    open: Vec<Position>,
    closed: Vec<Position>,
}

pub struct PositionRegistry {
    open: RwLock<HashMap<String, Position>>,
    closed: RwLock<Vec<Position>>,
    closed_cap: usize,
    state_path: Option<PathBuf>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(HashMap::new()),
            closed: RwLock::new(Vec::new()),
            closed_cap: DEFAULT_CLOSED_HISTORY_CAP,
            state_path: None,
        }
    }

    /// Same as `new`, but restores open/closed positions from `path` if
    /// present, and flushes back to it on every mutation.
    pub fn new_with_persistence(path: PathBuf) -> Self {
        let persisted = persistence::load_or_default::<PersistedPositions>(&path);
        let open = persisted
            .open
            .into_iter()
            .map(|p| (p.ticket.clone(), p))
            .collect();
        Self {
            open: RwLock::new(open),
            closed: RwLock::new(persisted.closed),
            closed_cap: DEFAULT_CLOSED_HISTORY_CAP,
            state_path: Some(path),
        }
    }

    fn persist(&self) {
        if let Some(path) = &self.state_path {
            let snapshot = PersistedPositions {
                open: self.open.read().values().cloned().collect(),
                closed: self.closed.read().clone(),
            };
            if let Err(e) = persistence::save_atomic(path, POSITION_REGISTRY_STATE_VERSION, &snapshot) {
                warn!(error = %e, "failed to persist position registry state");
            }
        }
    }

    /// Register a freshly filled position. Refuses (and logs) a duplicate
    /// ticket rather than overwriting it — at-most-once fill per ticket.
    pub fn open(&self, position: Position) -> bool {
        let mut open = self.open.write();
        if open.contains_key(&position.ticket) {
            warn!(ticket = %position.ticket, "refusing to re-register an already-open ticket");
            return false;
        }
        info!(ticket = %position.ticket, symbol = %position.symbol, "position opened");
        open.insert(position.ticket.clone(), position);
        drop(open);
        self.persist();
        true
    }

    pub fn get(&self, ticket: &str) -> Option<Position> {
        self.open.read().get(ticket).cloned()
    }

    pub fn list_open(&self) -> Vec<Position> {
        self.open.read().values().cloned().collect()
    }

    pub fn list_closed(&self, limit: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(limit).cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    /// Refresh the live mark price used by PnL display and the exit engines'
    /// next tick; does not itself evaluate any exit condition.
    pub fn update_price(&self, ticket: &str, price: Decimal) {
        if let Some(position) = self.open.write().get_mut(ticket) {
            position.current_price = price;
        }
    }

    /// Apply a C14 multi-TP hit decision: marks the level hit, reduces
    /// remaining volume, optionally shifts SL, and closes the position
    /// outright when the decision says the position is now flat.
    pub fn apply_tp_hit(&self, ticket: &str, action: &TpHitAction, close_price: Decimal, reason: &str) -> Option<Position> {
        let mut open = self.open.write();
        let position = open.get_mut(ticket)?;

        if let Some(level) = position
            .tp_plan_remaining
            .iter_mut()
            .find(|tp| tp.level_index == action.level_index)
        {
            level.status = TpStatus::Hit;
            level.closed_volume = action.close_volume;
            level.close_price = Some(close_price);
        }

        let pnl_delta = realized_pnl_delta(position, action.close_volume, close_price);
        position.volume_remaining = (position.volume_remaining - action.close_volume).max(Decimal::ZERO);
        position.closed_volume_total += action.close_volume;
        position.realized_pnl += pnl_delta;
        if let Some(new_sl) = action.new_sl {
            position.sl = Some(new_sl);
        }

        debug_assert!(
            position.closed_volume_total + position.volume_remaining <= position.volume_at_intent + Decimal::new(1, 8),
            "volume conservation violated for {ticket}"
        );

        if action.position_closes {
            let closed = open.remove(ticket)?;
            drop(open);
            let result = self.finalize_close(closed, Some(close_price), reason);
            self.persist();
            return Some(result);
        }

        let result = position.clone();
        drop(open);
        self.persist();
        Some(result)
    }

    /// Apply a C15 trailing-stop update onto the position's cached extreme
    /// and SL.
    pub fn apply_trail(&self, ticket: &str, update: &TrailUpdate) -> Option<Position> {
        let mut open = self.open.write();
        let position = open.get_mut(ticket)?;
        position.sl = Some(update.new_sl);
        position.highest_favorable_price = Some(update.new_favorable_extreme);
        position.breakeven_locked = update.breakeven_locked;
        let result = position.clone();
        drop(open);
        self.persist();
        Some(result)
    }

    /// Apply a C16 break-even SL move.
    pub fn apply_break_even(&self, ticket: &str, new_sl: Decimal) -> Option<Position> {
        let mut open = self.open.write();
        let position = open.get_mut(ticket)?;
        position.sl = Some(new_sl);
        position.breakeven_locked = true;
        let result = position.clone();
        drop(open);
        self.persist();
        Some(result)
    }

    /// Apply a C18 edit-driven SL/TP change to the first remaining TP level.
    /// Volume and entry changes are not modifiable on an already-filled
    /// position and are rejected upstream before this is called.
    pub fn apply_edit(&self, ticket: &str, new_sl: Option<Decimal>, new_tp: Option<Decimal>) -> Option<Position> {
        let mut open = self.open.write();
        let position = open.get_mut(ticket)?;
        if let Some(sl) = new_sl {
            position.sl = Some(sl);
        }
        if let Some(tp) = new_tp {
            if let Some(level) = position.tp_plan_remaining.first_mut() {
                level.price = tp;
            }
        }
        let result = position.clone();
        drop(open);
        self.persist();
        Some(result)
    }

    /// Apply a C17 TP/SL adjustment: either side may be `None`.
    pub fn apply_adjustment(&self, ticket: &str, action: &AdjustmentAction) -> Option<Position> {
        let mut open = self.open.write();
        let position = open.get_mut(ticket)?;
        if let Some(new_sl) = action.new_sl {
            position.sl = Some(new_sl);
        }
        if let Some((level_index, new_price)) = action.new_tp {
            if let Some(level) = position.tp_plan_remaining.iter_mut().find(|tp| tp.level_index == level_index) {
                level.price = new_price;
            }
        }
        let result = position.clone();
        drop(open);
        self.persist();
        Some(result)
    }

    /// Close a position outright (manual close, SL hit, emergency close).
    pub fn close(&self, ticket: &str, close_price: Decimal, reason: &str) -> Option<Position> {
        let removed = self.open.write().remove(ticket)?;
        let result = self.finalize_close(removed, Some(close_price), reason);
        self.persist();
        Some(result)
    }

    /// Partially close a position for a fixed volume without reference to a
    /// TP level (used by C18 applying a volume-reducing edit).
    pub fn partial_close(&self, ticket: &str, volume: Decimal, close_price: Decimal, reason: &str) -> Option<Position> {
        let mut open = self.open.write();
        let position = open.get_mut(ticket)?;
        let close_volume = volume.min(position.volume_remaining);
        let pnl_delta = realized_pnl_delta(position, close_volume, close_price);
        position.volume_remaining -= close_volume;
        position.closed_volume_total += close_volume;
        position.realized_pnl += pnl_delta;

        if position.volume_remaining <= Decimal::ZERO {
            let closed = open.remove(ticket)?;
            drop(open);
            let result = self.finalize_close(closed, Some(close_price), reason);
            self.persist();
            return Some(result);
        }
        let result = position.clone();
        drop(open);
        self.persist();
        Some(result)
    }

    fn finalize_close(&self, mut position: Position, close_price: Option<Decimal>, reason: &str) -> Position {
        position.state = PositionState::Closed;
        position.closed_at = Some(Utc::now());
        position.close_reason = Some(reason.to_string());
        if let Some(price) = close_price {
            position.current_price = price;
        }
        info!(
            ticket = %position.ticket,
            reason,
            realized_pnl = %position.realized_pnl,
            "position closed"
        );

        let mut closed = self.closed.write();
        if closed.len() >= self.closed_cap {
            closed.remove(0);
        }
        closed.push(position.clone());
        position
    }
}

impl Default for PositionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// PnL contribution of closing `volume` lots at `price` against `position`'s
/// entry, in account-currency terms (pip value already folded into lot
/// sizing upstream, so this is a simple price-delta * volume * contract
/// scale via the pip helpers already used throughout the exit engines).
fn realized_pnl_delta(position: &Position, volume: Decimal, price: Decimal) -> Decimal {
    use crate::types::Direction;
    let pip = crate::symbols::pip_size(&position.symbol);
    let pip_value = crate::symbols::pip_value(&position.symbol, "USD");
    let diff = match position.direction {
        Direction::Buy => price - position.entry_price,
        Direction::Sell => position.entry_price - price,
    };
    (diff / pip) * pip_value * volume
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, TpLevel};
    use rust_decimal_macros::dec;

    fn sample_position() -> Position {
        Position {
            ticket: "t1".to_string(),
            intent_id: "i1".to_string(),
            signal_id: "s1".to_string(),
            message_id: "m1".to_string(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            entry_price: dec!(1.1000),
            volume_at_intent: dec!(1.0),
            volume_remaining: dec!(1.0),
            sl: Some(dec!(1.0950)),
            tp_plan_remaining: vec![TpLevel {
                level_index: 0,
                price: dec!(1.1050),
                percentage: dec!(100),
                status: TpStatus::Pending,
                closed_volume: Decimal::ZERO,
                close_price: None,
            }],
            open_time: Utc::now(),
            state: PositionState::Open,
            current_price: dec!(1.1000),
            highest_favorable_price: None,
            breakeven_locked: false,
            closed_volume_total: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            closed_at: None,
            close_reason: None,
        }
    }

    #[test]
    fn duplicate_ticket_registration_is_refused() {
        let registry = PositionRegistry::new();
        assert!(registry.open(sample_position()));
        assert!(!registry.open(sample_position()));
        assert_eq!(registry.open_count(), 1);
    }

    #[test]
    fn full_tp_hit_closes_position_and_moves_to_history() {
        let registry = PositionRegistry::new();
        registry.open(sample_position());
        let action = TpHitAction {
            level_index: 0,
            close_volume: dec!(1.0),
            close_to_zero: true,
            new_sl: None,
            position_closes: true,
        };
        let result = registry.apply_tp_hit("t1", &action, dec!(1.1050), "tp_hit").expect("closed");
        assert_eq!(result.state, PositionState::Closed);
        assert_eq!(registry.open_count(), 0);
        assert_eq!(registry.list_closed(10).len(), 1);
        assert!(result.realized_pnl > Decimal::ZERO);
    }

    #[test]
    fn partial_tp_hit_keeps_position_open_with_reduced_volume() {
        let registry = PositionRegistry::new();
        registry.open(sample_position());
        let action = TpHitAction {
            level_index: 0,
            close_volume: dec!(0.5),
            close_to_zero: false,
            new_sl: Some(dec!(1.1000)),
            position_closes: false,
        };
        let result = registry.apply_tp_hit("t1", &action, dec!(1.1050), "tp_hit").expect("still open");
        assert_eq!(result.volume_remaining, dec!(0.5));
        assert_eq!(result.sl, Some(dec!(1.1000)));
        assert_eq!(registry.open_count(), 1);
    }

    #[test]
    fn manual_close_records_history() {
        let registry = PositionRegistry::new();
        registry.open(sample_position());
        let closed = registry.close("t1", dec!(1.0980), "manual").expect("closed");
        assert_eq!(closed.close_reason, Some("manual".to_string()));
        assert_eq!(registry.open_count(), 0);
    }
}
