// =============================================================================
// TP/SL Adjustor (C17)
// =============================================================================
//
// Spread- and volatility-driven buffer adjustments to a position's SL and
// nearest pending TP, with per-position cumulative-budget bookkeeping so a
// single session can't thrash a position's stops indefinitely.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::config::TpSlAdjustorConfig;
use crate::types::{Direction, Position, TpStatus};

#[derive(Default)]
struct SessionState {
    cumulative_pips: Decimal,
    last_adjustment_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AdjustmentAction {
    pub new_sl: Option<Decimal>,
    pub new_tp: Option<(u32, Decimal)>,
}

pub struct TpSlAdjustor {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl TpSlAdjustor {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn pip(symbol: &str) -> Decimal {
        crate::symbols::pip_size(symbol)
    }

    /// One tick for a single position. `volatility_scale` multiplies the
    /// configured buffers (1.0 = no scaling; `None` disables volatility-based
    /// scaling entirely, using raw configured buffers).
    pub fn tick(
        &self,
        position: &Position,
        spread_pips: f64,
        volatility_scale: Option<f64>,
        now: DateTime<Utc>,
        cfg: &TpSlAdjustorConfig,
    ) -> Option<AdjustmentAction> {
        let mut sessions = self.sessions.write();
        let state = sessions.entry(position.ticket.clone()).or_default();

        if let Some(last) = state.last_adjustment_at {
            let min_interval = chrono::Duration::seconds(cfg.min_adjustment_interval_seconds as i64);
            if now - last < min_interval {
                return None;
            }
        }

        let scale = Decimal::try_from(volatility_scale.unwrap_or(1.0)).unwrap_or(Decimal::ONE);
        let pip = Self::pip(&position.symbol);
        let sl_buffer_pips = Decimal::try_from(cfg.min_distance_pips).unwrap_or(Decimal::ZERO).max(Decimal::ZERO);
        let high = cfg.high_spread_threshold_pips;
        let low = cfg.low_spread_threshold_pips;

        let remaining_budget =
            Decimal::try_from(cfg.max_adjustment_per_session_pips).unwrap_or(Decimal::ZERO) - state.cumulative_pips;
        if remaining_budget <= Decimal::ZERO {
            return None;
        }

        let current_sl = position.sl?;
        let mut action = AdjustmentAction { new_sl: None, new_tp: None };
        let mut moved_pips = Decimal::ZERO;

        if spread_pips > high {
            // Widen SL away from price, narrow the nearest pending TP toward price.
            let widen = (sl_buffer_pips * scale).min(remaining_budget);
            let new_sl = match position.direction {
                Direction::Buy => current_sl - widen,
                Direction::Sell => current_sl + widen,
            };
            let min_distance = Decimal::try_from(cfg.min_distance_pips).unwrap_or(Decimal::ZERO) * pip;
            let distance_ok = (position.current_price - new_sl).abs() >= min_distance;
            if distance_ok && widen > Decimal::ZERO {
                action.new_sl = Some(new_sl);
                moved_pips += widen;
            }

            if let Some(tp) = position
                .tp_plan_remaining
                .iter()
                .find(|tp| tp.status == TpStatus::Pending)
            {
                let narrow = widen.min(remaining_budget - moved_pips);
                if narrow > Decimal::ZERO {
                    let new_tp_price = match position.direction {
                        Direction::Buy => tp.price - narrow * pip,
                        Direction::Sell => tp.price + narrow * pip,
                    };
                    action.new_tp = Some((tp.level_index, new_tp_price));
                    moved_pips += narrow;
                }
            }
        } else if spread_pips < low {
            // Optionally tighten SL toward price, never past entry unless locked.
            let tighten = (sl_buffer_pips * scale).min(remaining_budget);
            let candidate = match position.direction {
                Direction::Buy => current_sl + tighten,
                Direction::Sell => current_sl - tighten,
            };
            let past_entry = match position.direction {
                Direction::Buy => candidate > position.entry_price,
                Direction::Sell => candidate < position.entry_price,
            };
            if !past_entry || position.breakeven_locked {
                action.new_sl = Some(candidate);
                moved_pips += tighten;
            }
        }

        if action.new_sl.is_none() && action.new_tp.is_none() {
            return None;
        }

        state.cumulative_pips += moved_pips;
        state.last_adjustment_at = Some(now);
        Some(action)
    }

    pub fn unregister(&self, ticket: &str) {
        self.sessions.write().remove(ticket);
    }
}

impl Default for TpSlAdjustor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position() -> Position {
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
            tp_plan_remaining: vec![crate::types::TpLevel {
                level_index: 0,
                price: dec!(1.1050),
                percentage: dec!(100),
                status: TpStatus::Pending,
                closed_volume: Decimal::ZERO,
                close_price: None,
            }],
            open_time: Utc::now(),
            state: crate::types::PositionState::Open,
            current_price: dec!(1.1010),
            highest_favorable_price: None,
            breakeven_locked: false,
            closed_volume_total: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            closed_at: None,
            close_reason: None,
        }
    }

    #[test]
    fn widens_sl_and_narrows_tp_on_high_spread() {
        let adjustor = TpSlAdjustor::new();
        let cfg = TpSlAdjustorConfig::default();
        let position = position();
        let action = adjustor
            .tick(&position, 10.0, None, Utc::now(), &cfg)
            .expect("high-spread adjustment");
        assert!(action.new_sl.is_some());
        assert!(action.new_tp.is_some());
    }

    #[test]
    fn respects_min_adjustment_interval() {
        let adjustor = TpSlAdjustor::new();
        let cfg = TpSlAdjustorConfig::default();
        let position = position();
        let now = Utc::now();
        adjustor.tick(&position, 10.0, None, now, &cfg).expect("first adjustment");
        let second = adjustor.tick(&position, 10.0, None, now + chrono::Duration::seconds(5), &cfg);
        assert!(second.is_none());
    }

    #[test]
    fn no_adjustment_in_normal_spread_regime() {
        let adjustor = TpSlAdjustor::new();
        let cfg = TpSlAdjustorConfig::default();
        let position = position();
        assert!(adjustor.tick(&position, 2.0, None, Utc::now(), &cfg).is_none());
    }
}
