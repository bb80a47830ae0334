// =============================================================================
// Multi-TP Manager (C14)
// =============================================================================
//
// Pure decision engine over a `Position` snapshot and a fresh quote; does not
// touch the broker or the position registry itself, keeping "what should
// happen" separate from "make it happen" (the latter lives in
// `position_engine.rs`/`execution.rs`, C13).
// =============================================================================

use rust_decimal::Decimal;

use crate::config::{MultiTpConfig, SlShiftMode};
use crate::types::{Direction, Position, TpStatus};

#[derive(Debug, Clone)]
pub struct TpHitAction {
    pub level_index: u32,
    pub close_volume: Decimal,
    pub close_to_zero: bool,
    pub new_sl: Option<Decimal>,
    pub position_closes: bool,
}

fn pip(symbol: &str) -> Decimal {
    crate::symbols::pip_size(symbol)
}

/// Shift SL per the configured mode after a TP hit. `next_unfilled` is the
/// price of the next still-pending TP level outward, if any.
fn shift_sl(
    position: &Position,
    cfg: &MultiTpConfig,
    next_unfilled: Option<Decimal>,
) -> Option<Decimal> {
    let buffer = Decimal::try_from(cfg.default_sl_buffer_pips).unwrap_or(Decimal::ZERO) * pip(&position.symbol);
    let candidate = match cfg.default_sl_shift_mode {
        SlShiftMode::None => return None,
        SlShiftMode::BreakEven => match position.direction {
            Direction::Buy => position.entry_price + buffer,
            Direction::Sell => position.entry_price - buffer,
        },
        SlShiftMode::NextTp => match (next_unfilled, position.direction) {
            (Some(tp), Direction::Buy) => tp - buffer,
            (Some(tp), Direction::Sell) => tp + buffer,
            (None, _) => return None,
        },
    };

    // SL moves are monotone in the profit direction; never worsen it.
    let improves = match (position.direction, position.sl) {
        (Direction::Buy, Some(current)) => candidate > current,
        (Direction::Sell, Some(current)) => candidate < current,
        (_, None) => true,
    };

    improves.then_some(candidate)
}

/// Evaluate every still-pending TP level in outward order, returning the
/// first one that has been hit by `bid`/`ask` this tick. A TP is processed
/// at most once and volumes never go negative.
pub fn evaluate_hit(position: &Position, bid: Decimal, ask: Decimal, cfg: &MultiTpConfig) -> Option<TpHitAction> {
    let min_remaining = Decimal::try_from(cfg.min_remaining_volume).unwrap_or(Decimal::ZERO);

    let pending: Vec<&crate::types::TpLevel> = position
        .tp_plan_remaining
        .iter()
        .filter(|tp| tp.status == TpStatus::Pending)
        .collect();

    let (idx, level) = pending.iter().enumerate().find_map(|(i, tp)| {
        let hit = match position.direction {
            Direction::Buy => bid >= tp.price,
            Direction::Sell => ask <= tp.price,
        };
        hit.then_some((i, *tp))
    })?;

    let raw_close = (position.volume_at_intent * level.percentage / Decimal::from(100))
        .round_dp(8)
        .min(position.volume_remaining);

    let remainder_after = position.volume_remaining - raw_close;
    let is_last_pending = pending.len() == 1;
    let close_to_zero = remainder_after < min_remaining && !is_last_pending || is_last_pending;
    let close_volume = if close_to_zero { position.volume_remaining } else { raw_close };

    let position_closes = close_to_zero || (position.volume_remaining - close_volume) <= Decimal::ZERO;

    let next_unfilled = pending.get(idx + 1).map(|tp| tp.price);
    let new_sl = if position_closes {
        None
    } else {
        shift_sl(position, cfg, next_unfilled)
    };

    Some(TpHitAction {
        level_index: level.level_index,
        close_volume,
        close_to_zero,
        new_sl,
        position_closes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position_with_tps() -> Position {
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
            tp_plan_remaining: vec![
                crate::types::TpLevel {
                    level_index: 0,
                    price: dec!(1.1050),
                    percentage: dec!(50),
                    status: TpStatus::Pending,
                    closed_volume: Decimal::ZERO,
                    close_price: None,
                },
                crate::types::TpLevel {
                    level_index: 1,
                    price: dec!(1.1100),
                    percentage: dec!(50),
                    status: TpStatus::Pending,
                    closed_volume: Decimal::ZERO,
                    close_price: None,
                },
            ],
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
    fn first_tp_hit_closes_half_and_shifts_sl_to_breakeven() {
        let position = position_with_tps();
        let cfg = MultiTpConfig::default();
        let action = evaluate_hit(&position, dec!(1.1050), dec!(1.1049), &cfg).expect("tp1 hit");
        assert_eq!(action.level_index, 0);
        assert_eq!(action.close_volume, dec!(0.50000000));
        assert!(!action.position_closes);
        assert!(action.new_sl.is_some());
        assert!(action.new_sl.unwrap() > position.entry_price);
    }

    #[test]
    fn no_hit_when_price_has_not_reached_tp() {
        let position = position_with_tps();
        let cfg = MultiTpConfig::default();
        assert!(evaluate_hit(&position, dec!(1.1010), dec!(1.1009), &cfg).is_none());
    }

    #[test]
    fn last_tp_hit_closes_full_remaining() {
        let mut position = position_with_tps();
        position.tp_plan_remaining[0].status = TpStatus::Hit;
        position.volume_remaining = dec!(0.5);
        let cfg = MultiTpConfig::default();
        let action = evaluate_hit(&position, dec!(1.1100), dec!(1.1099), &cfg).expect("tp2 hit");
        assert_eq!(action.level_index, 1);
        assert!(action.position_closes);
        assert_eq!(action.close_volume, dec!(0.5));
    }
}
