// =============================================================================
// Break-Even Engine (C16)
// =============================================================================
//
// One-shot per position. Once fired, the caller (C13) unregisters the
// position from this engine — C15 (trailing stop) continues unattended
// from the new SL.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::BreakEvenConfig;
use crate::types::{Direction, Position};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum BreakEvenTrigger {
    FixedPips { profit_pips: Decimal },
    Percentage { profit_pct: Decimal },
    TimeBased { elapsed_minutes: i64 },
    RatioBased { ratio: Decimal },
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

fn profit_fraction(position: &Position, current_price: Decimal) -> Decimal {
    let diff = match position.direction {
        Direction::Buy => current_price - position.entry_price,
        Direction::Sell => position.entry_price - current_price,
    };
    if position.entry_price.is_zero() {
        Decimal::ZERO
    } else {
        diff / position.entry_price
    }
}

/// Evaluate all configured triggers in order, firing the first that matches.
/// `initial_risk_pips` is the distance from entry to the original SL, used by
/// `RATIO_BASED`; `None` disables that trigger.
pub fn evaluate(
    position: &Position,
    current_price: Decimal,
    now: DateTime<Utc>,
    cfg: &BreakEvenConfig,
    triggers: &[BreakEvenTrigger],
    initial_risk_pips: Option<Decimal>,
) -> Option<Decimal> {
    let profit_p = profit_pips(position, current_price);
    if cfg.only_when_profitable && profit_p <= Decimal::ZERO {
        return None;
    }

    let fired = triggers.iter().any(|t| match t {
        BreakEvenTrigger::FixedPips { profit_pips: threshold } => profit_p >= *threshold,
        BreakEvenTrigger::Percentage { profit_pct } => {
            profit_fraction(position, current_price) * Decimal::from(100) >= *profit_pct
        }
        BreakEvenTrigger::TimeBased { elapsed_minutes } => {
            let elapsed = (now - position.open_time).num_minutes();
            elapsed >= *elapsed_minutes && profit_p > Decimal::ZERO
        }
        BreakEvenTrigger::RatioBased { ratio } => match initial_risk_pips {
            Some(risk) if !risk.is_zero() => (profit_p / risk) >= *ratio,
            _ => false,
        },
    });

    if !fired {
        return None;
    }

    let buffer = Decimal::try_from(cfg.buffer_pips).unwrap_or(Decimal::ZERO) * pip(&position.symbol);
    let candidate = match position.direction {
        Direction::Buy => position.entry_price + buffer,
        Direction::Sell => position.entry_price - buffer,
    };

    let strictly_better = match (position.direction, position.sl) {
        (Direction::Buy, Some(current)) => candidate > current,
        (Direction::Sell, Some(current)) => candidate < current,
        (_, None) => true,
    };

    strictly_better.then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
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
            open_time: Utc::now() - Duration::minutes(40),
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
    fn fixed_pips_trigger_moves_sl_to_entry_plus_buffer() {
        let position = position();
        let cfg = BreakEvenConfig::default();
        let triggers = vec![BreakEvenTrigger::FixedPips { profit_pips: dec!(5) }];
        let sl = evaluate(&position, dec!(1.1010), Utc::now(), &cfg, &triggers, None).expect("fires");
        assert!(sl > position.entry_price);
    }

    #[test]
    fn time_based_trigger_requires_positive_profit() {
        let position = position();
        let cfg = BreakEvenConfig::default();
        let triggers = vec![BreakEvenTrigger::TimeBased { elapsed_minutes: 30 }];
        assert!(evaluate(&position, dec!(1.0990), Utc::now(), &cfg, &triggers, None).is_none());
        assert!(evaluate(&position, dec!(1.1005), Utc::now(), &cfg, &triggers, None).is_some());
    }

    #[test]
    fn refuses_to_worsen_existing_sl() {
        let mut position = position();
        position.sl = Some(dec!(1.1005));
        let cfg = BreakEvenConfig::default();
        let triggers = vec![BreakEvenTrigger::FixedPips { profit_pips: dec!(5) }];
        assert!(evaluate(&position, dec!(1.1010), Utc::now(), &cfg, &triggers, None).is_none());
    }
}
