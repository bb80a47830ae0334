// =============================================================================
// Signal Simulator (C20)
// =============================================================================
//
// Dry-runs a signal through the policy stack (C3-C10) against a
// `SentinelBroker` quote, never touching a real broker. Used by the REST
// `/simulate` endpoint and by tests.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::broker::Quote;
use crate::config::RuntimeConfig;
use crate::entry_resolver;
use crate::lot_sizer::{self, LotSizeRequest};
use crate::reverse_strategy::ReverseStrategy;
use crate::router::{ConditionRouter, RoutingContext};
use crate::symbols::pip_size;
use crate::types::{Direction, RouteAction, Signal};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub entry: Decimal,
    pub sl: Option<Decimal>,
    pub tps: Vec<Decimal>,
    pub lot: Decimal,
    pub mode: String,
    pub valid: bool,
    pub warnings: Vec<String>,
}

/// Run `signal` through the policy stack against `quote` and `balance`,
/// without placing any order. `reverse` and `router` may be `None` to skip
/// those stages (the typical preview use case only needs C3-C5).
pub fn simulate(
    signal: &Signal,
    cfg: &RuntimeConfig,
    quote: Quote,
    balance: Decimal,
    reverse: Option<&ReverseStrategy>,
    router: Option<&ConditionRouter>,
) -> SimulationResult {
    let mut warnings = Vec::new();

    // C10: route first — a BLOCK/DELAY short-circuits everything downstream.
    if let Some(router) = router {
        let ctx = RoutingContext {
            confidence: Some(signal.confidence),
            provider: Some(signal.provider_id.clone()),
            spread_pips: Some(
                (quote.spread() / pip_size(&signal.symbol))
                    .to_string()
                    .parse()
                    .unwrap_or(0.0),
            ),
            ..Default::default()
        };
        let decision = router.route(&signal.signal_id, &ctx);
        match decision.action {
            RouteAction::BlockSignal { reason } => {
                return SimulationResult {
                    entry: Decimal::ZERO,
                    sl: None,
                    tps: vec![],
                    lot: Decimal::ZERO,
                    mode: "blocked".to_string(),
                    valid: false,
                    warnings: vec![format!("blocked by router: {reason}")],
                };
            }
            RouteAction::DelaySignal { minutes } => {
                warnings.push(format!("router would delay this signal by {minutes} minutes"));
            }
            _ => {}
        }
    }

    // C9: reverse strategy may flip direction/SL/TP.
    let (direction, sl, tps) = match reverse.and_then(|r| r.apply(signal, None)) {
        Some(outcome) if !outcome.dropped => (outcome.direction, outcome.sl, outcome.tps),
        Some(_) => {
            return SimulationResult {
                entry: Decimal::ZERO,
                sl: None,
                tps: vec![],
                lot: Decimal::ZERO,
                mode: "ignored".to_string(),
                valid: false,
                warnings: vec!["signal ignored by reverse-strategy rule".to_string()],
            };
        }
        None => (signal.direction, signal.sl, signal.tps.clone()),
    };

    // C4: entry resolution.
    let mode = entry_resolver::detect_mode_keyword(&signal.original_text).unwrap_or_default();
    let current_price = match direction {
        Direction::Buy => quote.ask,
        Direction::Sell => quote.bid,
    };
    let entry = entry_resolver::resolve(&signal.entries, direction, current_price, mode).unwrap_or(current_price);

    // C3: lot sizing.
    let pip = pip_size(&signal.symbol);
    let sl_distance_pips = sl.map(|level| ((entry - level).abs() / pip));
    let pip_value = crate::symbols::pip_value(&signal.symbol, "USD");
    let risk_keyword = lot_sizer::detect_risk_keyword(&signal.original_text, &cfg.lot_sizer);
    let lot_request = LotSizeRequest {
        mode: cfg.lot_sizer.default_mode,
        parameter: Decimal::try_from(cfg.lot_sizer.default_parameter).unwrap_or(Decimal::ONE),
        balance,
        sl_distance_pips,
        pip_value,
        text_lot_hint: signal.volume,
        risk_keyword,
    };
    let lot_result = lot_sizer::size(&lot_request, &cfg.lot_sizer);
    if lot_result.degraded {
        warnings.push("lot sizing degraded to conservative default (missing SL distance)".to_string());
    }

    let valid = validate_direction_consistency(direction, entry, sl, &tps);
    if !valid {
        warnings.push("price/direction consistency check failed".to_string());
    }

    SimulationResult {
        entry,
        sl,
        tps,
        lot: lot_result.volume,
        mode: format!("{mode:?}"),
        valid,
        warnings,
    }
}

/// BUY: SL < entry < TP; SELL: SL > entry > TP.
fn validate_direction_consistency(direction: Direction, entry: Decimal, sl: Option<Decimal>, tps: &[Decimal]) -> bool {
    let sl_ok = sl.map(|s| match direction {
        Direction::Buy => s < entry,
        Direction::Sell => s > entry,
    }).unwrap_or(true);

    let tps_ok = tps.iter().all(|tp| match direction {
        Direction::Buy => *tp > entry,
        Direction::Sell => *tp < entry,
    });

    sl_ok && tps_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use crate::types::Priority;

    fn signal() -> Signal {
        Signal {
            signal_id: "s1".to_string(),
            message_id: "m1".to_string(),
            provider_id: "p1".to_string(),
            timestamp: Utc::now(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            entries: vec![dec!(1.1000)],
            sl: Some(dec!(1.0950)),
            tps: vec![dec!(1.1050), dec!(1.1100)],
            volume: None,
            confidence: 0.8,
            priority: Priority::Medium,
            original_text: String::new(),
            split_index: None,
        }
    }

    #[test]
    fn valid_buy_signal_passes_consistency_check() {
        let cfg = RuntimeConfig::default();
        let quote = Quote { bid: dec!(1.0999), ask: dec!(1.1001), time: Utc::now() };
        let result = simulate(&signal(), &cfg, quote, dec!(10000), None, None);
        assert!(result.valid);
        assert!(result.lot > Decimal::ZERO);
    }

    #[test]
    fn inconsistent_sl_direction_is_flagged_invalid() {
        let mut bad_signal = signal();
        bad_signal.sl = Some(dec!(1.1100)); // SL above entry for a BUY: invalid
        let cfg = RuntimeConfig::default();
        let quote = Quote { bid: dec!(1.0999), ask: dec!(1.1001), time: Utc::now() };
        let result = simulate(&bad_signal, &cfg, quote, dec!(10000), None, None);
        assert!(!result.valid);
    }

    #[test]
    fn aggressive_keyword_in_text_increases_lot_size() {
        let cfg = RuntimeConfig::default();
        let quote = Quote { bid: dec!(1.0999), ask: dec!(1.1001), time: Utc::now() };
        let baseline = simulate(&signal(), &cfg, quote, dec!(10000), None, None);

        let mut aggressive = signal();
        aggressive.original_text = "BUY EURUSD aggressive".to_string();
        let boosted = simulate(&aggressive, &cfg, quote, dec!(10000), None, None);

        assert!(boosted.lot > baseline.lot);
    }

    #[test]
    fn router_block_short_circuits_pipeline() {
        use crate::router::{Combinator, Condition, ConditionRouter, Field, FieldValue, Op, RouteRule};
        let rules = vec![RouteRule {
            rule_id: "block-low-conf".to_string(),
            conditions: vec![Condition { field: Field::Confidence, op: Op::Lt, value: FieldValue::Number(0.5) }],
            combinator: Combinator::And,
            action: RouteAction::BlockSignal { reason: "low confidence".to_string() },
        }];
        let router = ConditionRouter::new(rules, RouteAction::ProcessNormal);
        let mut low_conf = signal();
        low_conf.confidence = 0.1;
        let cfg = RuntimeConfig::default();
        let quote = Quote { bid: dec!(1.0999), ask: dec!(1.1001), time: Utc::now() };
        let result = simulate(&low_conf, &cfg, quote, dec!(10000), None, Some(&router));
        assert!(!result.valid);
        assert_eq!(result.mode, "blocked");
    }
}
