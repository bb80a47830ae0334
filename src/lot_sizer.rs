// =============================================================================
// Lot Sizer (C3)
// =============================================================================
//
// Computes order volume from account balance, risk mode, SL distance, and
// text-derived overrides. `LotSizerConfig::risk_multipliers` keeps the
// keyword -> multiplier table open-ended so an operator can add extra
// aliases (`low`, `medium`, `high`, ...) on top of the four defaults
// (`conservative`, `normal`, `aggressive`, `max`) without a code change.
// =============================================================================

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::LotSizerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotSizeMode {
    FixedLot,
    RiskPercent,
    BalancePercent,
    FixedCash,
    PipValueTarget,
    TextOverride,
}

impl Default for LotSizeMode {
    fn default() -> Self {
        LotSizeMode::RiskPercent
    }
}

#[derive(Debug, Clone)]
pub struct LotSizeRequest {
    pub mode: LotSizeMode,
    pub parameter: Decimal,
    pub balance: Decimal,
    pub sl_distance_pips: Option<Decimal>,
    pub pip_value: Decimal,
    pub text_lot_hint: Option<Decimal>,
    pub risk_keyword: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LotSizeResult {
    pub volume: Decimal,
    pub degraded: bool,
}

/// A conservative fallback volume used when a mode needs SL distance that was
/// never provided.
fn conservative_default(cfg: &LotSizerConfig) -> Decimal {
    Decimal::try_from(cfg.min_lot).unwrap_or(Decimal::ZERO) * Decimal::from(2)
}

fn multiplier(cfg: &LotSizerConfig, keyword: Option<&str>) -> Decimal {
    let key = keyword.unwrap_or("normal").to_lowercase();
    cfg.risk_multipliers
        .get(&key)
        .copied()
        .and_then(|v| Decimal::try_from(v).ok())
        .unwrap_or(Decimal::ONE)
}

fn round_to_precision(value: Decimal, precision: u32) -> Decimal {
    value.round_dp(precision)
}

fn clamp(value: Decimal, cfg: &LotSizerConfig) -> Decimal {
    let min_lot = Decimal::try_from(cfg.min_lot).unwrap_or(Decimal::ZERO);
    let max_lot = Decimal::try_from(cfg.max_lot).unwrap_or(Decimal::MAX);
    value.clamp(min_lot, max_lot)
}

/// Find a risk keyword in free signal text against the configured
/// multiplier table (e.g. "aggressive", "conservative"). Longest keys are
/// checked first so a multi-word alias isn't shadowed by a shorter one.
pub fn detect_risk_keyword(text: &str, cfg: &LotSizerConfig) -> Option<String> {
    let lower = text.to_lowercase();
    let mut keys: Vec<&String> = cfg.risk_multipliers.keys().collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
    keys.into_iter().find(|k| lower.contains(k.as_str())).cloned()
}

/// Compute the order volume for a request. For `RiskPercent` with a known SL
/// distance: `volume = (balance * pct/100 * multiplier) / (sl_pips * pip_value)`.
pub fn size(req: &LotSizeRequest, cfg: &LotSizerConfig) -> LotSizeResult {
    let mult = multiplier(cfg, req.risk_keyword.as_deref());

    let raw = match req.mode {
        LotSizeMode::FixedLot => req.parameter,
        LotSizeMode::FixedCash => {
            if req.pip_value.is_zero() {
                return LotSizeResult {
                    volume: clamp(conservative_default(cfg), cfg),
                    degraded: true,
                };
            }
            (req.parameter * mult) / req.pip_value
        }
        LotSizeMode::BalancePercent => req.balance * (req.parameter / Decimal::from(100)) * mult,
        LotSizeMode::RiskPercent => match req.sl_distance_pips {
            Some(sl_pips) if sl_pips > Decimal::ZERO && !req.pip_value.is_zero() => {
                (req.balance * (req.parameter / Decimal::from(100)) * mult) / (sl_pips * req.pip_value)
            }
            _ => {
                return LotSizeResult {
                    volume: clamp(conservative_default(cfg), cfg),
                    degraded: true,
                };
            }
        },
        LotSizeMode::PipValueTarget => {
            if req.pip_value.is_zero() {
                return LotSizeResult {
                    volume: clamp(conservative_default(cfg), cfg),
                    degraded: true,
                };
            }
            req.parameter / req.pip_value
        }
        LotSizeMode::TextOverride => match req.text_lot_hint {
            Some(hint) => hint * mult,
            None => {
                return LotSizeResult {
                    volume: clamp(conservative_default(cfg), cfg),
                    degraded: true,
                };
            }
        },
    };

    LotSizeResult {
        volume: clamp(round_to_precision(raw, cfg.precision), cfg),
        degraded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cfg() -> LotSizerConfig {
        LotSizerConfig::default()
    }

    #[test]
    fn risk_percent_matches_formula() {
        let req = LotSizeRequest {
            mode: LotSizeMode::RiskPercent,
            parameter: dec!(1.0), // 1%
            balance: dec!(10000),
            sl_distance_pips: Some(dec!(20)),
            pip_value: dec!(10),
            text_lot_hint: None,
            risk_keyword: Some("normal".to_string()),
        };
        let result = size(&req, &cfg());
        // (10000 * 0.01 * 1.0) / (20 * 10) = 100 / 200 = 0.5
        assert_eq!(result.volume, dec!(0.50));
        assert!(!result.degraded);
    }

    #[test]
    fn aggressive_keyword_doubles_size() {
        let req = LotSizeRequest {
            mode: LotSizeMode::RiskPercent,
            parameter: dec!(1.0),
            balance: dec!(10000),
            sl_distance_pips: Some(dec!(20)),
            pip_value: dec!(10),
            text_lot_hint: None,
            risk_keyword: Some("aggressive".to_string()),
        };
        let result = size(&req, &cfg());
        assert_eq!(result.volume, dec!(1.00));
    }

    #[test]
    fn missing_sl_distance_degrades_to_conservative_default() {
        let req = LotSizeRequest {
            mode: LotSizeMode::RiskPercent,
            parameter: dec!(1.0),
            balance: dec!(10000),
            sl_distance_pips: None,
            pip_value: dec!(10),
            text_lot_hint: None,
            risk_keyword: None,
        };
        let result = size(&req, &cfg());
        assert!(result.degraded);
        assert!(result.volume >= Decimal::try_from(cfg().min_lot).unwrap());
    }

    #[test]
    fn detect_risk_keyword_finds_configured_alias() {
        let c = cfg();
        assert_eq!(
            detect_risk_keyword("BUY EURUSD aggressive entry now", &c),
            Some("aggressive".to_string())
        );
        assert_eq!(detect_risk_keyword("BUY EURUSD", &c), None);
    }

    #[test]
    fn volume_is_clamped_to_bounds() {
        let mut c = cfg();
        c.max_lot = 1.0;
        let req = LotSizeRequest {
            mode: LotSizeMode::FixedLot,
            parameter: dec!(50),
            balance: dec!(10000),
            sl_distance_pips: None,
            pip_value: dec!(10),
            text_lot_hint: None,
            risk_keyword: None,
        };
        let result = size(&req, &c);
        assert_eq!(result.volume, dec!(1));
    }
}
