// =============================================================================
// Spread Gate (C5)
// =============================================================================
//
// Structured, per-symbol-configurable spread decision. Consulted by C13
// immediately before placement and by C12 during smart-wait polling.
// =============================================================================

use std::sync::Arc;

use crate::config::SpreadConfig;
use crate::market_data::QuoteCache;
use crate::types::SpreadDecision;

pub struct SpreadGate {
    quotes: Arc<QuoteCache>,
}

impl SpreadGate {
    pub fn new(quotes: Arc<QuoteCache>) -> Self {
        Self { quotes }
    }

    fn threshold_for(symbol: &str, cfg: &SpreadConfig) -> f64 {
        cfg.symbol_thresholds_pips
            .get(symbol)
            .copied()
            .unwrap_or(cfg.default_threshold_pips)
    }

    pub async fn check(&self, symbol: &str, cfg: &SpreadConfig) -> SpreadDecision {
        let spread_pips = match self.quotes.spread_pips(symbol).await {
            Ok(s) => s,
            Err(_) => {
                // No fresh quote: treat conservatively as blocked, not allowed.
                return SpreadDecision::BlockedHighSpread {
                    current_pips: f64::INFINITY,
                    threshold_pips: Self::threshold_for(symbol, cfg),
                };
            }
        };

        let threshold = Self::threshold_for(symbol, cfg);
        if spread_pips > threshold {
            if cfg.defer_instead_of_block {
                let overshoot = (spread_pips - threshold).max(0.0);
                let delay_ms = (overshoot * 200.0).min(5000.0) as u64 + 250;
                SpreadDecision::Defer { delay_ms }
            } else {
                SpreadDecision::BlockedHighSpread {
                    current_pips: spread_pips,
                    threshold_pips: threshold,
                }
            }
        } else {
            SpreadDecision::Allow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_prefers_symbol_override() {
        let mut cfg = SpreadConfig::default();
        cfg.default_threshold_pips = 3.0;
        cfg.symbol_thresholds_pips.insert("XAUUSD".to_string(), 8.0);
        assert_eq!(SpreadGate::threshold_for("XAUUSD", &cfg), 8.0);
        assert_eq!(SpreadGate::threshold_for("EURUSD", &cfg), 3.0);
    }
}
