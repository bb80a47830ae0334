// =============================================================================
// Volatility Model (C17 dependency)
// =============================================================================
//
// `TpSlAdjustor::tick` and the condition router's `Volatility` field both
// need a 0.0-2.0-ish scale factor per symbol. This module resolves that with
// a trait seam plus a static placeholder. A real implementation (rolling
// ATR/stdev over `QuoteCache` history) can replace `StaticVolatilityModel`
// without touching any caller.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

pub trait VolatilityModel: Send + Sync {
    /// A multiplicative scale factor for `symbol`: `1.0` is "normal",
    /// `>1.0` is more volatile than normal, `<1.0` is calmer.
    fn score(&self, symbol: &str) -> f64;
}

/// Returns a fixed per-symbol score (default `1.0`), settable at runtime.
/// Used until a real volatility estimator is wired in.
pub struct StaticVolatilityModel {
    scores: RwLock<HashMap<String, f64>>,
    default_score: f64,
}

impl StaticVolatilityModel {
    pub fn new(default_score: f64) -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
            default_score,
        }
    }

    pub fn set(&self, symbol: &str, score: f64) {
        self.scores.write().insert(symbol.to_string(), score);
    }
}

impl Default for StaticVolatilityModel {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl VolatilityModel for StaticVolatilityModel {
    fn score(&self, symbol: &str) -> f64 {
        self.scores.read().get(symbol).copied().unwrap_or(self.default_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_symbol_returns_default_score() {
        let model = StaticVolatilityModel::default();
        assert_eq!(model.score("EURUSD"), 1.0);
    }

    #[test]
    fn set_overrides_default_for_that_symbol() {
        let model = StaticVolatilityModel::default();
        model.set("XAUUSD", 1.8);
        assert_eq!(model.score("XAUUSD"), 1.8);
        assert_eq!(model.score("EURUSD"), 1.0);
    }
}
