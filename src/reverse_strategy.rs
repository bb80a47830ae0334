// =============================================================================
// Reverse Strategy (C9)
// =============================================================================
//
// Priority-ordered rule list evaluated against a signal; the first matching
// rule's action wins.
// =============================================================================

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::persistence;
use crate::types::{Direction, ReverseAction, Signal};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    Always,
    HighVolatility { threshold: f64 },
    ProviderSpecific { provider_id: String },
    SymbolSpecific { symbol: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseRule {
    pub rule_id: String,
    pub condition: Condition,
    pub action: ReverseAction,
    #[serde(default)]
    pub symbol_filter: Option<String>,
    #[serde(default)]
    pub provider_filter: Option<String>,
    #[serde(default)]
    pub param_tweaks: Vec<(String, Decimal)>,
    pub enabled: bool,
}

/// Result of applying a matched rule to a signal.
#[derive(Debug, Clone)]
pub struct ReverseOutcome {
    pub direction: Direction,
    pub sl: Option<Decimal>,
    pub tps: Vec<Decimal>,
    pub dropped: bool,
    pub param_tweaks: Vec<(String, Decimal)>,
    pub matched_rule_id: Option<String>,
}

/// One applied reversal, kept for the on-disk reversal history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversalLogEntry {
    pub signal_id: String,
    pub symbol: String,
    pub rule_id: String,
    pub original_direction: Direction,
    pub resulting_direction: Direction,
    pub dropped: bool,
    pub at: DateTime<Utc>,
}

const REVERSAL_LOG_CAP: usize = 5000;
const REVERSE_STRATEGY_STATE_VERSION: u32 = 1;

pub struct ReverseStrategy {
    rules: RwLock<Vec<ReverseRule>>,
    log: RwLock<Vec<ReversalLogEntry>>,
    state_path: Option<PathBuf>,
}

impl ReverseStrategy {
    pub fn new(rules: Vec<ReverseRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            log: RwLock::new(Vec::new()),
            state_path: None,
        }
    }

    /// Same as `new`, but restores the applied-reversal log from `path` if
    /// present, and flushes back to it on every applied reversal.
    pub fn new_with_persistence(rules: Vec<ReverseRule>, path: PathBuf) -> Self {
        let log = persistence::load_or_default::<Vec<ReversalLogEntry>>(&path);
        Self {
            rules: RwLock::new(rules),
            log: RwLock::new(log),
            state_path: Some(path),
        }
    }

    pub fn log(&self) -> Vec<ReversalLogEntry> {
        self.log.read().clone()
    }

    fn persist(&self, log: &[ReversalLogEntry]) {
        if let Some(path) = &self.state_path {
            if let Err(e) = persistence::save_atomic(path, REVERSE_STRATEGY_STATE_VERSION, &log) {
                warn!(error = %e, "failed to persist reverse-strategy log");
            }
        }
    }

    pub fn set_rules(&self, rules: Vec<ReverseRule>) {
        *self.rules.write() = rules;
    }

    fn matches(rule: &ReverseRule, signal: &Signal, current_volatility: Option<f64>) -> bool {
        if !rule.enabled {
            return false;
        }
        if let Some(symbol) = &rule.symbol_filter {
            if symbol != &signal.symbol {
                return false;
            }
        }
        if let Some(provider) = &rule.provider_filter {
            if provider != &signal.provider_id {
                return false;
            }
        }
        match &rule.condition {
            Condition::Always => true,
            Condition::HighVolatility { threshold } => {
                current_volatility.map(|v| v >= *threshold).unwrap_or(false)
            }
            Condition::ProviderSpecific { provider_id } => provider_id == &signal.provider_id,
            Condition::SymbolSpecific { symbol } => symbol == &signal.symbol,
        }
    }

    /// Evaluate the rule list in order against `signal`; returns `None` if no
    /// rule matches (caller should treat the signal as unaltered).
    pub fn apply(&self, signal: &Signal, current_volatility: Option<f64>) -> Option<ReverseOutcome> {
        let rules = self.rules.read();
        let rule = rules.iter().find(|r| Self::matches(r, signal, current_volatility))?;

        let outcome = match rule.action {
            ReverseAction::FullReverse => {
                let tp1 = signal.tps.first().copied();
                ReverseOutcome {
                    direction: signal.direction.opposite(),
                    sl: tp1,
                    tps: signal.sl.into_iter().collect(),
                    dropped: false,
                    param_tweaks: vec![],
                    matched_rule_id: Some(rule.rule_id.clone()),
                }
            }
            ReverseAction::DirectionOnly => ReverseOutcome {
                direction: signal.direction.opposite(),
                sl: signal.sl,
                tps: signal.tps.clone(),
                dropped: false,
                param_tweaks: vec![],
                matched_rule_id: Some(rule.rule_id.clone()),
            },
            ReverseAction::IgnoreSignal => ReverseOutcome {
                direction: signal.direction,
                sl: signal.sl,
                tps: signal.tps.clone(),
                dropped: true,
                param_tweaks: vec![],
                matched_rule_id: Some(rule.rule_id.clone()),
            },
            ReverseAction::ModifyParams => ReverseOutcome {
                direction: signal.direction,
                sl: signal.sl,
                tps: signal.tps.clone(),
                dropped: false,
                param_tweaks: rule.param_tweaks.clone(),
                matched_rule_id: Some(rule.rule_id.clone()),
            },
        };

        drop(rules);
        let entry = ReversalLogEntry {
            signal_id: signal.signal_id.clone(),
            symbol: signal.symbol.clone(),
            rule_id: outcome.matched_rule_id.clone().unwrap_or_default(),
            original_direction: signal.direction,
            resulting_direction: outcome.direction,
            dropped: outcome.dropped,
            at: Utc::now(),
        };
        let mut log = self.log.write();
        log.push(entry);
        if log.len() > REVERSAL_LOG_CAP {
            let excess = log.len() - REVERSAL_LOG_CAP;
            log.drain(0..excess);
        }
        self.persist(&log[..]);
        drop(log);

        Some(outcome)
    }
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
            provider_id: "provA".to_string(),
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
    fn full_reverse_swaps_sl_and_tp() {
        let strategy = ReverseStrategy::new(vec![ReverseRule {
            rule_id: "r1".to_string(),
            condition: Condition::Always,
            action: ReverseAction::FullReverse,
            symbol_filter: None,
            provider_filter: None,
            param_tweaks: vec![],
            enabled: true,
        }]);
        let outcome = strategy.apply(&signal(), None).expect("match");
        assert_eq!(outcome.direction, Direction::Sell);
        assert_eq!(outcome.sl, Some(dec!(1.1050)));
        assert_eq!(outcome.tps, vec![dec!(1.0950)]);
    }

    #[test]
    fn no_matching_rule_returns_none() {
        let strategy = ReverseStrategy::new(vec![ReverseRule {
            rule_id: "r1".to_string(),
            condition: Condition::SymbolSpecific { symbol: "GBPUSD".to_string() },
            action: ReverseAction::FullReverse,
            symbol_filter: None,
            provider_filter: None,
            param_tweaks: vec![],
            enabled: true,
        }]);
        assert!(strategy.apply(&signal(), None).is_none());
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let strategy = ReverseStrategy::new(vec![
            ReverseRule {
                rule_id: "disabled".to_string(),
                condition: Condition::Always,
                action: ReverseAction::IgnoreSignal,
                symbol_filter: None,
                provider_filter: None,
                param_tweaks: vec![],
                enabled: false,
            },
            ReverseRule {
                rule_id: "fallback".to_string(),
                condition: Condition::Always,
                action: ReverseAction::DirectionOnly,
                symbol_filter: None,
                provider_filter: None,
                param_tweaks: vec![],
                enabled: true,
            },
        ]);
        let outcome = strategy.apply(&signal(), None).expect("fallback matches");
        assert_eq!(outcome.matched_rule_id, Some("fallback".to_string()));
    }
}
