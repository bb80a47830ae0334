// =============================================================================
// Signal Rate Limiter (C7)
// =============================================================================
//
// Three independent sliding-window scopes (symbol, provider, global), each
// with hourly and daily caps, plus a per-symbol cooldown and a bounded
// emergency override.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RateLimiterConfig;
use crate::persistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    Symbol,
    Provider,
    Global,
}

impl std::fmt::Display for RateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symbol => write!(f, "symbol"),
            Self::Provider => write!(f, "provider"),
            Self::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RateLimitDecision {
    Allowed,
    Blocked {
        scope: RateScope,
        current: u32,
        limit: u32,
        reset_at: DateTime<Utc>,
    },
    BlockedCooldown {
        retry_at: DateTime<Utc>,
    },
}

#[derive(Default, Serialize, Deserialize)]
struct Window {
    hourly: VecDeque<DateTime<Utc>>,
    daily: VecDeque<DateTime<Utc>>,
}

impl Window {
    fn prune(&mut self, now: DateTime<Utc>) {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::days(1);
        while self.hourly.front().is_some_and(|t| *t < hour_ago) {
            self.hourly.pop_front();
        }
        while self.daily.front().is_some_and(|t| *t < day_ago) {
            self.daily.pop_front();
        }
    }

    fn push(&mut self, now: DateTime<Utc>) {
        self.hourly.push_back(now);
        self.daily.push_back(now);
    }
}

#[derive(Default, Serialize, Deserialize)]
struct Inner {
    symbol_windows: HashMap<String, Window>,
    provider_windows: HashMap<String, Window>,
    global_window: Window,
    last_signal_per_symbol: HashMap<String, DateTime<Utc>>,
    emergency_overrides_today: u32,
    emergency_overrides_day: Option<chrono::NaiveDate>,
    emergency_active_until: Option<DateTime<Utc>>,
}

pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<Inner>,
    state_path: Option<PathBuf>,
}

const RATE_LIMITER_STATE_VERSION: u32 = 1;

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(Inner::default()),
            state_path: None,
        }
    }

    /// Same as `new`, but restores sliding windows and cooldown bookkeeping
    /// from `path` if present, and flushes back to it on every mutation.
    pub fn new_with_persistence(cfg: RateLimiterConfig, path: PathBuf) -> Self {
        let state = persistence::load_or_default::<Inner>(&path);
        Self {
            cfg,
            state: Mutex::new(state),
            state_path: Some(path),
        }
    }

    fn persist(&self, state: &Inner) {
        if let Some(path) = &self.state_path {
            if let Err(e) = persistence::save_atomic(path, RATE_LIMITER_STATE_VERSION, state) {
                warn!(error = %e, "failed to persist rate-limiter state");
            }
        }
    }

    fn limits_for(&self, symbol: &str, provider: &str) -> (u32, u32, u32, u32, u32, u32) {
        let symbol_hourly = self
            .cfg
            .symbol_specific_hourly
            .get(symbol)
            .copied()
            .unwrap_or(self.cfg.symbol_hourly_limit);
        let provider_hourly = self
            .cfg
            .provider_specific_hourly
            .get(provider)
            .copied()
            .unwrap_or(self.cfg.provider_hourly_limit);
        (
            symbol_hourly,
            self.cfg.symbol_daily_limit,
            provider_hourly,
            self.cfg.provider_daily_limit,
            self.cfg.global_hourly_limit,
            self.cfg.global_daily_limit,
        )
    }

    /// Activate an emergency override lasting `duration`, bypassing caps and
    /// cooldown, unless the daily activation budget is exhausted.
    pub fn activate_emergency_override(&self, now: DateTime<Utc>, duration: Duration) -> bool {
        let mut state = self.state.lock();
        let today = now.date_naive();
        if state.emergency_overrides_day != Some(today) {
            state.emergency_overrides_day = Some(today);
            state.emergency_overrides_today = 0;
        }
        if state.emergency_overrides_today >= self.cfg.emergency_override_per_day {
            warn!("emergency override budget exhausted for today");
            return false;
        }
        state.emergency_overrides_today += 1;
        state.emergency_active_until = Some(now + duration);
        info!(until = %(now + duration), "emergency rate-limit override activated");
        self.persist(&state);
        true
    }

    fn emergency_active(state: &Inner, now: DateTime<Utc>) -> bool {
        state.emergency_active_until.is_some_and(|until| now < until)
    }

    pub fn check(&self, symbol: &str, provider: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let mut state = self.state.lock();
        let emergency = Self::emergency_active(&state, now);

        let (sym_h, sym_d, prov_h, prov_d, glob_h, glob_d) = self.limits_for(symbol, provider);

        let sym_win = state.symbol_windows.entry(symbol.to_string()).or_default();
        sym_win.prune(now);
        let symbol_hourly_count = sym_win.hourly.len() as u32;
        let symbol_daily_count = sym_win.daily.len() as u32;

        if !emergency {
            if symbol_hourly_count >= sym_h {
                let reset_at = sym_win.hourly.front().copied().unwrap_or(now) + Duration::hours(1);
                return RateLimitDecision::Blocked {
                    scope: RateScope::Symbol,
                    current: symbol_hourly_count,
                    limit: sym_h,
                    reset_at,
                };
            }
            if symbol_daily_count >= sym_d {
                let reset_at = sym_win.daily.front().copied().unwrap_or(now) + Duration::days(1);
                return RateLimitDecision::Blocked {
                    scope: RateScope::Symbol,
                    current: symbol_daily_count,
                    limit: sym_d,
                    reset_at,
                };
            }
        }

        let prov_win = state.provider_windows.entry(provider.to_string()).or_default();
        prov_win.prune(now);
        let provider_hourly_count = prov_win.hourly.len() as u32;
        let provider_daily_count = prov_win.daily.len() as u32;

        if !emergency {
            if provider_hourly_count >= prov_h {
                let reset_at = prov_win.hourly.front().copied().unwrap_or(now) + Duration::hours(1);
                return RateLimitDecision::Blocked {
                    scope: RateScope::Provider,
                    current: provider_hourly_count,
                    limit: prov_h,
                    reset_at,
                };
            }
            if provider_daily_count >= prov_d {
                let reset_at = prov_win.daily.front().copied().unwrap_or(now) + Duration::days(1);
                return RateLimitDecision::Blocked {
                    scope: RateScope::Provider,
                    current: provider_daily_count,
                    limit: prov_d,
                    reset_at,
                };
            }
        }

        state.global_window.prune(now);
        let global_hourly_count = state.global_window.hourly.len() as u32;
        let global_daily_count = state.global_window.daily.len() as u32;

        if !emergency {
            if global_hourly_count >= glob_h {
                let reset_at = state.global_window.hourly.front().copied().unwrap_or(now) + Duration::hours(1);
                return RateLimitDecision::Blocked {
                    scope: RateScope::Global,
                    current: global_hourly_count,
                    limit: glob_h,
                    reset_at,
                };
            }
            if global_daily_count >= glob_d {
                let reset_at = state.global_window.daily.front().copied().unwrap_or(now) + Duration::days(1);
                return RateLimitDecision::Blocked {
                    scope: RateScope::Global,
                    current: global_daily_count,
                    limit: glob_d,
                    reset_at,
                };
            }
        }

        if !emergency {
            if let Some(last) = state.last_signal_per_symbol.get(symbol) {
                let cooldown = Duration::minutes(self.cfg.cooldown_minutes as i64);
                if now - *last < cooldown {
                    return RateLimitDecision::BlockedCooldown {
                        retry_at: *last + cooldown,
                    };
                }
            }
        }

        self.record(symbol, provider, now, &mut state);
        self.persist(&state);
        RateLimitDecision::Allowed
    }

    fn record(&self, symbol: &str, provider: &str, now: DateTime<Utc>, state: &mut Inner) {
        state.symbol_windows.entry(symbol.to_string()).or_default().push(now);
        state.provider_windows.entry(provider.to_string()).or_default().push(now);
        state.global_window.push(now);
        state.last_signal_per_symbol.insert(symbol.to_string(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RateLimiterConfig {
        let mut c = RateLimiterConfig::default();
        c.symbol_hourly_limit = 2;
        c.cooldown_minutes = 5;
        c
    }

    #[test]
    fn blocks_once_symbol_hourly_cap_reached() {
        let limiter = RateLimiter::new(cfg());
        let t0 = Utc::now();
        assert!(matches!(
            limiter.check("EURUSD", "provA", t0),
            RateLimitDecision::Allowed
        ));
        assert!(matches!(
            limiter.check("EURUSD", "provA", t0 + Duration::minutes(6)),
            RateLimitDecision::Allowed
        ));
        let decision = limiter.check("EURUSD", "provA", t0 + Duration::minutes(12));
        assert!(matches!(
            decision,
            RateLimitDecision::Blocked {
                scope: RateScope::Symbol,
                ..
            }
        ));
    }

    #[test]
    fn cooldown_blocks_rapid_repeat() {
        let limiter = RateLimiter::new(cfg());
        let t0 = Utc::now();
        limiter.check("EURUSD", "provA", t0);
        let decision = limiter.check("EURUSD", "provA", t0 + Duration::minutes(1));
        assert!(matches!(decision, RateLimitDecision::BlockedCooldown { .. }));
    }

    #[test]
    fn emergency_override_bypasses_cooldown() {
        let limiter = RateLimiter::new(cfg());
        let t0 = Utc::now();
        assert!(limiter.activate_emergency_override(t0, Duration::minutes(30)));
        limiter.check("EURUSD", "provA", t0);
        let decision = limiter.check("EURUSD", "provA", t0 + Duration::seconds(5));
        assert!(matches!(decision, RateLimitDecision::Allowed));
    }

    #[test]
    fn emergency_override_budget_is_bounded() {
        let mut c = cfg();
        c.emergency_override_per_day = 1;
        let limiter = RateLimiter::new(c);
        let t0 = Utc::now();
        assert!(limiter.activate_emergency_override(t0, Duration::minutes(1)));
        assert!(!limiter.activate_emergency_override(t0, Duration::minutes(1)));
    }
}
