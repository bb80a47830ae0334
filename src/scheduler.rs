// =============================================================================
// Scheduler (C21)
// =============================================================================
//
// Named periodic tick handles, one per monitor loop, built on
// `tokio::time::interval`. `main.rs` owns one `tokio::spawn`-per-concern task
// reading from each handle, with every monitor's cadence driven by a
// `RuntimeConfig` field instead of a fixed constant.
// =============================================================================

use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};

/// A single named tick source. Cloning a handle is cheap (`Interval` itself
/// is not `Clone`, so each consumer gets its own ticker built from the same
/// period instead of sharing state).
pub struct TickHandle {
    period: Duration,
}

impl TickHandle {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Build a fresh `tokio::time::Interval` firing at this handle's period.
    /// Ticks that are missed (e.g. the process was blocked) are coalesced
    /// rather than burst-fired.
    pub fn ticker(&self) -> Interval {
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick
    }
}

/// Every named cadence the runtime needs, built once from `RuntimeConfig` at
/// startup. Each field is handed to exactly one spawned task in `main.rs`.
pub struct Scheduler {
    pub multi_tp: TickHandle,
    pub trailing_stop: TickHandle,
    pub break_even: TickHandle,
    pub tp_sl_adjustor: TickHandle,
    pub market_data_refresh: TickHandle,
    pub multi_signal_process: TickHandle,
    pub smart_entry_poll: TickHandle,
    pub margin_guard_tick: TickHandle,
}

impl Scheduler {
    pub fn new(cfg: &crate::config::RuntimeConfig) -> Self {
        Self {
            multi_tp: TickHandle::new(Duration::from_millis(cfg.multi_tp.monitoring_interval_ms)),
            trailing_stop: TickHandle::new(Duration::from_secs(cfg.trailing_stop.update_interval_seconds)),
            break_even: TickHandle::new(Duration::from_secs(5)),
            tp_sl_adjustor: TickHandle::new(Duration::from_secs(cfg.tp_sl_adjustor.interval_seconds)),
            market_data_refresh: TickHandle::new(Duration::from_millis(500)),
            multi_signal_process: TickHandle::new(Duration::from_millis(cfg.multi_signal.processing_interval_ms)),
            smart_entry_poll: TickHandle::new(Duration::from_millis(cfg.smart_entry.poll_interval_ms)),
            margin_guard_tick: TickHandle::new(Duration::from_secs(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_handle_builds_interval_without_panicking() {
        let handle = TickHandle::new(Duration::from_millis(50));
        let _ticker = handle.ticker();
    }

    #[tokio::test]
    async fn scheduler_intervals_are_derived_from_config() {
        let cfg = crate::config::RuntimeConfig::default();
        let scheduler = Scheduler::new(&cfg);
        assert_eq!(scheduler.multi_tp.period, Duration::from_millis(cfg.multi_tp.monitoring_interval_ms));
    }
}
