// =============================================================================
// Runtime Configuration — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub: every tunable parameter for every policy engine
// lives here so the system can be reconfigured without a restart. Every field
// carries a serde default so that adding a field never breaks loading an
// older config file, and persistence uses the tmp+rename atomic write from
// `persistence.rs`.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{AccountMode, ConflictResolution, TradingMode};

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec!["EURUSD".to_string(), "GBPUSD".to_string(), "XAUUSD".to_string()]
}

// --- Rate limiter -----------------------------------------------------------

fn default_symbol_hourly_limit() -> u32 {
    10
}
fn default_symbol_daily_limit() -> u32 {
    40
}
fn default_provider_hourly_limit() -> u32 {
    30
}
fn default_provider_daily_limit() -> u32 {
    150
}
fn default_global_hourly_limit() -> u32 {
    60
}
fn default_global_daily_limit() -> u32 {
    300
}
fn default_cooldown_minutes() -> u32 {
    2
}
fn default_emergency_override_limit() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_symbol_hourly_limit")]
    pub symbol_hourly_limit: u32,
    #[serde(default = "default_symbol_daily_limit")]
    pub symbol_daily_limit: u32,
    #[serde(default = "default_provider_hourly_limit")]
    pub provider_hourly_limit: u32,
    #[serde(default = "default_provider_daily_limit")]
    pub provider_daily_limit: u32,
    #[serde(default = "default_global_hourly_limit")]
    pub global_hourly_limit: u32,
    #[serde(default = "default_global_daily_limit")]
    pub global_daily_limit: u32,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    #[serde(default = "default_emergency_override_limit")]
    pub emergency_override_per_day: u32,
    #[serde(default)]
    pub symbol_specific_hourly: HashMap<String, u32>,
    #[serde(default)]
    pub provider_specific_hourly: HashMap<String, u32>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            symbol_hourly_limit: default_symbol_hourly_limit(),
            symbol_daily_limit: default_symbol_daily_limit(),
            provider_hourly_limit: default_provider_hourly_limit(),
            provider_daily_limit: default_provider_daily_limit(),
            global_hourly_limit: default_global_hourly_limit(),
            global_daily_limit: default_global_daily_limit(),
            cooldown_minutes: default_cooldown_minutes(),
            emergency_override_per_day: default_emergency_override_limit(),
            symbol_specific_hourly: HashMap::new(),
            provider_specific_hourly: HashMap::new(),
        }
    }
}

// --- Margin guard ------------------------------------------------------------

fn default_safe_level() -> f64 {
    300.0
}
fn default_warning_level() -> f64 {
    200.0
}
fn default_critical_level() -> f64 {
    150.0
}
fn default_margin_call_level() -> f64 {
    100.0
}
fn default_emergency_close_level() -> f64 {
    110.0
}
fn default_alert_cooldown_minutes() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginConfig {
    #[serde(default = "default_safe_level")]
    pub safe_level: f64,
    #[serde(default = "default_warning_level")]
    pub warning_level: f64,
    #[serde(default = "default_critical_level")]
    pub critical_level: f64,
    #[serde(default = "default_margin_call_level")]
    pub margin_call_level: f64,
    #[serde(default = "default_emergency_close_level")]
    pub emergency_close_level: f64,
    #[serde(default = "default_alert_cooldown_minutes")]
    pub alert_cooldown_minutes: u32,
    #[serde(default)]
    pub emergency_close_enabled: bool,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            safe_level: default_safe_level(),
            warning_level: default_warning_level(),
            critical_level: default_critical_level(),
            margin_call_level: default_margin_call_level(),
            emergency_close_level: default_emergency_close_level(),
            alert_cooldown_minutes: default_alert_cooldown_minutes(),
            emergency_close_enabled: true,
        }
    }
}

// --- Spread gate --------------------------------------------------------------

fn default_spread_threshold_pips() -> f64 {
    3.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadConfig {
    #[serde(default = "default_spread_threshold_pips")]
    pub default_threshold_pips: f64,
    #[serde(default)]
    pub symbol_thresholds_pips: HashMap<String, f64>,
    #[serde(default)]
    pub defer_instead_of_block: bool,
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            default_threshold_pips: default_spread_threshold_pips(),
            symbol_thresholds_pips: HashMap::new(),
            defer_instead_of_block: false,
        }
    }
}

// --- Lot sizer ----------------------------------------------------------------

fn default_min_lot() -> f64 {
    0.01
}
fn default_max_lot() -> f64 {
    10.0
}
fn default_lot_precision() -> u32 {
    2
}
fn default_lot_parameter() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotSizerConfig {
    #[serde(default = "default_min_lot")]
    pub min_lot: f64,
    #[serde(default = "default_max_lot")]
    pub max_lot: f64,
    #[serde(default = "default_lot_precision")]
    pub precision: u32,
    #[serde(default)]
    pub risk_multipliers: HashMap<String, f64>,
    /// The sizing mode used for every incoming signal unless a future
    /// per-signal override is added. Meaning of `default_parameter` below
    /// depends on this: a percent for `RiskPercent`/`BalancePercent`, a lot
    /// count for `FixedLot`, a cash amount for `FixedCash`, a target pip
    /// value for `PipValueTarget`. Ignored by `TextOverride`.
    #[serde(default)]
    pub default_mode: crate::lot_sizer::LotSizeMode,
    #[serde(default = "default_lot_parameter")]
    pub default_parameter: f64,
}

impl Default for LotSizerConfig {
    fn default() -> Self {
        let mut risk_multipliers = HashMap::new();
        risk_multipliers.insert("conservative".to_string(), 0.5);
        risk_multipliers.insert("normal".to_string(), 1.0);
        risk_multipliers.insert("aggressive".to_string(), 2.0);
        risk_multipliers.insert("max".to_string(), 3.0);
        Self {
            min_lot: default_min_lot(),
            max_lot: default_max_lot(),
            precision: default_lot_precision(),
            risk_multipliers,
            default_mode: crate::lot_sizer::LotSizeMode::default(),
            default_parameter: default_lot_parameter(),
        }
    }
}

// --- Lot randomizer ------------------------------------------------------------

fn default_variance_range() -> f64 {
    0.003
}
fn default_max_repeat_history() -> usize {
    5
}
fn default_redraw_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotRandomizerConfig {
    #[serde(default = "default_variance_range")]
    pub variance_range: f64,
    #[serde(default = "default_lot_precision")]
    pub rounding_precision: u32,
    #[serde(default = "default_true")]
    pub avoid_repeats: bool,
    #[serde(default = "default_max_repeat_history")]
    pub max_repeat_history: usize,
    #[serde(default = "default_redraw_attempts")]
    pub max_redraw_attempts: u32,
}

impl Default for LotRandomizerConfig {
    fn default() -> Self {
        Self {
            variance_range: default_variance_range(),
            rounding_precision: default_lot_precision(),
            avoid_repeats: true,
            max_repeat_history: default_max_repeat_history(),
            max_redraw_attempts: default_redraw_attempts(),
        }
    }
}

// --- Smart entry ---------------------------------------------------------------

fn default_wait_seconds() -> u64 {
    300
}
fn default_price_tolerance_pips() -> f64 {
    2.0
}
fn default_max_concurrent_entries() -> usize {
    50
}
fn default_poll_interval_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartEntryConfig {
    #[serde(default = "default_wait_seconds")]
    pub default_wait_seconds: u64,
    #[serde(default = "default_price_tolerance_pips")]
    pub price_tolerance_pips: f64,
    #[serde(default = "default_max_concurrent_entries")]
    pub max_concurrent_entries: usize,
    #[serde(default = "default_true")]
    pub fallback_to_immediate: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SmartEntryConfig {
    fn default() -> Self {
        Self {
            default_wait_seconds: default_wait_seconds(),
            price_tolerance_pips: default_price_tolerance_pips(),
            max_concurrent_entries: default_max_concurrent_entries(),
            fallback_to_immediate: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// --- Multi-TP ------------------------------------------------------------------

fn default_monitoring_interval_ms() -> u64 {
    100
}
fn default_sl_buffer_pips() -> f64 {
    2.0
}
fn default_min_remaining_volume() -> f64 {
    0.01
}
fn default_max_slippage_pips() -> f64 {
    3.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlShiftMode {
    BreakEven,
    NextTp,
    None,
}

impl Default for SlShiftMode {
    fn default() -> Self {
        Self::BreakEven
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiTpConfig {
    #[serde(default = "default_monitoring_interval_ms")]
    pub monitoring_interval_ms: u64,
    #[serde(default)]
    pub default_sl_shift_mode: SlShiftMode,
    #[serde(default = "default_sl_buffer_pips")]
    pub default_sl_buffer_pips: f64,
    #[serde(default = "default_min_remaining_volume")]
    pub min_remaining_volume: f64,
    #[serde(default = "default_max_slippage_pips")]
    pub max_slippage_pips: f64,
}

impl Default for MultiTpConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_ms: default_monitoring_interval_ms(),
            default_sl_shift_mode: SlShiftMode::default(),
            default_sl_buffer_pips: default_sl_buffer_pips(),
            min_remaining_volume: default_min_remaining_volume(),
            max_slippage_pips: default_max_slippage_pips(),
        }
    }
}

// --- Trailing stop ---------------------------------------------------------------

fn default_trailing_update_interval_secs() -> u64 {
    20
}
fn default_activation_threshold_pips() -> f64 {
    5.0
}
fn default_step_size_pips() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    #[serde(default = "default_trailing_update_interval_secs")]
    pub update_interval_seconds: u64,
    #[serde(default = "default_activation_threshold_pips")]
    pub activation_threshold_pips: f64,
    #[serde(default = "default_step_size_pips")]
    pub step_size_pips: f64,
    #[serde(default = "default_true")]
    pub breakeven_lock: bool,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: default_trailing_update_interval_secs(),
            activation_threshold_pips: default_activation_threshold_pips(),
            step_size_pips: default_step_size_pips(),
            breakeven_lock: true,
        }
    }
}

// --- Break-even ---------------------------------------------------------------

fn default_min_profit_pips() -> f64 {
    5.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakEvenConfig {
    #[serde(default = "default_sl_buffer_pips")]
    pub buffer_pips: f64,
    #[serde(default = "default_min_profit_pips")]
    pub min_profit_pips: f64,
    #[serde(default = "default_true")]
    pub only_when_profitable: bool,
}

impl Default for BreakEvenConfig {
    fn default() -> Self {
        Self {
            buffer_pips: default_sl_buffer_pips(),
            min_profit_pips: default_min_profit_pips(),
            only_when_profitable: true,
        }
    }
}

// --- TP/SL adjustor ---------------------------------------------------------------

fn default_adjustor_interval_secs() -> u64 {
    1
}
fn default_max_adjustment_per_session_pips() -> f64 {
    15.0
}
fn default_min_adjustment_interval_secs() -> u64 {
    30
}
fn default_min_distance_pips() -> f64 {
    3.0
}
fn default_high_spread_threshold_pips() -> f64 {
    4.0
}
fn default_low_spread_threshold_pips() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpSlAdjustorConfig {
    #[serde(default = "default_adjustor_interval_secs")]
    pub interval_seconds: u64,
    #[serde(default = "default_high_spread_threshold_pips")]
    pub high_spread_threshold_pips: f64,
    #[serde(default = "default_low_spread_threshold_pips")]
    pub low_spread_threshold_pips: f64,
    #[serde(default = "default_max_adjustment_per_session_pips")]
    pub max_adjustment_per_session_pips: f64,
    #[serde(default = "default_min_adjustment_interval_secs")]
    pub min_adjustment_interval_seconds: u64,
    #[serde(default = "default_min_distance_pips")]
    pub min_distance_pips: f64,
}

impl Default for TpSlAdjustorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_adjustor_interval_secs(),
            high_spread_threshold_pips: default_high_spread_threshold_pips(),
            low_spread_threshold_pips: default_low_spread_threshold_pips(),
            max_adjustment_per_session_pips: default_max_adjustment_per_session_pips(),
            min_adjustment_interval_seconds: default_min_adjustment_interval_secs(),
            min_distance_pips: default_min_distance_pips(),
        }
    }
}

// --- Signal edit watcher ---------------------------------------------------------------

fn default_max_edit_time_window_secs() -> i64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditWatcherConfig {
    #[serde(default = "default_max_edit_time_window_secs")]
    pub max_edit_time_window_seconds: i64,
    #[serde(default)]
    pub allowed_change_types: Vec<String>,
}

impl Default for EditWatcherConfig {
    fn default() -> Self {
        Self {
            max_edit_time_window_seconds: default_max_edit_time_window_secs(),
            allowed_change_types: vec![
                "sl".to_string(),
                "tp".to_string(),
                "volume".to_string(),
            ],
        }
    }
}

// --- Multi-signal handler ---------------------------------------------------------------

fn default_bucket_capacity() -> usize {
    5
}
fn default_merge_tolerance_pips() -> f64 {
    3.0
}
fn default_confidence_threshold() -> f64 {
    0.3
}
fn default_processing_interval_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiSignalConfig {
    #[serde(default = "default_bucket_capacity")]
    pub bucket_capacity: usize,
    #[serde(default = "default_merge_tolerance_pips")]
    pub merge_tolerance_pips: f64,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_processing_interval_ms")]
    pub processing_interval_ms: u64,
    #[serde(default)]
    pub resolution: ConflictResolution,
}

impl Default for MultiSignalConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: default_bucket_capacity(),
            merge_tolerance_pips: default_merge_tolerance_pips(),
            confidence_threshold: default_confidence_threshold(),
            processing_interval_ms: default_processing_interval_ms(),
            resolution: ConflictResolution::default(),
        }
    }
}

// --- Command interpreter ---------------------------------------------------------------

fn default_command_history_len() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInterpreterConfig {
    #[serde(default)]
    pub admin_users: Vec<String>,
    #[serde(default)]
    pub stealth_commands_enabled: bool,
    #[serde(default)]
    pub replay_commands_enabled: bool,
    #[serde(default = "default_command_history_len")]
    pub history_len: usize,
}

impl Default for CommandInterpreterConfig {
    fn default() -> Self {
        Self {
            admin_users: Vec::new(),
            stealth_commands_enabled: false,
            replay_commands_enabled: true,
            history_len: default_command_history_len(),
        }
    }
}

// --- Trade executor ---------------------------------------------------------------

fn default_worker_pool_size() -> usize {
    5
}
fn default_max_slippage_pips_exec() -> f64 {
    3.0
}
fn default_magic_number() -> u64 {
    260915
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_range_split_pacing_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_max_slippage_pips_exec")]
    pub max_slippage_pips: f64,
    #[serde(default = "default_magic_number")]
    pub magic_number: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_range_split_pacing_ms")]
    pub range_split_pacing_ms: u64,
    #[serde(default)]
    pub comment: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            max_slippage_pips: default_max_slippage_pips_exec(),
            magic_number: default_magic_number(),
            retry_attempts: default_retry_attempts(),
            range_split_pacing_ms: default_range_split_pacing_ms(),
            comment: "signalos".to_string(),
        }
    }
}

// =============================================================================
// Persistence — on-disk engine history (§6 "Persisted state layout")
// =============================================================================

fn default_state_dir() -> String {
    "state".to_string()
}

/// Controls whether the rate limiter, margin guard, position registry,
/// reverse-strategy log, edit watcher, and command history flush their
/// working state to disk (one JSON document per concern, via
/// `persistence::save_atomic`) so a restart resumes from the last known
/// state instead of from empty. Off by default: a fresh in-memory start is
/// the safer default for a dry-run or first-launch config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            state_dir: default_state_dir(),
        }
    }
}

// =============================================================================
// RuntimeConfig — top-level document
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Set by `/disable all` (or cleared by `/enable all`) via the C19
    /// command surface; short-circuits `dispatch_signal` ahead of every
    /// other policy engine.
    #[serde(default)]
    pub global_disabled: bool,
    /// Symbols disabled by `/disable SYMBOL`; upper-cased broker symbols.
    #[serde(default)]
    pub disabled_symbols: Vec<String>,
    /// Providers disabled by `/disable PROVIDER`.
    #[serde(default)]
    pub disabled_providers: Vec<String>,
    /// Toggled by `/stealth on|off`; when set, the executor blanks the
    /// order comment and salts the magic number per order instead of using
    /// the fixed configured values, on top of C11's volume jitter.
    #[serde(default)]
    pub stealth_mode: bool,

    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default)]
    pub margin: MarginConfig,
    #[serde(default)]
    pub spread: SpreadConfig,
    #[serde(default)]
    pub lot_sizer: LotSizerConfig,
    #[serde(default)]
    pub lot_randomizer: LotRandomizerConfig,
    #[serde(default)]
    pub smart_entry: SmartEntryConfig,
    #[serde(default)]
    pub multi_tp: MultiTpConfig,
    #[serde(default)]
    pub trailing_stop: TrailingStopConfig,
    #[serde(default)]
    pub break_even: BreakEvenConfig,
    #[serde(default)]
    pub tp_sl_adjustor: TpSlAdjustorConfig,
    #[serde(default)]
    pub edit_watcher: EditWatcherConfig,
    #[serde(default)]
    pub multi_signal: MultiSignalConfig,
    #[serde(default)]
    pub command_interpreter: CommandInterpreterConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// C10's rule list, evaluated in order, first match wins. Empty by
    /// default, which leaves every signal on `router_default_action`.
    #[serde(default)]
    pub router_rules: Vec<crate::router::RouteRule>,
    #[serde(default = "default_router_action")]
    pub router_default_action: crate::types::RouteAction,
    /// C9's rule list, evaluated in priority (list) order, first match wins.
    #[serde(default)]
    pub reverse_rules: Vec<crate::reverse_strategy::ReverseRule>,
}

fn default_router_action() -> crate::types::RouteAction {
    crate::types::RouteAction::ProcessNormal
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Demo,
            symbols: default_symbols(),
            global_disabled: false,
            disabled_symbols: Vec::new(),
            disabled_providers: Vec::new(),
            stealth_mode: false,
            rate_limiter: RateLimiterConfig::default(),
            margin: MarginConfig::default(),
            spread: SpreadConfig::default(),
            lot_sizer: LotSizerConfig::default(),
            lot_randomizer: LotRandomizerConfig::default(),
            smart_entry: SmartEntryConfig::default(),
            multi_tp: MultiTpConfig::default(),
            trailing_stop: TrailingStopConfig::default(),
            break_even: BreakEvenConfig::default(),
            tp_sl_adjustor: TpSlAdjustorConfig::default(),
            edit_watcher: EditWatcherConfig::default(),
            multi_signal: MultiSignalConfig::default(),
            command_interpreter: CommandInterpreterConfig::default(),
            executor: ExecutorConfig::default(),
            persistence: PersistenceConfig::default(),
            router_rules: Vec::new(),
            router_default_action: default_router_action(),
            reverse_rules: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            trading_mode = %config.trading_mode,
            "runtime config loaded"
        );
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.margin.safe_level, 300.0);
        assert_eq!(cfg.margin.warning_level, 200.0);
        assert_eq!(cfg.margin.critical_level, 150.0);
        assert_eq!(cfg.rate_limiter.symbol_hourly_limit, 10);
        assert_eq!(cfg.lot_sizer.risk_multipliers.get("aggressive"), Some(&2.0));
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.multi_tp.min_remaining_volume, 0.01);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "symbols": ["ETHUSD"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.symbols, vec!["ETHUSD"]);
        assert_eq!(cfg.margin.critical_level, 150.0);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
    }
}
