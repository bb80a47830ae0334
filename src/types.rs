// =============================================================================
// Shared types used across the signal execution engine
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against a real broker account or a sentinel one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Trade direction. `Sell` is the short/bearish side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => -Decimal::ONE,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Priority tier attached to a signal or provider; used by C8's scoring and
/// C10's `ESCALATE_PRIORITY` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    /// Weight used in C8's `confidence * provider_weight * priority_weight` score.
    pub fn weight(self) -> Decimal {
        match self {
            Self::Critical => Decimal::new(20, 1), // 2.0
            Self::High => Decimal::new(15, 1),      // 1.5
            Self::Medium => Decimal::ONE,
            Self::Low => Decimal::new(7, 1),        // 0.7
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One candidate take-profit level parsed out of a signal, prior to being
/// turned into a percentage-weighted `TPLevel` plan by the multi-TP manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TpCandidate {
    pub price: Decimal,
}

/// A fully parsed signal, as produced by the (external) signal parser.
///
/// `message_id` identifies the originating chat message so that edits can be
/// tracked by C18; a single `message_id` may be reparsed into several
/// `SignalVersion`s over its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub message_id: String,
    pub provider_id: String,
    #[serde(default)]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub symbol: String,
    pub direction: Direction,
    /// At least one candidate entry, in the order the text listed them.
    pub entries: Vec<Decimal>,
    #[serde(default)]
    pub sl: Option<Decimal>,
    #[serde(default)]
    pub tps: Vec<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub original_text: String,
    /// Set when this signal was produced by a `SplitSignal` route action.
    /// Split-derived signals never re-merge in C8: any signal carrying a
    /// `Some` here forces its own singleton cluster.
    #[serde(default)]
    pub split_index: Option<u32>,
}

/// One recorded parse of a `message_id`, used to detect no-op edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalVersion {
    pub content_hash: u64,
    pub signal: Signal,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Metadata describing how a `TradeIntent` was derived from its signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentMeta {
    #[serde(default)]
    pub reversed: bool,
    #[serde(default)]
    pub merged_from: Vec<String>,
    #[serde(default)]
    pub split_index: Option<u32>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub model_version: Option<String>,
}

/// Entry resolution strategy for an intent with more than one candidate entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryMode {
    Best,
    Average,
    Second,
    First,
}

impl Default for EntryMode {
    fn default() -> Self {
        Self::Best
    }
}

/// A signal after the full policy stack (C7-C12) but before broker placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub intent_id: String,
    pub signal_id: String,
    pub message_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_mode: EntryMode,
    pub entry_target: Decimal,
    pub volume: Decimal,
    pub sl: Option<Decimal>,
    /// `(price, percentage)` pairs, outward from entry.
    pub tp_plan: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    pub smart_wait_deadline: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub meta: IntentMeta,
    /// The signal this intent was built from, carried through to fill time so
    /// the edit watcher (C18) can register the originating message without a
    /// second parse pass.
    pub original_signal: Signal,
}

/// Lifecycle state of a `TradeIntent` as it moves through the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentState {
    Pending,
    Executing,
    Filled,
    Partial,
    Failed,
}

/// Lifecycle state of a filled `Position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Status of a single take-profit level within a position's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TpStatus {
    Pending,
    Hit,
    Cancelled,
}

/// One take-profit level in a position's fractional-close plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpLevel {
    pub level_index: u32,
    pub price: Decimal,
    pub percentage: Decimal,
    pub status: TpStatus,
    #[serde(default)]
    pub closed_volume: Decimal,
    #[serde(default)]
    pub close_price: Option<Decimal>,
}

/// A broker-side position managed by this engine from fill to close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: String,
    pub intent_id: String,
    pub signal_id: String,
    pub message_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub volume_at_intent: Decimal,
    pub volume_remaining: Decimal,
    pub sl: Option<Decimal>,
    pub tp_plan_remaining: Vec<TpLevel>,
    pub open_time: chrono::DateTime<chrono::Utc>,
    pub state: PositionState,
    #[serde(default)]
    pub current_price: Decimal,
    #[serde(default)]
    pub highest_favorable_price: Option<Decimal>,
    #[serde(default)]
    pub breakeven_locked: bool,
    #[serde(default)]
    pub closed_volume_total: Decimal,
    #[serde(default)]
    pub realized_pnl: Decimal,
    #[serde(default)]
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub close_reason: Option<String>,
}

/// Account margin state as read from the broker, plus the derived health class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarginSnapshot {
    pub balance: Decimal,
    pub equity: Decimal,
    pub used_margin: Decimal,
    pub free_margin: Decimal,
    pub margin_level: Decimal,
    pub status: MarginStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarginStatus {
    MarginCall,
    Critical,
    Warning,
    Safe,
}

impl std::fmt::Display for MarginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "SAFE"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::MarginCall => write!(f, "MARGIN_CALL"),
        }
    }
}

/// Result of C6's pre-flight margin check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarginDecision {
    Allowed,
    BlockedLowFreeMargin,
    BlockedCriticalLevel,
    BlockedEmergency,
}

/// Result of C5's spread check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SpreadDecision {
    Allow,
    BlockedHighSpread { current_pips: f64, threshold_pips: f64 },
    Defer { delay_ms: u64 },
}

/// Running stats for one signal provider, updated by C8 on each accepted
/// signal. `weight` is operator-configured, never learned at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub provider_id: String,
    #[serde(default)]
    pub signal_count: u64,
    #[serde(default)]
    pub avg_confidence: f64,
    pub weight: Decimal,
}

impl ProviderProfile {
    pub fn new(provider_id: impl Into<String>, weight: Decimal) -> Self {
        Self {
            provider_id: provider_id.into(),
            signal_count: 0,
            avg_confidence: 0.0,
            weight,
        }
    }

    /// Incremental running mean.
    pub fn record(&mut self, confidence: f64) {
        let n = self.signal_count as f64;
        self.avg_confidence = (self.avg_confidence * n + confidence) / (n + 1.0);
        self.signal_count += 1;
    }
}

/// How two signals for the same symbol relate to one another, per C8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    DirectionalConflict,
    Mergeable,
    Independent,
}

/// Conflict-resolution method configured for C8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    HighestPriority,
    HighestConfidence,
    NewestWins,
    OldestWins,
    CancelAll,
}

impl Default for ConflictResolution {
    fn default() -> Self {
        Self::HighestPriority
    }
}

/// Action a reverse-strategy rule (C9) applies to a matched signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReverseAction {
    FullReverse,
    DirectionOnly,
    IgnoreSignal,
    ModifyParams,
}

/// A routing decision produced by C10 for one signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub signal_id: String,
    pub matched_rule_id: Option<String>,
    pub action: RouteAction,
    pub conditions_met: Vec<String>,
    /// Inert hook for a future ML-driven router; never populated by this crate's logic.
    #[serde(default)]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RouteAction {
    ProcessNormal,
    RouteToReverse,
    BlockSignal { reason: String },
    DelaySignal { minutes: u32 },
    SplitSignal { count: u32 },
    EscalatePriority,
}

/// Role associated with an operator issuing a command (C19).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

/// Parsed command kind, per the `/command` grammar in C19.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Status,
    Replay,
    Stealth,
    Enable,
    Disable,
    Set,
    Get,
    Pause,
    Resume,
    Help,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandScope {
    Global,
    Symbol,
    Provider,
    Strategy,
}

/// A parsed operator command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub raw_text: String,
    pub user_id: String,
    pub role: Role,
    pub kind: CommandKind,
    pub scope: CommandScope,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
}

/// Result of executing a `Command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub ok: bool,
    pub message: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}
