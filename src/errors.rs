// =============================================================================
// Error taxonomy for the policy stack and execution pipeline
// =============================================================================
//
// `anyhow::Result` is used at I/O and config boundaries (see `config.rs`,
// `broker/http_client.rs`); this module's `CoreError` enum is for
// business-logic boundaries where a caller needs to match on *kind*, not
// just print a message.
// =============================================================================

use thiserror::Error;

/// Top-level error surfaced by policy engines and the trade executor.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("input error: {0}")]
    Input(#[from] InputError),

    #[error("blocked by policy: {0}")]
    Policy(#[from] PolicyBlock),

    #[error("transient broker error: {0}")]
    Transient(#[from] TransientBrokerError),

    #[error("broker rejected request: {0}")]
    Hard(#[from] HardBrokerError),

    #[error("state conflict: {0}")]
    Conflict(#[from] StateConflict),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error, Clone)]
pub enum InputError {
    #[error("signal could not be parsed")]
    UnparseableSignal,
    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

/// Reason a signal or intent was blocked by one of the policy engines.
#[derive(Debug, Error, Clone)]
pub enum PolicyBlock {
    #[error("rate limit exceeded in scope {scope}: {current}/{limit}, resets at {reset_at}")]
    RateLimited {
        scope: String,
        current: u32,
        limit: u32,
        reset_at: String,
    },
    #[error("spread {current_pips} pips exceeds threshold {threshold_pips} pips")]
    SpreadTooWide {
        current_pips: f64,
        threshold_pips: f64,
    },
    #[error("margin guard blocked: {reason}")]
    MarginBlocked { reason: String },
    #[error("router blocked signal: {reason}")]
    RouterBlocked { reason: String },
    #[error("signal rejected by conflict resolution: {reason}")]
    ConflictLoser { reason: String },
}

#[derive(Debug, Error, Clone)]
pub enum TransientBrokerError {
    #[error("broker request timed out")]
    Timeout,
    #[error("requote received")]
    Requote,
    #[error("broker temporarily disconnected")]
    Disconnected,
}

#[derive(Debug, Error, Clone)]
pub enum HardBrokerError {
    #[error("invalid volume")]
    InvalidVolume,
    #[error("invalid stops")]
    InvalidStops,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("broker error: {0}")]
    Other(String),
}

#[derive(Debug, Error, Clone)]
pub enum StateConflict {
    #[error("position {0} is already closed")]
    AlreadyClosed(String),
    #[error("no such position: {0}")]
    UnknownPosition(String),
    #[error("duplicate intent: {0}")]
    DuplicateIntent(String),
}

#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("invalid threshold for {field}: {value}")]
    InvalidThreshold { field: String, value: String },
    #[error("missing required field: {0}")]
    MissingField(String),
}
