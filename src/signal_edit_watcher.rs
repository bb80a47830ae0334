// =============================================================================
// Edit-on-Signal-Change Watcher (C18)
// =============================================================================
//
// Tracks `message_id -> {open tickets, signal versions}` and, on a provider
// message edit, diffs the reparsed signal against its latest known version
// to decide which open positions need modification.
// =============================================================================

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EditWatcherConfig;
use crate::persistence;
use crate::signal_parser::SignalParser;
use crate::types::{Signal, SignalVersion};

#[derive(Debug, Clone, Default)]
pub struct SignalDiff {
    pub entry_changed: bool,
    pub sl_changed: bool,
    pub tp_changed: bool,
    pub volume_changed: bool,
    pub direction_changed: bool,
}

impl SignalDiff {
    pub fn is_empty(&self) -> bool {
        !(self.entry_changed || self.sl_changed || self.tp_changed || self.volume_changed || self.direction_changed)
    }
}

#[derive(Debug, Clone)]
pub enum EditOutcome {
    NoOp,
    OutsideWindow,
    DirectionChangeAlert { message_id: String },
    Applicable {
        tickets: Vec<String>,
        diff: SignalDiff,
        new_signal: Signal,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MessageRecord {
    open_tickets: Vec<String>,
    versions: Vec<SignalVersion>,
    first_fill_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModificationAttempt {
    pub ticket: String,
    pub change_type: String,
    pub success: bool,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedEditWatcherState {
    records: HashMap<String, MessageRecord>,
    stats: Vec<ModificationAttempt>,
}

const EDIT_WATCHER_STATE_VERSION: u32 = 1;

pub struct SignalEditWatcher {
    parser: Arc<dyn SignalParser>,
    records: RwLock<HashMap<String, MessageRecord>>,
    stats: RwLock<Vec<ModificationAttempt>>,
    state_path: Option<PathBuf>,
}

fn content_hash(signal: &Signal) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    signal.symbol.hash(&mut hasher);
    (signal.direction as u8).hash(&mut hasher);
    for e in &signal.entries {
        e.to_string().hash(&mut hasher);
    }
    signal.sl.map(|v| v.to_string()).unwrap_or_default().hash(&mut hasher);
    for tp in &signal.tps {
        tp.to_string().hash(&mut hasher);
    }
    signal.volume.map(|v| v.to_string()).unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}

impl SignalEditWatcher {
    pub fn new(parser: Arc<dyn SignalParser>) -> Self {
        Self {
            parser,
            records: RwLock::new(HashMap::new()),
            stats: RwLock::new(Vec::new()),
            state_path: None,
        }
    }

    /// Same as `new`, but restores the message->tickets/versions map and
    /// modification-attempt stats from `path` if present, and flushes back
    /// to it on every mutation.
    pub fn new_with_persistence(parser: Arc<dyn SignalParser>, path: PathBuf) -> Self {
        let persisted = persistence::load_or_default::<PersistedEditWatcherState>(&path);
        Self {
            parser,
            records: RwLock::new(persisted.records),
            stats: RwLock::new(persisted.stats),
            state_path: Some(path),
        }
    }

    fn persist(&self) {
        if let Some(path) = &self.state_path {
            let snapshot = PersistedEditWatcherState {
                records: self.records.read().clone(),
                stats: self.stats.read().clone(),
            };
            if let Err(e) = persistence::save_atomic(path, EDIT_WATCHER_STATE_VERSION, &snapshot) {
                warn!(error = %e, "failed to persist edit-watcher state");
            }
        }
    }

    /// Register a freshly filled position's ticket under its originating
    /// message, and record the signal version that produced it.
    pub fn register_fill(&self, message_id: &str, ticket: &str, signal: &Signal, fill_time: DateTime<Utc>) {
        let mut records = self.records.write();
        let record = records.entry(message_id.to_string()).or_default();
        record.open_tickets.push(ticket.to_string());
        record.first_fill_at.get_or_insert(fill_time);
        record.versions.push(SignalVersion {
            content_hash: content_hash(signal),
            signal: signal.clone(),
            timestamp: fill_time,
        });
        drop(records);
        self.persist();
    }

    pub fn unregister_ticket(&self, message_id: &str, ticket: &str) {
        {
            let mut records = self.records.write();
            if let Some(record) = records.get_mut(message_id) {
                record.open_tickets.retain(|t| t != ticket);
            }
        }
        self.persist();
    }

    fn diff(old: &Signal, new: &Signal) -> SignalDiff {
        SignalDiff {
            entry_changed: old.entries != new.entries,
            sl_changed: old.sl != new.sl,
            tp_changed: old.tps != new.tps,
            volume_changed: old.volume != new.volume,
            direction_changed: old.direction != new.direction,
        }
    }

    pub fn on_signal_edit(
        &self,
        message_id: &str,
        new_text: &str,
        provider_id: &str,
        now: DateTime<Utc>,
        cfg: &EditWatcherConfig,
    ) -> EditOutcome {
        let Some(new_signal) = self.parser.parse(new_text, message_id, provider_id) else {
            return EditOutcome::NoOp;
        };

        let mut records = self.records.write();
        let Some(record) = records.get_mut(message_id) else {
            return EditOutcome::NoOp;
        };

        let new_hash = content_hash(&new_signal);
        if record.versions.last().is_some_and(|v| v.content_hash == new_hash) {
            return EditOutcome::NoOp;
        }

        if let Some(first_fill) = record.first_fill_at {
            let window = chrono::Duration::seconds(cfg.max_edit_time_window_seconds);
            if now - first_fill > window {
                warn!(message_id, "edit rejected: outside max edit time window");
                return EditOutcome::OutsideWindow;
            }
        }

        let old_signal = record.versions.last().map(|v| v.signal.clone());
        record.versions.push(SignalVersion {
            content_hash: new_hash,
            signal: new_signal.clone(),
            timestamp: now,
        });
        let open_tickets = record.open_tickets.clone();
        drop(records);
        self.persist();

        let diff = match &old_signal {
            Some(old) => Self::diff(old, &new_signal),
            None => SignalDiff::default(),
        };

        if diff.direction_changed {
            info!(message_id, "direction change on edit surfaced as alert, not applied");
            return EditOutcome::DirectionChangeAlert {
                message_id: message_id.to_string(),
            };
        }

        if diff.is_empty() {
            return EditOutcome::NoOp;
        }

        EditOutcome::Applicable {
            tickets: open_tickets,
            diff,
            new_signal,
        }
    }

    pub fn record_attempt(&self, attempt: ModificationAttempt) {
        self.stats.write().push(attempt);
        self.persist();
    }

    pub fn stats(&self) -> Vec<ModificationAttempt> {
        self.stats.read().clone()
    }

    /// Which of the whitelisted change types actually changed, intersected
    /// with `cfg.allowed_change_types`.
    pub fn allowed_changes(diff: &SignalDiff, cfg: &EditWatcherConfig) -> Vec<String> {
        let mut changes = Vec::new();
        if diff.sl_changed && cfg.allowed_change_types.iter().any(|c| c == "sl") {
            changes.push("sl".to_string());
        }
        if diff.tp_changed && cfg.allowed_change_types.iter().any(|c| c == "tp") {
            changes.push("tp".to_string());
        }
        if diff.volume_changed && cfg.allowed_change_types.iter().any(|c| c == "volume") {
            changes.push("volume".to_string());
        }
        if diff.entry_changed && cfg.allowed_change_types.iter().any(|c| c == "entry") {
            changes.push("entry".to_string());
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct StubParser {
        next: std::sync::Mutex<Option<Signal>>,
    }

    impl SignalParser for StubParser {
        fn parse(&self, _text: &str, _message_id: &str, _provider_id: &str) -> Option<Signal> {
            self.next.lock().unwrap().clone()
        }
    }

    fn signal(sl: rust_decimal::Decimal) -> Signal {
        Signal {
            signal_id: "s1".to_string(),
            message_id: "m1".to_string(),
            provider_id: "p1".to_string(),
            timestamp: Utc::now(),
            symbol: "EURUSD".to_string(),
            direction: crate::types::Direction::Buy,
            entries: vec![dec!(1.1000)],
            sl: Some(sl),
            tps: vec![dec!(1.1050)],
            volume: Some(dec!(1.0)),
            confidence: 0.9,
            priority: crate::types::Priority::Medium,
            original_text: String::new(),
            split_index: None,
        }
    }

    #[test]
    fn detects_sl_change_as_applicable() {
        let parser = Arc::new(StubParser {
            next: std::sync::Mutex::new(Some(signal(dec!(1.0960)))),
        });
        let watcher = SignalEditWatcher::new(parser);
        let now = Utc::now();
        watcher.register_fill("m1", "t1", &signal(dec!(1.0950)), now);

        let cfg = EditWatcherConfig::default();
        let outcome = watcher.on_signal_edit("m1", "new text", "p1", now, &cfg);
        match outcome {
            EditOutcome::Applicable { diff, tickets, .. } => {
                assert!(diff.sl_changed);
                assert_eq!(tickets, vec!["t1".to_string()]);
            }
            other => panic!("expected Applicable, got {other:?}"),
        }
    }

    #[test]
    fn edit_outside_window_is_rejected() {
        let parser = Arc::new(StubParser {
            next: std::sync::Mutex::new(Some(signal(dec!(1.0960)))),
        });
        let watcher = SignalEditWatcher::new(parser);
        let fill_time = Utc::now() - chrono::Duration::hours(2);
        watcher.register_fill("m1", "t1", &signal(dec!(1.0950)), fill_time);

        let cfg = EditWatcherConfig::default();
        let outcome = watcher.on_signal_edit("m1", "new text", "p1", Utc::now(), &cfg);
        assert!(matches!(outcome, EditOutcome::OutsideWindow));
    }

    #[test]
    fn identical_reparse_is_noop() {
        let original = signal(dec!(1.0950));
        let parser = Arc::new(StubParser {
            next: std::sync::Mutex::new(Some(original.clone())),
        });
        let watcher = SignalEditWatcher::new(parser);
        let now = Utc::now();
        watcher.register_fill("m1", "t1", &original, now);

        let cfg = EditWatcherConfig::default();
        let outcome = watcher.on_signal_edit("m1", "same text", "p1", now, &cfg);
        assert!(matches!(outcome, EditOutcome::NoOp));
    }
}
