// =============================================================================
// Command Interpreter (C19)
// =============================================================================
//
// Total, case-insensitive, whitespace-tolerant grammar parser plus
// role-based authorization and a bounded per-user command history.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::warn;

use crate::config::CommandInterpreterConfig;
use crate::persistence;
use crate::types::{Command, CommandKind, CommandScope, Role};

fn tokenize(raw: &str) -> Vec<String> {
    raw.trim().split_whitespace().map(|s| s.to_string()).collect()
}

/// Parse a raw command string into a `Command`. Parsing is total: anything
/// that does not match the grammar becomes `CommandKind::Unknown`.
pub fn parse(raw_text: &str, user_id: &str, role: Role) -> Command {
    let tokens = tokenize(raw_text);
    let base = Command {
        raw_text: raw_text.to_string(),
        user_id: user_id.to_string(),
        role,
        kind: CommandKind::Unknown,
        scope: CommandScope::Global,
        target: None,
        params: vec![],
    };

    let Some(head) = tokens.first() else {
        return base;
    };
    let verb = head.trim_start_matches('/').to_lowercase();
    let rest = &tokens[1..];

    match verb.as_str() {
        "status" => Command {
            kind: CommandKind::Status,
            scope: infer_scope(rest.first()),
            target: rest.first().cloned(),
            ..base
        },
        "replay" => {
            if rest.is_empty() {
                return Command { kind: CommandKind::Unknown, ..base };
            }
            Command {
                kind: CommandKind::Replay,
                scope: CommandScope::Symbol,
                target: rest.first().cloned(),
                params: rest.get(1..).map(|s| s.to_vec()).unwrap_or_default(),
                ..base
            }
        }
        "stealth" => match rest.first().map(|s| s.to_lowercase()).as_deref() {
            Some("on") | Some("enable") => Command {
                kind: CommandKind::Stealth,
                params: vec!["on".to_string()],
                ..base
            },
            Some("off") | Some("disable") => Command {
                kind: CommandKind::Stealth,
                params: vec!["off".to_string()],
                ..base
            },
            _ => Command { kind: CommandKind::Unknown, ..base },
        },
        "enable" | "disable" => {
            let Some(target) = rest.first() else {
                return Command { kind: CommandKind::Unknown, ..base };
            };
            Command {
                kind: if verb == "enable" { CommandKind::Enable } else { CommandKind::Disable },
                scope: infer_scope(Some(target)),
                target: Some(target.clone()),
                ..base
            }
        }
        "set" => {
            if rest.len() < 3 {
                return Command { kind: CommandKind::Unknown, ..base };
            }
            Command {
                kind: CommandKind::Set,
                scope: infer_scope(rest.first()),
                target: rest.first().cloned(),
                params: rest[1..].to_vec(),
                ..base
            }
        }
        "get" => {
            if rest.is_empty() {
                return Command { kind: CommandKind::Unknown, ..base };
            }
            Command {
                kind: CommandKind::Get,
                scope: infer_scope(rest.first()),
                target: rest.first().cloned(),
                params: rest.get(1..).map(|s| s.to_vec()).unwrap_or_default(),
                ..base
            }
        }
        "pause" => Command { kind: CommandKind::Pause, ..base },
        "resume" => Command { kind: CommandKind::Resume, ..base },
        "help" => Command {
            kind: CommandKind::Help,
            target: rest.first().cloned(),
            ..base
        },
        _ => base,
    }
}

fn infer_scope(target: Option<&String>) -> CommandScope {
    let Some(target) = target else {
        return CommandScope::Global;
    };
    let lower = target.to_lowercase();
    if lower == "all" || lower == "global" {
        return CommandScope::Global;
    }
    // Symbols are conventionally short alphabetic tickers (EURUSD, XAUUSD);
    // anything else is treated as a provider name.
    if (4..=7).contains(&target.len()) && target.chars().all(|c| c.is_ascii_alphabetic()) {
        CommandScope::Symbol
    } else {
        CommandScope::Provider
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    RequiresAdmin,
    FeatureDisabled(&'static str),
}

/// Authorize a parsed command against role and feature flags: `SET` requires
/// ADMIN; `STEALTH`/`REPLAY` additionally require their feature flag;
/// everything else requires only `USER`.
pub fn authorize(command: &Command, cfg: &CommandInterpreterConfig) -> AuthDecision {
    if command.kind == CommandKind::Set && command.role != Role::Admin {
        return AuthDecision::RequiresAdmin;
    }
    if command.kind == CommandKind::Stealth && !cfg.stealth_commands_enabled {
        return AuthDecision::FeatureDisabled("stealth");
    }
    if command.kind == CommandKind::Replay && !cfg.replay_commands_enabled {
        return AuthDecision::FeatureDisabled("replay");
    }
    AuthDecision::Allowed
}

const COMMAND_HISTORY_STATE_VERSION: u32 = 1;

pub struct CommandHistory {
    per_user: RwLock<HashMap<String, VecDeque<Command>>>,
    state_path: Option<PathBuf>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self {
            per_user: RwLock::new(HashMap::new()),
            state_path: None,
        }
    }

    /// Same as `new`, but restores per-user command history from `path` if
    /// present, and flushes back to it on every recorded command.
    pub fn new_with_persistence(path: PathBuf) -> Self {
        let per_user = persistence::load_or_default::<HashMap<String, VecDeque<Command>>>(&path);
        Self {
            per_user: RwLock::new(per_user),
            state_path: Some(path),
        }
    }

    pub fn record(&self, command: Command, cap: usize) {
        let mut per_user = self.per_user.write();
        let history = per_user.entry(command.user_id.clone()).or_default();
        if history.len() >= cap {
            history.pop_front();
        }
        history.push_back(command);
        if let Some(path) = &self.state_path {
            if let Err(e) = persistence::save_atomic(path, COMMAND_HISTORY_STATE_VERSION, &*per_user) {
                warn!(error = %e, "failed to persist command history");
            }
        }
    }

    pub fn for_user(&self, user_id: &str) -> Vec<Command> {
        self.per_user
            .read()
            .get(user_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_input_yields_unknown() {
        let cmd = parse("not a command at all", "u1", Role::User);
        assert_eq!(cmd.kind, CommandKind::Unknown);
    }

    #[test]
    fn status_parses_optional_target() {
        let cmd = parse("/status EURUSD", "u1", Role::User);
        assert_eq!(cmd.kind, CommandKind::Status);
        assert_eq!(cmd.target, Some("EURUSD".to_string()));
        assert_eq!(cmd.scope, CommandScope::Symbol);
    }

    #[test]
    fn set_requires_admin_role() {
        let cmd = parse("/set lot_sizer precision 2", "u1", Role::User);
        assert_eq!(cmd.kind, CommandKind::Set);
        let cfg = CommandInterpreterConfig::default();
        assert_eq!(authorize(&cmd, &cfg), AuthDecision::RequiresAdmin);

        let admin_cmd = parse("/set lot_sizer precision 2", "u1", Role::Admin);
        assert_eq!(authorize(&admin_cmd, &cfg), AuthDecision::Allowed);
    }

    #[test]
    fn stealth_requires_feature_flag() {
        let cmd = parse("/stealth on", "u1", Role::User);
        let mut cfg = CommandInterpreterConfig::default();
        cfg.stealth_commands_enabled = false;
        assert_eq!(authorize(&cmd, &cfg), AuthDecision::FeatureDisabled("stealth"));
        cfg.stealth_commands_enabled = true;
        assert_eq!(authorize(&cmd, &cfg), AuthDecision::Allowed);
    }

    #[test]
    fn bounded_history_drops_oldest() {
        let history = CommandHistory::new();
        for i in 0..5 {
            history.record(parse(&format!("/status S{i}"), "u1", Role::User), 3);
        }
        let recorded = history.for_user("u1");
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[0].target, Some("S2".to_string()));
    }

    #[test]
    fn case_insensitive_and_whitespace_tolerant() {
        let cmd = parse("  /STATUS   eurusd  ", "u1", Role::User);
        assert_eq!(cmd.kind, CommandKind::Status);
    }
}
