// =============================================================================
// Shared atomic-write JSON persistence helper
// =============================================================================
//
// Every engine that keeps history on disk (rate limiter windows, margin
// alerts, the multi-TP registry, trailing/break-even histories, reversal
// history, the edit-watcher map, command history) goes through this helper
// instead of re-implementing the tmp-then-rename dance, generalised from the
// pattern in `config.rs`.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

/// Schema-versioned envelope wrapping every persisted document.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub payload: T,
}

/// Write `payload` to `path` wrapped in a versioned envelope, atomically.
pub fn save_atomic<T: Serialize>(path: impl AsRef<Path>, version: u32, payload: &T) -> Result<()> {
    let path = path.as_ref();
    let envelope = Envelope {
        version,
        updated_at: chrono::Utc::now(),
        payload,
    };

    let content =
        serde_json::to_string_pretty(&envelope).context("failed to serialise persisted state")?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp state to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp state to {}", path.display()))?;

    info!(path = %path.display(), "persisted state saved (atomic)");
    Ok(())
}

/// Load a document written by [`save_atomic`], falling back to `T::default()`
/// with a warning if the file is missing or unreadable. A corrupted file is
/// left on disk (not deleted) so it can be inspected.
pub fn load_or_default<T>(path: impl AsRef<Path>) -> T
where
    T: DeserializeOwned + Default,
{
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Envelope<T>>(&content) {
            Ok(envelope) => envelope.payload,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "persisted state corrupt, using defaults");
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        count: u32,
        label: String,
    }

    #[test]
    fn save_then_load_round_trips_the_payload() {
        let dir = std::env::temp_dir().join(format!("signalos-persist-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.json");

        let payload = Sample { count: 7, label: "hello".to_string() };
        save_atomic(&path, 1, &payload).unwrap();

        let loaded: Sample = load_or_default(&path);
        assert_eq!(loaded, payload);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_missing_file_falls_back_to_default() {
        let path = std::env::temp_dir().join("signalos-persist-test-missing-does-not-exist.json");
        std::fs::remove_file(&path).ok();
        let loaded: Sample = load_or_default(&path);
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn load_corrupt_file_falls_back_to_default_and_keeps_the_file() {
        let dir = std::env::temp_dir().join(format!("signalos-persist-test-corrupt-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("corrupt.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let loaded: Sample = load_or_default(&path);
        assert_eq!(loaded, Sample::default());
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_atomic_never_leaves_a_tmp_file_behind() {
        let dir = std::env::temp_dir().join(format!("signalos-persist-test-tmp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.json");

        save_atomic(&path, 1, &Sample { count: 1, label: "a".to_string() }).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
