//! Sidecar persistence for the compaction subsystem.
//!
//! For a rollout file `X.jsonl` the sidecars live beside it:
//! `X.compact.events.jsonl` (append-only event log),
//! `X.compact.state.json` (pretty-printed, written atomically), and
//! `X.compact.summary.md` (human-readable mirror, written atomically).

use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::compact::events::CompactEvent;
use crate::compact::summary::SUMMARY_SCHEMA_VERSION;
use crate::compact::summary::SummaryState;
use crate::error::LoafErr;
use crate::error::Result;

const EVENTS_SUFFIX: &str = ".compact.events.jsonl";
const STATE_SUFFIX: &str = ".compact.state.json";
const SUMMARY_SUFFIX: &str = ".compact.summary.md";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionSidecarPaths {
    pub events: PathBuf,
    pub state: PathBuf,
    pub summary: PathBuf,
}

/// Derives sidecar paths from a rollout path, stripping a `.jsonl`
/// extension when present.
pub fn sidecar_paths(rollout: &Path) -> CompactionSidecarPaths {
    let base = match rollout.extension().and_then(|ext| ext.to_str()) {
        Some("jsonl") => rollout.with_extension(""),
        _ => rollout.to_path_buf(),
    };
    let stem = base.display().to_string();
    CompactionSidecarPaths {
        events: PathBuf::from(format!("{stem}{EVENTS_SUFFIX}")),
        state: PathBuf::from(format!("{stem}{STATE_SUFFIX}")),
        summary: PathBuf::from(format!("{stem}{SUMMARY_SUFFIX}")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCompactionState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub last_anchor_event_index: u64,
    #[serde(default)]
    pub backfilled_from_rollout: bool,
    #[serde(default)]
    pub summary_state: SummaryState,
    #[serde(default)]
    pub updated_at_iso: String,
}

fn default_schema_version() -> u32 {
    SUMMARY_SCHEMA_VERSION
}

impl Default for PersistedCompactionState {
    fn default() -> Self {
        Self {
            schema_version: SUMMARY_SCHEMA_VERSION,
            last_anchor_event_index: 0,
            backfilled_from_rollout: false,
            summary_state: SummaryState::default(),
            updated_at_iso: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompactionStore {
    paths: CompactionSidecarPaths,
}

impl CompactionStore {
    pub fn for_rollout(rollout: &Path) -> Self {
        Self {
            paths: sidecar_paths(rollout),
        }
    }

    pub fn paths(&self) -> &CompactionSidecarPaths {
        &self.paths
    }

    pub async fn append_event(&self, event: &CompactEvent) -> Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|err| storage_err(&self.paths.events, err.into()))?;
        if let Some(parent) = self.paths.events.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| storage_err(&self.paths.events, err))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.events)
            .await
            .map_err(|err| storage_err(&self.paths.events, err))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|err| storage_err(&self.paths.events, err))?;
        file.flush()
            .await
            .map_err(|err| storage_err(&self.paths.events, err))?;
        Ok(())
    }

    /// Loads the event log, tolerating damage: a missing file yields an
    /// empty log, malformed lines are skipped, unknown event types are
    /// rejected line-by-line, invalid timestamps become `now`, and
    /// non-record payloads become `{}`.
    pub async fn load_events(&self) -> Result<Vec<CompactEvent>> {
        let raw = match fs::read_to_string(&self.paths.events).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_err(&self.paths.events, err)),
        };

        let mut events = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_event_line(line) {
                Some(event) => events.push(event),
                None => {
                    warn!(
                        path = %self.paths.events.display(),
                        line = line_no + 1,
                        "skipping malformed compaction event line"
                    );
                }
            }
        }
        Ok(events)
    }

    pub async fn save_state(&self, state: &PersistedCompactionState) -> Result<()> {
        let pretty = serde_json::to_string_pretty(state)
            .map_err(|err| storage_err(&self.paths.state, err.into()))?;
        write_atomic(&self.paths.state, format!("{pretty}\n").as_bytes()).await
    }

    /// Loads persisted state, returning defaults when the file is missing
    /// or unreadable as state JSON.
    pub async fn load_state(&self) -> Result<PersistedCompactionState> {
        let raw = match fs::read_to_string(&self.paths.state).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedCompactionState::default());
            }
            Err(err) => return Err(storage_err(&self.paths.state, err)),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(state),
            Err(err) => {
                warn!(
                    path = %self.paths.state.display(),
                    error = %err,
                    "compaction state unreadable; starting from defaults"
                );
                Ok(PersistedCompactionState::default())
            }
        }
    }

    pub async fn write_summary_markdown(&self, markdown: &str) -> Result<()> {
        write_atomic(&self.paths.summary, markdown.as_bytes()).await
    }
}

/// Parses one JSONL line with the tolerance rules applied before the typed
/// decode.
fn parse_event_line(line: &str) -> Option<CompactEvent> {
    let mut value: Value = serde_json::from_str(line).ok()?;
    let object = value.as_object_mut()?;

    match object.get("payload") {
        Some(Value::Object(_)) => {}
        _ => {
            object.insert("payload".to_string(), Value::Object(Default::default()));
        }
    }

    let timestamp_ok = object
        .get("at")
        .and_then(Value::as_str)
        .map(|raw| DateTime::parse_from_rfc3339(raw).is_ok())
        .unwrap_or(false);
    if !timestamp_ok {
        object.insert("at".to_string(), Value::String(Utc::now().to_rfc3339()));
    }

    // Unknown `type` tags fail the typed decode and reject the line.
    serde_json::from_value(value).ok()
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| storage_err(path, err))?;
    }
    let tmp = path.with_extension(match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    });
    fs::write(&tmp, contents)
        .await
        .map_err(|err| storage_err(&tmp, err))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|err| storage_err(path, err))?;
    Ok(())
}

fn storage_err(path: &Path, source: std::io::Error) -> LoafErr {
    LoafErr::Storage {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn sidecars_derive_from_rollout_path() {
        let paths = sidecar_paths(Path::new("/logs/rollout-abc.jsonl"));
        assert_eq!(
            paths.events,
            PathBuf::from("/logs/rollout-abc.compact.events.jsonl")
        );
        assert_eq!(
            paths.state,
            PathBuf::from("/logs/rollout-abc.compact.state.json")
        );
        assert_eq!(
            paths.summary,
            PathBuf::from("/logs/rollout-abc.compact.summary.md")
        );

        // No .jsonl extension: suffixes append to the full name.
        let paths = sidecar_paths(Path::new("/logs/session"));
        assert_eq!(
            paths.events,
            PathBuf::from("/logs/session.compact.events.jsonl")
        );
    }

    #[tokio::test]
    async fn events_append_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = CompactionStore::for_rollout(&dir.path().join("r.jsonl"));

        let first = CompactEvent::user_msg(0, "hello");
        let second = CompactEvent::command_run(1, "ls");
        store.append_event(&first).await.unwrap();
        store.append_event(&second).await.unwrap();

        let loaded = store.load_events().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].index, 0);
        assert_eq!(loaded[1].index, 1);
        assert_eq!(loaded[1].kind, crate::compact::events::CompactEventType::CommandRun);
    }

    #[tokio::test]
    async fn load_events_tolerates_damage() {
        let dir = tempdir().unwrap();
        let rollout = dir.path().join("r.jsonl");
        let store = CompactionStore::for_rollout(&rollout);

        let lines = [
            // Valid.
            r#"{"index":0,"at":"2026-01-01T00:00:00Z","type":"user_msg","payload":{"text":"hi"}}"#,
            // Malformed JSON: skipped.
            "{not json",
            // Unknown type: rejected.
            r#"{"index":1,"at":"2026-01-01T00:00:00Z","type":"quantum_msg","payload":{}}"#,
            // Invalid timestamp: replaced with now.
            r#"{"index":2,"at":"not-a-time","type":"assistant_msg","payload":{"text":"ok"}}"#,
            // Non-record payload: replaced with {}.
            r#"{"index":3,"at":"2026-01-01T00:00:00Z","type":"command_run","payload":"ls"}"#,
        ];
        std::fs::write(
            store.paths().events.clone(),
            lines.join("\n") + "\n",
        )
        .unwrap();

        let loaded = store.load_events().await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].index, 0);
        assert_eq!(loaded[1].index, 2);
        assert!(loaded[1].at.timestamp() > 0);
        assert_eq!(loaded[2].index, 3);
        assert!(loaded[2].payload.is_empty());
    }

    #[tokio::test]
    async fn missing_files_load_defaults() {
        let dir = tempdir().unwrap();
        let store = CompactionStore::for_rollout(&dir.path().join("none.jsonl"));
        assert!(store.load_events().await.unwrap().is_empty());
        assert_eq!(
            store.load_state().await.unwrap(),
            PersistedCompactionState::default()
        );
    }

    #[tokio::test]
    async fn state_round_trips_pretty_printed() {
        let dir = tempdir().unwrap();
        let store = CompactionStore::for_rollout(&dir.path().join("r.jsonl"));

        let state = PersistedCompactionState {
            last_anchor_event_index: 17,
            backfilled_from_rollout: true,
            ..Default::default()
        };
        store.save_state(&state).await.unwrap();

        let raw = std::fs::read_to_string(&store.paths().state).unwrap();
        assert!(raw.contains('\n'), "state JSON should be pretty-printed");

        let loaded = store.load_state().await.unwrap();
        assert_eq!(loaded.last_anchor_event_index, 17);
        assert!(loaded.backfilled_from_rollout);

        // No leftover tmp file after the atomic rename.
        assert!(!store.paths().state.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn summary_markdown_is_written_atomically() {
        let dir = tempdir().unwrap();
        let store = CompactionStore::for_rollout(&dir.path().join("r.jsonl"));
        store.write_summary_markdown("# Session summary\n").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&store.paths().summary).unwrap(),
            "# Session summary\n"
        );
    }
}
