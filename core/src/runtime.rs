//! Runtime assembly: one object owning the shell baseline, the background
//! session registry, the tool registry with built-ins, and per-session
//! compaction handles.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::background::BackgroundSessionManager;
use crate::compact::ChatMessage;
use crate::compact::CompactEvent;
use crate::compact::CompactionOutcome;
use crate::compact::CompactionPolicy;
use crate::compact::CompactionReason;
use crate::compact::CompactionRequest;
use crate::compact::CompactionStore;
use crate::compact::DeltaSummarizer;
use crate::compact::PersistedCompactionState;
use crate::compact::SummaryState;
use crate::compact::TokenEstimator;
use crate::compact::TranscriptMessage;
use crate::compact::backfill_events_from_history;
use crate::compact::build_model_context_messages;
use crate::compact::render_summary_markdown;
use crate::compact::run_compaction;
use crate::error::LoafErr;
use crate::error::Result;
use crate::shell_state::ShellBaseline;
use crate::tools::ToolCall;
use crate::tools::ToolContext;
use crate::tools::ToolRegistry;
use crate::tools::ToolResult;
use crate::tools::ToolSpec;
use crate::tools::handlers::apply_patch_tool;
use crate::tools::handlers::background_tools;
use crate::tools::handlers::bash_tool;

const DATA_DIR_NAME: &str = ".loaf";
const CUSTOM_TOOL_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Override for the user data directory (default: `~/.loaf`).
    pub home_dir: Option<PathBuf>,
    pub compaction_policy: CompactionPolicy,
}

pub struct AgentRuntime {
    baseline: Arc<Mutex<ShellBaseline>>,
    background: BackgroundSessionManager,
    tools: ToolRegistry,
    policy: CompactionPolicy,
    data_dir: PathBuf,
    compaction_sessions: Mutex<HashMap<PathBuf, Arc<CompactionSession>>>,
}

impl AgentRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let baseline = Arc::new(Mutex::new(ShellBaseline::os_defaults()));
        let background = BackgroundSessionManager::new();

        let mut tools = ToolRegistry::new();
        // Built-in registration cannot fail: the names are static and valid.
        let _ = tools.register(bash_tool(Arc::clone(&baseline)));
        for tool in background_tools(background.clone()) {
            let _ = tools.register(tool);
        }
        let _ = tools.register(apply_patch_tool());

        let data_dir = config.home_dir.unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DATA_DIR_NAME)
        });

        Self {
            baseline,
            background,
            tools,
            policy: config.compaction_policy,
            data_dir,
            compaction_sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.tools.list()
    }

    pub async fn call_tool(&self, call: &ToolCall, ctx: ToolContext) -> ToolResult {
        self.tools.invoke(call, ctx).await
    }

    pub fn background(&self) -> &BackgroundSessionManager {
        &self.background
    }

    pub fn shell_baseline(&self) -> Arc<Mutex<ShellBaseline>> {
        Arc::clone(&self.baseline)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Plugin directory (`~/.loaf/tools`). Only discovery lives in core;
    /// loading the plugins is the frontend's concern.
    pub fn custom_tools_dir(&self) -> PathBuf {
        self.data_dir.join("tools")
    }

    pub fn discover_custom_tool_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(self.custom_tools_dir()) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| CUSTOM_TOOL_EXTENSIONS.contains(&ext))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }

    /// Opens (or returns the already-open) compaction session for a rollout
    /// path. The handle serialises passes internally.
    pub async fn compaction_session(&self, rollout: &Path) -> Result<Arc<CompactionSession>> {
        let mut sessions = self.compaction_sessions.lock().await;
        if let Some(existing) = sessions.get(rollout) {
            return Ok(Arc::clone(existing));
        }
        let session = CompactionSession::open(rollout, self.policy).await?;
        sessions.insert(rollout.to_path_buf(), Arc::clone(&session));
        Ok(session)
    }

    /// Best-effort cleanup at process exit: terminate running sessions.
    pub async fn shutdown(&self) {
        info!("runtime shutdown: terminating background sessions");
        self.background.shutdown_all().await;
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CompactionSessionStatus {
    pub event_count: usize,
    pub next_index: u64,
    pub anchor: u64,
    pub backfilled_from_rollout: bool,
    pub summary: SummaryState,
}

struct CompactionSessionInner {
    events: Vec<CompactEvent>,
    next_index: u64,
    anchor: u64,
    summary: SummaryState,
    backfilled: bool,
}

/// Per-session compaction handle. The inner mutex is the re-entrancy
/// guard the engine requires: one pass at a time per session.
pub struct CompactionSession {
    store: CompactionStore,
    policy: CompactionPolicy,
    inner: Mutex<CompactionSessionInner>,
}

impl CompactionSession {
    pub async fn open(rollout: &Path, policy: CompactionPolicy) -> Result<Arc<Self>> {
        let store = CompactionStore::for_rollout(rollout);
        let events = store.load_events().await?;
        let state = store.load_state().await?;
        let next_index = events.last().map(|event| event.index + 1).unwrap_or(0);
        Ok(Arc::new(Self {
            store,
            policy,
            inner: Mutex::new(CompactionSessionInner {
                events,
                next_index,
                anchor: state.last_anchor_event_index,
                summary: state.summary_state,
                backfilled: state.backfilled_from_rollout,
            }),
        }))
    }

    /// Appends one event, assigning the next contiguous index.
    pub async fn record_event<F>(&self, build: F) -> Result<u64>
    where
        F: FnOnce(u64) -> CompactEvent,
    {
        let mut inner = self.inner.lock().await;
        let index = inner.next_index;
        let mut event = build(index);
        event.index = index;
        self.store.append_event(&event).await?;
        inner.events.push(event);
        inner.next_index = index + 1;
        Ok(index)
    }

    /// Rebuilds the log from a stored transcript. Only valid while the log
    /// is empty; returns the number of events appended.
    pub async fn backfill_from_rollout(&self, history: &[TranscriptMessage]) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        if !inner.events.is_empty() {
            return Err(LoafErr::invalid_input(
                "cannot backfill: the event log already has entries",
            ));
        }
        let events = backfill_events_from_history(history, inner.next_index);
        for event in &events {
            self.store.append_event(event).await?;
        }
        inner.next_index += events.len() as u64;
        inner.events.extend(events.iter().cloned());
        inner.backfilled = true;
        self.persist_state(&inner).await?;
        Ok(events.len())
    }

    /// Runs one compaction pass and persists the advanced state. On error
    /// the anchor and summary are left untouched.
    pub async fn run_pass(
        &self,
        model_context_window_tokens: u64,
        pinned_token_estimate: u64,
        reason: CompactionReason,
        force: bool,
        summarizer: &dyn DeltaSummarizer,
        estimator: &dyn TokenEstimator,
    ) -> Result<CompactionOutcome> {
        let mut inner = self.inner.lock().await;
        let request = CompactionRequest {
            events: &inner.events,
            summary: &inner.summary,
            anchor: inner.anchor,
            model_context_window_tokens,
            pinned_token_estimate,
            reason,
            force,
            policy: self.policy,
        };
        let outcome = run_compaction(request, summarizer, estimator)
            .await
            .map_err(|err| LoafErr::invalid_input(format!("compaction failed: {err}")))?;

        if outcome.compressed {
            inner.anchor = outcome.anchor;
            inner.summary = outcome.summary.clone();
            self.persist_state(&inner).await?;
            self.store
                .write_summary_markdown(&render_summary_markdown(&inner.summary))
                .await?;
        }
        Ok(outcome)
    }

    pub async fn context_messages(&self) -> Vec<ChatMessage> {
        let inner = self.inner.lock().await;
        build_model_context_messages(&inner.summary, &inner.events, inner.anchor)
    }

    pub async fn status(&self) -> CompactionSessionStatus {
        let inner = self.inner.lock().await;
        CompactionSessionStatus {
            event_count: inner.events.len(),
            next_index: inner.next_index,
            anchor: inner.anchor,
            backfilled_from_rollout: inner.backfilled,
            summary: inner.summary.clone(),
        }
    }

    async fn persist_state(&self, inner: &CompactionSessionInner) -> Result<()> {
        self.store
            .save_state(&PersistedCompactionState {
                schema_version: crate::compact::SUMMARY_SCHEMA_VERSION,
                last_anchor_event_index: inner.anchor,
                backfilled_from_rollout: inner.backfilled,
                summary_state: inner.summary.clone(),
                updated_at_iso: chrono::Utc::now().to_rfc3339(),
            })
            .await
    }
}
