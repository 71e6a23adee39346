mod artifacts;
mod engine;
mod events;
mod prompt;
mod storage;
mod summary;

pub use artifacts::SummaryArtifacts;
pub use artifacts::extract_artifacts_from_events;
pub use artifacts::merge_list;
pub use engine::CharCountEstimator;
pub use engine::CompactionOutcome;
pub use engine::CompactionPolicy;
pub use engine::CompactionReason;
pub use engine::CompactionRequest;
pub use engine::DEFAULT_HIGH_WATERMARK_RATIO;
pub use engine::DEFAULT_TARGET_RATIO;
pub use engine::DeltaSummarizer;
pub use engine::MIN_RECENT_EVENTS;
pub use engine::MIN_RECENT_USER_TURNS;
pub use engine::TokenEstimator;
pub use engine::build_model_context_messages;
pub use engine::run_compaction;
pub use events::ChatMessage;
pub use events::ChatRole;
pub use events::CompactEvent;
pub use events::CompactEventType;
pub use events::TranscriptMessage;
pub use events::backfill_events_from_history;
pub use prompt::build_retry_prompt;
pub use prompt::build_summarizer_prompt;
pub use prompt::parse_summary_response;
pub use storage::CompactionSidecarPaths;
pub use storage::CompactionStore;
pub use storage::PersistedCompactionState;
pub use storage::sidecar_paths;
pub use summary::DecisionRecord;
pub use summary::SUMMARY_SCHEMA_VERSION;
pub use summary::SummaryState;
pub use summary::merge_summaries;
pub use summary::render_summary_markdown;
