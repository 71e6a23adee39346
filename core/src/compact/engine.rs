//! Anchored compaction engine.
//!
//! The engine never owns the conversation: callers hand it the event log,
//! the rolling summary, and the current anchor, and get back a (possibly)
//! advanced anchor, a merged summary, and the replacement context messages.
//! Token estimation and delta summarisation are both injected, so the
//! engine knows neither the tokeniser nor the model. It is pure apart from
//! the summariser callback; callers must serialise passes per session.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::compact::artifacts::extract_artifacts_from_events;
use crate::compact::events::ChatMessage;
use crate::compact::events::CompactEvent;
use crate::compact::events::CompactEventType;
use crate::compact::summary::SummaryState;
use crate::compact::summary::merge_summaries;
use crate::compact::summary::render_summary_markdown;

pub const DEFAULT_HIGH_WATERMARK_RATIO: f64 = 0.82;
pub const DEFAULT_TARGET_RATIO: f64 = 0.58;
const MIN_RATIO: f64 = 0.10;
const MAX_RATIO: f64 = 0.99;

/// The post-compaction tail keeps at least this many events...
pub const MIN_RECENT_EVENTS: usize = 12;
/// ...and at least this many user turns, whichever keeps more.
pub const MIN_RECENT_USER_TURNS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionPolicy {
    high_watermark_ratio: f64,
    target_ratio: f64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            high_watermark_ratio: DEFAULT_HIGH_WATERMARK_RATIO,
            target_ratio: DEFAULT_TARGET_RATIO,
        }
    }
}

impl CompactionPolicy {
    /// Ratios are clamped to [0.10, 0.99] at accept time.
    pub fn new(high_watermark_ratio: f64, target_ratio: f64) -> Self {
        Self {
            high_watermark_ratio: high_watermark_ratio.clamp(MIN_RATIO, MAX_RATIO),
            target_ratio: target_ratio.clamp(MIN_RATIO, MAX_RATIO),
        }
    }

    pub fn high_watermark_ratio(&self) -> f64 {
        self.high_watermark_ratio
    }

    pub fn target_ratio(&self) -> f64 {
        self.target_ratio
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionReason {
    Auto,
    Manual,
    ProviderSwitch,
}

/// Produces a candidate summary for the delta events. May call a model;
/// the engine only awaits the result.
#[async_trait]
pub trait DeltaSummarizer: Send + Sync {
    async fn summarize_delta(
        &self,
        previous: &SummaryState,
        delta: &[CompactEvent],
    ) -> anyhow::Result<SummaryState>;
}

/// Token estimation callback. The engine adds the caller-supplied pinned
/// overhead on top of whatever this returns.
pub trait TokenEstimator: Send + Sync {
    fn estimate_history_tokens(&self, messages: &[ChatMessage]) -> u64;
}

/// Chars-divided-by-four heuristic, good enough when no real tokeniser is
/// wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharCountEstimator;

impl TokenEstimator for CharCountEstimator {
    fn estimate_history_tokens(&self, messages: &[ChatMessage]) -> u64 {
        messages
            .iter()
            .map(|message| (message.text.chars().count() as u64) / 4 + 4)
            .sum()
    }
}

#[derive(Debug)]
pub struct CompactionRequest<'a> {
    pub events: &'a [CompactEvent],
    pub summary: &'a SummaryState,
    /// Events below this index are already folded into `summary`.
    pub anchor: u64,
    pub model_context_window_tokens: u64,
    pub pinned_token_estimate: u64,
    pub reason: CompactionReason,
    pub force: bool,
    pub policy: CompactionPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompactionOutcome {
    pub compressed: bool,
    pub anchor: u64,
    pub summary: SummaryState,
    pub context_messages: Vec<ChatMessage>,
    pub estimated_tokens_before: u64,
    pub estimated_tokens_after: u64,
}

/// Emits the model-facing context: an assistant summary message (when the
/// summary has content) followed by the projections of events at or above
/// the anchor.
pub fn build_model_context_messages(
    summary: &SummaryState,
    events: &[CompactEvent],
    anchor: u64,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if !summary.is_empty() {
        messages.push(ChatMessage::assistant(render_summary_markdown(summary)));
    }
    messages.extend(
        events
            .iter()
            .filter(|event| event.index >= anchor)
            .map(CompactEvent::chat_message),
    );
    messages
}

/// Runs one compaction pass. On error the caller should treat the anchor
/// and summary as unchanged.
pub async fn run_compaction(
    request: CompactionRequest<'_>,
    summarizer: &dyn DeltaSummarizer,
    estimator: &dyn TokenEstimator,
) -> anyhow::Result<CompactionOutcome> {
    let CompactionRequest {
        events,
        summary,
        anchor: anchor_before,
        model_context_window_tokens,
        pinned_token_estimate,
        reason,
        force,
        policy,
    } = request;

    let estimate = |summary: &SummaryState, anchor: u64| -> u64 {
        let messages = build_model_context_messages(summary, events, anchor);
        pinned_token_estimate + estimator.estimate_history_tokens(&messages)
    };

    let high_limit =
        (model_context_window_tokens as f64 * policy.high_watermark_ratio()) as u64;
    let target_limit = (model_context_window_tokens as f64 * policy.target_ratio()) as u64;

    let estimated_before = estimate(summary, anchor_before);
    let forced = force || reason == CompactionReason::ProviderSwitch;

    if !forced && estimated_before <= high_limit {
        return Ok(CompactionOutcome {
            compressed: false,
            anchor: anchor_before,
            summary: summary.clone(),
            context_messages: build_model_context_messages(summary, events, anchor_before),
            estimated_tokens_before: estimated_before,
            estimated_tokens_after: estimated_before,
        });
    }

    let upper_bound = anchor_before.max(minimum_recent_start(events));

    let new_anchor = if forced {
        upper_bound
    } else {
        let mut anchor = anchor_before;
        while anchor < upper_bound && estimate(summary, anchor) > target_limit {
            anchor = next_event_index(events, anchor).min(upper_bound);
        }
        anchor
    };

    if new_anchor <= anchor_before {
        return Ok(CompactionOutcome {
            compressed: false,
            anchor: anchor_before,
            summary: summary.clone(),
            context_messages: build_model_context_messages(summary, events, anchor_before),
            estimated_tokens_before: estimated_before,
            estimated_tokens_after: estimated_before,
        });
    }

    let delta: Vec<CompactEvent> = events
        .iter()
        .filter(|event| event.index >= anchor_before && event.index < new_anchor)
        .cloned()
        .collect();

    let candidate = summarizer.summarize_delta(summary, &delta).await?;
    let mut merged = merge_summaries(summary, &candidate, Utc::now());
    // Belt and braces: fold in artifacts computed directly from the delta,
    // so a sloppy summariser cannot lose paths or endpoints.
    merged
        .artifacts
        .merge_from(&extract_artifacts_from_events(&delta));

    let context_messages = build_model_context_messages(&merged, events, new_anchor);
    let estimated_after = pinned_token_estimate + estimator.estimate_history_tokens(&context_messages);

    debug!(
        anchor_before,
        new_anchor,
        delta_len = delta.len(),
        estimated_before,
        estimated_after,
        "compaction pass complete"
    );

    Ok(CompactionOutcome {
        compressed: true,
        anchor: new_anchor,
        summary: merged,
        context_messages,
        estimated_tokens_before: estimated_before,
        estimated_tokens_after: estimated_after,
    })
}

/// The highest anchor that still preserves the recency floor: at least
/// [`MIN_RECENT_EVENTS`] events AND [`MIN_RECENT_USER_TURNS`] user turns in
/// the tail (all of them when fewer exist).
fn minimum_recent_start(events: &[CompactEvent]) -> u64 {
    let Some(first) = events.first() else {
        return 0;
    };

    let start_by_count = if events.len() <= MIN_RECENT_EVENTS {
        first.index
    } else {
        events[events.len() - MIN_RECENT_EVENTS].index
    };

    let user_indices: Vec<u64> = events
        .iter()
        .filter(|event| event.kind == CompactEventType::UserMsg)
        .map(|event| event.index)
        .collect();
    let start_by_user = if user_indices.len() <= MIN_RECENT_USER_TURNS {
        first.index
    } else {
        user_indices[user_indices.len() - MIN_RECENT_USER_TURNS]
    };

    start_by_count.min(start_by_user)
}

fn next_event_index(events: &[CompactEvent], anchor: u64) -> u64 {
    events
        .iter()
        .map(|event| event.index)
        .find(|index| *index > anchor)
        .unwrap_or(anchor + 1)
}
