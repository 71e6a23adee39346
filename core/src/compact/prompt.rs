//! Prompt construction for LLM-driven delta summarisation, plus tolerant
//! parsing of the model's JSON reply.

use serde_json::Value;

use crate::compact::events::ChatMessage;
use crate::compact::events::CompactEvent;
use crate::compact::summary::SummaryState;
use crate::truncate::truncate_middle;

const DELTA_ROW_PREVIEW_CHARS: usize = 240;

const SUMMARIZER_SYSTEM_PROMPT: &str = "\
You maintain the working summary of a coding session. Given the current \
summary JSON and a batch of new session events, return ONLY valid JSON \
matching the summary schema. Preserve continuity: keep existing decisions, \
constraints, and artifact paths; append new ones. Never drop file paths, \
commands, or endpoints. Keep entries short and concrete.";

const RETRY_SUFFIX: &str = "\
\n\nYour previous reply was not parseable. Return ONLY the JSON object: \
no code fences, no prose, no commentary before or after.";

fn schema_example() -> Value {
    serde_json::json!({
        "schema_version": 1,
        "intent": "one sentence describing the task",
        "constraints": ["strings"],
        "decisions": [{
            "decision": "what was decided",
            "rationale": "why",
            "at_iso": "2026-01-01T00:00:00Z",
            "tradeoffs": "optional"
        }],
        "progress": ["strings"],
        "open_questions": ["strings"],
        "next_steps": ["strings"],
        "artifacts": {
            "files_touched": ["paths"],
            "files_created": ["paths"],
            "commands_run": ["commands"],
            "errors_seen": ["messages"],
            "external_endpoints": ["urls"]
        },
        "updated_at_iso": "2026-01-01T00:00:00Z"
    })
}

fn render_delta_rows(delta: &[CompactEvent]) -> String {
    delta
        .iter()
        .map(|event| {
            let payload =
                serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_string());
            let (clipped, _) = truncate_middle(&payload, DELTA_ROW_PREVIEW_CHARS);
            let kind = serde_json::to_string(&event.kind).unwrap_or_default();
            format!("{} {} {}", event.index, kind.trim_matches('"'), clipped)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn user_message(previous: &SummaryState, delta: &[CompactEvent]) -> String {
    let old_summary = serde_json::to_string(previous).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Current summary JSON:\n{old_summary}\n\nNew events (index type payload):\n{}\n\n\
         Schema example:\n{}",
        render_delta_rows(delta),
        schema_example()
    )
}

/// System + user message pair for the first summarisation attempt.
pub fn build_summarizer_prompt(
    previous: &SummaryState,
    delta: &[CompactEvent],
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SUMMARIZER_SYSTEM_PROMPT),
        ChatMessage::user(user_message(previous, delta)),
    ]
}

/// Retry prompt after an unparseable reply: same content with an explicit
/// no-fences instruction.
pub fn build_retry_prompt(previous: &SummaryState, delta: &[CompactEvent]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!("{SUMMARIZER_SYSTEM_PROMPT}{RETRY_SUFFIX}")),
        ChatMessage::user(user_message(previous, delta)),
    ]
}

/// Accepts raw JSON, fenced JSON, or the first `{...}` substring.
pub fn parse_summary_response(raw: &str) -> anyhow::Result<SummaryState> {
    let trimmed = raw.trim();
    if let Ok(summary) = serde_json::from_str::<SummaryState>(trimmed) {
        return Ok(summary);
    }

    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Ok(summary) = serde_json::from_str::<SummaryState>(fenced.trim()) {
            return Ok(summary);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(summary) = serde_json::from_str::<SummaryState>(&trimmed[start..=end]) {
                return Ok(summary);
            }
        }
    }

    anyhow::bail!("summariser reply is not valid summary JSON")
}

fn extract_fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip the info string ("json") on the opening fence line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_summary_json() -> String {
        serde_json::to_string(&SummaryState {
            intent: "test".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn prompt_contains_old_summary_delta_and_schema() {
        let previous = SummaryState {
            intent: "build the thing".to_string(),
            ..Default::default()
        };
        let delta = vec![CompactEvent::command_run(3, "cargo check")];
        let messages = build_summarizer_prompt(&previous, &delta);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].text.contains("ONLY valid JSON"));
        assert!(messages[1].text.contains("build the thing"));
        assert!(messages[1].text.contains("cargo check"));
        assert!(messages[1].text.contains("schema_version"));
    }

    #[test]
    fn retry_prompt_adds_no_fence_instruction() {
        let messages = build_retry_prompt(&SummaryState::default(), &[]);
        assert!(messages[0].text.contains("no code fences"));
    }

    #[test]
    fn parses_raw_json() {
        let summary = parse_summary_response(&sample_summary_json()).unwrap();
        assert_eq!(summary.intent, "test");
    }

    #[test]
    fn parses_fenced_json() {
        let fenced = format!("```json\n{}\n```", sample_summary_json());
        let summary = parse_summary_response(&fenced).unwrap();
        assert_eq!(summary.intent, "test");
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let wrapped = format!("Here you go:\n{}\nHope that helps!", sample_summary_json());
        let summary = parse_summary_response(&wrapped).unwrap();
        assert_eq!(summary.intent, "test");
    }

    #[test]
    fn rejects_unparseable_reply() {
        assert!(parse_summary_response("I could not produce a summary.").is_err());
    }
}
