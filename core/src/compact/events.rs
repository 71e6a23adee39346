//! Typed append-only event log entries and their chat-message projections.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::truncate::truncate_middle;

const PAYLOAD_PREVIEW_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactEventType {
    UserMsg,
    AssistantMsg,
    ToolResult,
    FileRead,
    FileWritePatch,
    CommandRun,
    ErrorObserved,
    Decision,
    PlanStep,
}

/// One event in a session's compaction log. Indices are strictly
/// increasing and contiguous within a session; the payload is opaque to
/// the engine apart from the well-known keys used by projections and
/// artifact extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactEvent {
    pub index: u64,
    pub at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: CompactEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl CompactEvent {
    pub fn new(index: u64, kind: CompactEventType, payload: Map<String, Value>) -> Self {
        Self {
            index,
            at: Utc::now(),
            kind,
            turn_id: None,
            provider: None,
            payload,
        }
    }

    pub fn with_turn(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn user_msg(index: u64, text: impl Into<String>) -> Self {
        Self::new(index, CompactEventType::UserMsg, text_payload(text))
    }

    pub fn assistant_msg(index: u64, text: impl Into<String>) -> Self {
        Self::new(index, CompactEventType::AssistantMsg, text_payload(text))
    }

    pub fn command_run(index: u64, command: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("command".to_string(), Value::String(command.into()));
        Self::new(index, CompactEventType::CommandRun, payload)
    }

    pub fn tool_result(index: u64, tool: impl Into<String>, ok: bool, output: Value) -> Self {
        let mut payload = Map::new();
        payload.insert("tool".to_string(), Value::String(tool.into()));
        payload.insert("ok".to_string(), Value::Bool(ok));
        payload.insert("output".to_string(), output);
        Self::new(index, CompactEventType::ToolResult, payload)
    }

    pub fn error_observed(index: u64, message: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("message".to_string(), Value::String(message.into()));
        Self::new(index, CompactEventType::ErrorObserved, payload)
    }

    pub fn decision(index: u64, decision: impl Into<String>, rationale: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("decision".to_string(), Value::String(decision.into()));
        payload.insert("rationale".to_string(), Value::String(rationale.into()));
        Self::new(index, CompactEventType::Decision, payload)
    }

    pub fn plan_step(index: u64, step: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("step".to_string(), Value::String(step.into()));
        Self::new(index, CompactEventType::PlanStep, payload)
    }

    pub fn file_read(index: u64, path: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("path".to_string(), Value::String(path.into()));
        Self::new(index, CompactEventType::FileRead, payload)
    }

    pub fn file_write_patch(index: u64, paths: Vec<String>) -> Self {
        let mut payload = Map::new();
        payload.insert(
            "paths".to_string(),
            Value::Array(paths.into_iter().map(Value::String).collect()),
        );
        Self::new(index, CompactEventType::FileWritePatch, payload)
    }

    /// Projects the event to the chat message shown to the model.
    pub fn chat_message(&self) -> ChatMessage {
        let (role, tag, primary_key) = projection_row(self);
        let text = match tag {
            None => self
                .primary_string(primary_key)
                .unwrap_or_else(|| self.payload_preview()),
            Some(tag) => match self.primary_string(primary_key) {
                Some(primary) => format!("{tag} {primary}"),
                None => format!("{tag} {}", self.payload_preview()),
            },
        };
        ChatMessage { role, text }
    }

    fn primary_string(&self, key: &str) -> Option<String> {
        match self.payload.get(key)? {
            Value::String(text) => Some(text.clone()),
            Value::Array(items) => {
                let joined: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                if joined.is_empty() {
                    None
                } else {
                    Some(joined.join(", "))
                }
            }
            _ => None,
        }
    }

    fn payload_preview(&self) -> String {
        let raw = serde_json::to_string(&self.payload).unwrap_or_else(|_| "{}".to_string());
        let (clipped, _) = truncate_middle(&raw, PAYLOAD_PREVIEW_CHARS);
        clipped
    }
}

/// One row per event kind: role, bracketed tag (None round-trips the text
/// as-is), and the payload key holding the primary string. Adding an event
/// kind means adding one row here.
fn projection_row(event: &CompactEvent) -> (ChatRole, Option<String>, &'static str) {
    use CompactEventType::*;
    match event.kind {
        UserMsg => (ChatRole::User, None, "text"),
        AssistantMsg => (ChatRole::Assistant, None, "text"),
        CommandRun => (ChatRole::Assistant, Some("[command]".to_string()), "command"),
        ToolResult => {
            let ok = event
                .payload
                .get("ok")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let tag = if ok {
                "[tool result:ok]"
            } else {
                "[tool result:error]"
            };
            let key = if ok { "output" } else { "error" };
            (ChatRole::Assistant, Some(tag.to_string()), key)
        }
        ErrorObserved => (ChatRole::Assistant, Some("[error]".to_string()), "message"),
        Decision => (ChatRole::Assistant, Some("[decision]".to_string()), "decision"),
        PlanStep => (ChatRole::Assistant, Some("[plan step]".to_string()), "step"),
        FileRead => (ChatRole::Assistant, Some("[file read]".to_string()), "path"),
        FileWritePatch => (ChatRole::Assistant, Some("[file write]".to_string()), "paths"),
    }
}

fn text_payload(text: impl Into<String>) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("text".to_string(), Value::String(text.into()));
    payload
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// A transcript entry used to rebuild the event log from a stored rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_count: usize,
}

/// Rebuilds a contiguous event sequence from a chat transcript. Messages
/// that are empty and carry no images are skipped; indices start at
/// `start_index`.
pub fn backfill_events_from_history(
    history: &[TranscriptMessage],
    start_index: u64,
) -> Vec<CompactEvent> {
    let mut events = Vec::new();
    let mut index = start_index;
    for message in history {
        if message.text.trim().is_empty() && message.image_count == 0 {
            continue;
        }
        let mut event = if message.role == "user" {
            CompactEvent::user_msg(index, message.text.clone())
        } else {
            CompactEvent::assistant_msg(index, message.text.clone())
        };
        if message.image_count > 0 {
            event.payload.insert(
                "image_count".to_string(),
                Value::Number(message.image_count.into()),
            );
        }
        events.push(event);
        index += 1;
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn user_and_assistant_messages_round_trip_text() {
        let user = CompactEvent::user_msg(0, "hello there");
        let message = user.chat_message();
        assert_eq!(message.role, ChatRole::User);
        assert_eq!(message.text, "hello there");

        let assistant = CompactEvent::assistant_msg(1, "hi");
        assert_eq!(assistant.chat_message().role, ChatRole::Assistant);
        assert_eq!(assistant.chat_message().text, "hi");
    }

    #[test]
    fn operational_events_render_bracketed_tags() {
        assert_eq!(
            CompactEvent::command_run(0, "cargo check").chat_message().text,
            "[command] cargo check"
        );
        assert_eq!(
            CompactEvent::error_observed(1, "boom").chat_message().text,
            "[error] boom"
        );
        assert_eq!(
            CompactEvent::decision(2, "use sidecars", "simpler").chat_message().text,
            "[decision] use sidecars"
        );
        assert_eq!(
            CompactEvent::plan_step(3, "write tests").chat_message().text,
            "[plan step] write tests"
        );
        assert_eq!(
            CompactEvent::file_read(4, "src/lib.rs").chat_message().text,
            "[file read] src/lib.rs"
        );
        assert_eq!(
            CompactEvent::file_write_patch(5, vec!["a.rs".to_string(), "b.rs".to_string()])
                .chat_message()
                .text,
            "[file write] a.rs, b.rs"
        );
    }

    #[test]
    fn tool_results_tag_ok_and_error() {
        let ok = CompactEvent::tool_result(0, "bash", true, json!("listing"));
        assert_eq!(ok.chat_message().text, "[tool result:ok] listing");

        let mut failed = CompactEvent::tool_result(1, "bash", false, Value::Null);
        failed
            .payload
            .insert("error".to_string(), json!("exit 127"));
        assert_eq!(failed.chat_message().text, "[tool result:error] exit 127");
    }

    #[test]
    fn missing_primary_string_falls_back_to_json_preview() {
        let event = CompactEvent::tool_result(0, "bash", true, json!({"lines": 3}));
        let text = event.chat_message().text;
        assert!(text.starts_with("[tool result:ok] {"));
        assert!(text.contains("lines"));
    }

    #[test]
    fn event_type_serde_uses_snake_case_tags() {
        let event = CompactEvent::file_write_patch(7, vec!["x".to_string()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "file_write_patch");
        let back: CompactEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, CompactEventType::FileWritePatch);
    }

    #[test]
    fn backfill_skips_empty_imageless_messages() {
        let history = vec![
            TranscriptMessage {
                role: "user".to_string(),
                text: "question".to_string(),
                image_count: 0,
            },
            TranscriptMessage {
                role: "assistant".to_string(),
                text: "   ".to_string(),
                image_count: 0,
            },
            TranscriptMessage {
                role: "user".to_string(),
                text: String::new(),
                image_count: 2,
            },
            TranscriptMessage {
                role: "assistant".to_string(),
                text: "answer".to_string(),
                image_count: 0,
            },
        ];
        let events = backfill_events_from_history(&history, 10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].index, 10);
        assert_eq!(events[1].index, 11);
        assert_eq!(events[1].kind, CompactEventType::UserMsg);
        assert_eq!(events[1].payload.get("image_count"), Some(&json!(2)));
        assert_eq!(events[2].index, 12);
    }
}
