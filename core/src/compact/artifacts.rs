//! Artifact extraction: scans event payloads for file paths, commands,
//! errors, and URLs that must survive summarisation.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::compact::events::CompactEvent;
use crate::compact::events::CompactEventType;

/// Five deduplicated, case-insensitive string lists carried through every
/// summary merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryArtifacts {
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub files_created: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<String>,
    #[serde(default)]
    pub errors_seen: Vec<String>,
    #[serde(default)]
    pub external_endpoints: Vec<String>,
}

impl SummaryArtifacts {
    pub fn is_empty(&self) -> bool {
        self.files_touched.is_empty()
            && self.files_created.is_empty()
            && self.commands_run.is_empty()
            && self.errors_seen.is_empty()
            && self.external_endpoints.is_empty()
    }

    pub fn merge_from(&mut self, other: &SummaryArtifacts) {
        merge_list(&mut self.files_touched, other.files_touched.iter().cloned());
        merge_list(&mut self.files_created, other.files_created.iter().cloned());
        merge_list(&mut self.commands_run, other.commands_run.iter().cloned());
        merge_list(&mut self.errors_seen, other.errors_seen.iter().cloned());
        merge_list(
            &mut self.external_endpoints,
            other.external_endpoints.iter().cloned(),
        );
    }
}

/// Appends `additions` to `dst`, trimming, skipping empties, and
/// deduplicating case-insensitively while preserving first-insertion order.
pub fn merge_list(dst: &mut Vec<String>, additions: impl IntoIterator<Item = String>) {
    let mut seen: HashSet<String> = dst.iter().map(|item| item.to_lowercase()).collect();
    for addition in additions {
        let trimmed = addition.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            dst.push(trimmed.to_string());
        }
    }
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\bhttps?://[^\s"'`<>()]+"#).expect("url regex is valid")
    })
}

/// (pattern, capture-is-created) pairs classifying bash commands.
fn command_classifiers() -> &'static [(Regex, bool)] {
    static RULES: OnceLock<Vec<(Regex, bool)>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rules: &[(&str, bool)] = &[
            // File creation: touch/mkdir and shell redirections.
            (r"(?:^|[;&|]\s*|\s)(?:touch|mkdir)(?:\s+-\S+)*\s+([^\s;|&>]+)", true),
            (r">>?\s*([^\s;|&]+)", true),
            (r"(?:^|[;&|]\s*|\s)(?:cp|mv)(?:\s+-\S+)*\s+\S+\s+([^\s;|&]+)", true),
            // File reads/edits.
            (
                r"(?:^|[;&|]\s*|\s)(?:cat|head|tail|less|more|wc|stat)(?:\s+-\S+)*\s+([^\s;|&]+)",
                false,
            ),
            (
                r"(?:^|[;&|]\s*|\s)(?:vi|vim|nano|sed|awk)(?:\s+-\S+)*\s+([^\s;|&]+)",
                false,
            ),
        ];
        rules
            .iter()
            .map(|(pattern, created)| {
                (
                    Regex::new(pattern).expect("classifier regex is valid"),
                    *created,
                )
            })
            .collect()
    })
}

/// Walks every event payload (recursively through maps and arrays), pulling
/// URLs out of all strings and classifying bash commands, file events, and
/// observed errors into artifact lists.
pub fn extract_artifacts_from_events(events: &[CompactEvent]) -> SummaryArtifacts {
    let mut artifacts = SummaryArtifacts::default();

    for event in events {
        let mut strings = Vec::new();
        collect_strings(&Value::Object(event.payload.clone()), &mut strings);
        let urls = strings
            .iter()
            .flat_map(|text| {
                url_regex()
                    .find_iter(text)
                    .map(|found| found.as_str().trim_end_matches(['.', ',']).to_string())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        merge_list(&mut artifacts.external_endpoints, urls);

        match event.kind {
            CompactEventType::CommandRun => {
                if let Some(command) = event.payload.get("command").and_then(Value::as_str) {
                    merge_list(&mut artifacts.commands_run, [command.to_string()]);
                    classify_command(command, &mut artifacts);
                }
            }
            CompactEventType::ErrorObserved => {
                if let Some(message) = event.payload.get("message").and_then(Value::as_str) {
                    merge_list(&mut artifacts.errors_seen, [message.to_string()]);
                }
            }
            CompactEventType::FileRead => {
                if let Some(path) = event.payload.get("path").and_then(Value::as_str) {
                    merge_list(&mut artifacts.files_touched, [path.to_string()]);
                }
            }
            CompactEventType::FileWritePatch => {
                if let Some(paths) = event.payload.get("paths").and_then(Value::as_array) {
                    merge_list(
                        &mut artifacts.files_touched,
                        paths
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect::<Vec<_>>(),
                    );
                }
            }
            CompactEventType::ToolResult => {
                if let Some(error) = event.payload.get("error").and_then(Value::as_str) {
                    merge_list(&mut artifacts.errors_seen, [error.to_string()]);
                }
            }
            _ => {}
        }
    }

    artifacts
}

fn classify_command(command: &str, artifacts: &mut SummaryArtifacts) {
    for (regex, created) in command_classifiers() {
        for captures in regex.captures_iter(command) {
            if let Some(path) = captures.get(1) {
                let target = if *created {
                    &mut artifacts.files_created
                } else {
                    &mut artifacts.files_touched
                };
                merge_list(target, [path.as_str().to_string()]);
            }
        }
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => out.push(text.clone()),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}
