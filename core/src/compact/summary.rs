//! Rolling summary state and the union-append merge rules.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::compact::artifacts::SummaryArtifacts;
use crate::compact::artifacts::merge_list;

pub const SUMMARY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_iso: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tradeoffs: Option<String>,
}

/// The structured record that replaces elided events in the model context.
/// Lists only ever grow: merging is union, not replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,
    #[serde(default)]
    pub progress: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub artifacts: SummaryArtifacts,
    #[serde(default)]
    pub updated_at_iso: String,
}

fn default_schema_version() -> u32 {
    SUMMARY_SCHEMA_VERSION
}

impl Default for SummaryState {
    fn default() -> Self {
        Self {
            schema_version: SUMMARY_SCHEMA_VERSION,
            intent: String::new(),
            constraints: Vec::new(),
            decisions: Vec::new(),
            progress: Vec::new(),
            open_questions: Vec::new(),
            next_steps: Vec::new(),
            artifacts: SummaryArtifacts::default(),
            updated_at_iso: String::new(),
        }
    }
}

impl SummaryState {
    /// True when nothing has been summarised yet.
    pub fn is_empty(&self) -> bool {
        self.intent.trim().is_empty()
            && self.constraints.is_empty()
            && self.decisions.is_empty()
            && self.progress.is_empty()
            && self.open_questions.is_empty()
            && self.next_steps.is_empty()
            && self.artifacts.is_empty()
    }
}

/// Union-append merge of `previous` and `candidate`: previous order wins,
/// string lists dedupe case-insensitively, decisions dedupe by lowercased
/// (decision, rationale), and the candidate's intent is preferred unless it
/// is empty. The result is stamped with `now`.
pub fn merge_summaries(
    previous: &SummaryState,
    candidate: &SummaryState,
    now: DateTime<Utc>,
) -> SummaryState {
    let mut merged = previous.clone();
    merged.schema_version = SUMMARY_SCHEMA_VERSION;

    if !candidate.intent.trim().is_empty() {
        merged.intent = candidate.intent.trim().to_string();
    }

    merge_list(&mut merged.constraints, candidate.constraints.iter().cloned());
    merge_list(&mut merged.progress, candidate.progress.iter().cloned());
    merge_list(
        &mut merged.open_questions,
        candidate.open_questions.iter().cloned(),
    );
    merge_list(&mut merged.next_steps, candidate.next_steps.iter().cloned());
    merge_decisions(&mut merged.decisions, &candidate.decisions);
    merged.artifacts.merge_from(&candidate.artifacts);

    merged.updated_at_iso = now.to_rfc3339();
    merged
}

fn merge_decisions(dst: &mut Vec<DecisionRecord>, additions: &[DecisionRecord]) {
    let mut seen: std::collections::HashSet<(String, String)> = dst
        .iter()
        .map(|record| {
            (
                record.decision.trim().to_lowercase(),
                record.rationale.trim().to_lowercase(),
            )
        })
        .collect();
    for addition in additions {
        let decision = addition.decision.trim();
        if decision.is_empty() {
            continue;
        }
        let key = (
            decision.to_lowercase(),
            addition.rationale.trim().to_lowercase(),
        );
        if seen.insert(key) {
            dst.push(DecisionRecord {
                decision: decision.to_string(),
                rationale: addition.rationale.trim().to_string(),
                at_iso: addition.at_iso.clone(),
                tradeoffs: addition.tradeoffs.clone(),
            });
        }
    }
}

/// Deterministic Markdown rendering of the summary, used as the assistant
/// context message and mirrored into the `.compact.summary.md` sidecar.
pub fn render_summary_markdown(summary: &SummaryState) -> String {
    let mut out = String::from("# Session summary\n");

    if !summary.intent.trim().is_empty() {
        out.push_str("\n## Intent\n");
        out.push_str(summary.intent.trim());
        out.push('\n');
    }

    render_string_list(&mut out, "Constraints", &summary.constraints);

    if !summary.decisions.is_empty() {
        out.push_str("\n## Decisions\n");
        for record in &summary.decisions {
            out.push_str("- ");
            out.push_str(&record.decision);
            if !record.rationale.is_empty() {
                out.push_str(" — ");
                out.push_str(&record.rationale);
            }
            if let Some(tradeoffs) = &record.tradeoffs {
                out.push_str(" (tradeoffs: ");
                out.push_str(tradeoffs);
                out.push(')');
            }
            out.push('\n');
        }
    }

    render_string_list(&mut out, "Progress", &summary.progress);
    render_string_list(&mut out, "Open questions", &summary.open_questions);
    render_string_list(&mut out, "Next steps", &summary.next_steps);

    let artifacts = &summary.artifacts;
    if !artifacts.is_empty() {
        out.push_str("\n## Artifacts\n");
        render_artifact_list(&mut out, "Files touched", &artifacts.files_touched);
        render_artifact_list(&mut out, "Files created", &artifacts.files_created);
        render_artifact_list(&mut out, "Commands run", &artifacts.commands_run);
        render_artifact_list(&mut out, "Errors seen", &artifacts.errors_seen);
        render_artifact_list(&mut out, "External endpoints", &artifacts.external_endpoints);
    }

    if !summary.updated_at_iso.is_empty() {
        out.push_str(&format!("\n_Updated: {}_\n", summary.updated_at_iso));
    }

    out
}

fn render_string_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {title}\n"));
    for item in items {
        out.push_str("- ");
        out.push_str(item);
        out.push('\n');
    }
}

fn render_artifact_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("### {title}\n"));
    for item in items {
        out.push_str("- ");
        out.push_str(item);
        out.push('\n');
    }
}
