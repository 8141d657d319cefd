//! Heuristic structured summaries and the merge rules shared with the LLM pass.

use std::collections::HashMap;

use serde_json::Value;

use quill_core::thread::{FileChange, StructuredSummary};
use quill_core::types::{Message, Role, ToolCall};

const OBJECTIVE_CHARS: usize = 300;
const ITEM_CHARS: usize = 200;
const MAX_INSTRUCTIONS: usize = 10;
const MAX_DECISIONS: usize = 10;

const DECISION_MARKERS: &[&str] = &[
    "decided to",
    "i'll use",
    "i will use",
    "going with",
    "instead of",
    "chose to",
    "we should",
];

fn clip(text: &str, max: usize) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() { format!("{head}...") } else { head }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

/// Short description of what a call targeted: its path or command.
fn call_target(call: &ToolCall) -> Option<String> {
    ["path", "file_path", "command", "query"]
        .iter()
        .find_map(|key| call.arguments.get(*key).and_then(Value::as_str))
        .map(|s| clip(s, 120))
}

fn describe(call: &ToolCall) -> String {
    match call_target(call) {
        Some(target) => format!("{} {target}", call.name),
        None => call.name.clone(),
    }
}

fn file_action(tool: &str) -> Option<&'static str> {
    match tool {
        "write_file" => Some("written"),
        "edit_file" => Some("modified"),
        "create_file_or_folder" => Some("created"),
        "delete_file_or_folder" => Some("deleted"),
        _ => None,
    }
}

/// Extract a summary from the conversation without a model call.
///
/// The first user message is the objective; later user messages are kept as
/// instructions. Tool calls are paired with their results by call id: failed
/// ones become pending steps, successful ones completed steps, and writes
/// become file changes.
pub fn extract(messages: &[Message]) -> StructuredSummary {
    let mut summary = StructuredSummary::default();

    let results: HashMap<&str, String> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| Some((m.tool_call_id.as_deref()?, m.text())))
        .collect();

    let mut file_changes: Vec<FileChange> = Vec::new();
    let mut last_assistant_text = String::new();

    for message in messages {
        match message.role {
            Role::User => {
                let text = message.text();
                if summary.objective.is_empty() {
                    summary.objective = clip(&text, OBJECTIVE_CHARS);
                } else {
                    push_unique(&mut summary.user_instructions, clip(&text, ITEM_CHARS));
                }
            }
            Role::Assistant => {
                let text = message.text();
                for sentence in text.split(['.', '\n']) {
                    let lower = sentence.to_lowercase();
                    if DECISION_MARKERS.iter().any(|m| lower.contains(m)) {
                        push_unique(&mut summary.key_decisions, clip(sentence, ITEM_CHARS));
                    }
                }
                if !text.trim().is_empty() {
                    last_assistant_text = text;
                }

                for call in &message.tool_calls {
                    let Some(result) = results.get(call.id.as_str()) else {
                        continue;
                    };
                    if result.starts_with("Error [") || result.starts_with("Rejected") {
                        let reason = result.lines().next().unwrap_or_default();
                        push_unique(
                            &mut summary.pending_steps,
                            format!("Retry {}: {}", describe(call), clip(reason, ITEM_CHARS)),
                        );
                        continue;
                    }
                    push_unique(&mut summary.completed_steps, describe(call));
                    if let (Some(action), Some(path)) = (
                        file_action(&call.name),
                        call.arguments.get("path").and_then(Value::as_str),
                    ) {
                        file_changes.retain(|c| c.path != path);
                        file_changes.push(FileChange {
                            path: path.to_string(),
                            action: action.to_string(),
                            summary: String::new(),
                        });
                    }
                }
            }
            Role::System | Role::Tool => {}
        }
    }

    // Open checklist items in the latest reply are still to do.
    for line in last_assistant_text.lines() {
        if let Some(item) = line.trim().strip_prefix("- [ ]") {
            push_unique(&mut summary.pending_steps, clip(item, ITEM_CHARS));
        }
    }

    let skip = summary.user_instructions.len().saturating_sub(MAX_INSTRUCTIONS);
    summary.user_instructions.drain(..skip);
    summary.key_decisions.truncate(MAX_DECISIONS);
    summary.file_changes = file_changes;
    summary
}

fn union(base: &mut Vec<String>, extra: Vec<String>) {
    for item in extra {
        push_unique(base, item);
    }
}

fn union_files(base: &mut Vec<FileChange>, extra: Vec<FileChange>) {
    for change in extra {
        match base.iter_mut().find(|c| c.path == change.path) {
            Some(existing) => *existing = change,
            None => base.push(change),
        }
    }
}

/// Fold a fresh extraction into the summary of an earlier compaction.
///
/// The earlier objective stands. Pending steps are taken from the fresh pass
/// when it found any, since earlier ones may be done by now.
pub fn carry_forward(previous: Option<&StructuredSummary>, fresh: StructuredSummary) -> StructuredSummary {
    let Some(previous) = previous else {
        return fresh;
    };
    let mut merged = previous.clone();
    if merged.objective.is_empty() {
        merged.objective = fresh.objective;
    }
    union(&mut merged.completed_steps, fresh.completed_steps);
    if !fresh.pending_steps.is_empty() {
        merged.pending_steps = fresh.pending_steps;
    }
    merged
        .pending_steps
        .retain(|step| !merged.completed_steps.contains(step));
    union_files(&mut merged.file_changes, fresh.file_changes);
    union(&mut merged.key_decisions, fresh.key_decisions);
    union(&mut merged.user_instructions, fresh.user_instructions);
    merged
}

/// Merge a model-written summary over the heuristic one.
///
/// Completed steps and user instructions are unioned; the model's objective
/// and pending steps replace the heuristic ones when non-empty; file changes
/// and decisions are unioned.
pub fn merge_llm(base: StructuredSummary, llm: StructuredSummary) -> StructuredSummary {
    let mut merged = base;
    if !llm.objective.trim().is_empty() {
        merged.objective = llm.objective;
    }
    if !llm.pending_steps.is_empty() {
        merged.pending_steps = llm.pending_steps;
    }
    union(&mut merged.completed_steps, llm.completed_steps);
    union(&mut merged.user_instructions, llm.user_instructions);
    union_files(&mut merged.file_changes, llm.file_changes);
    union(&mut merged.key_decisions, llm.key_decisions);
    merged
}
