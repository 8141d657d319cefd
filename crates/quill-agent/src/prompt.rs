//! System prompt builder for the agent.

use std::path::Path;

use quill_core::types::{ApprovalType, ToolDefinition};

const IDENTITY: &str = "You are Quill, a coding agent working inside the user's workspace. \
Use the tools to inspect and change files and to run commands. Read before you edit, keep \
changes minimal, and report what you changed when you are done.";

const EDITING_RULES: &str = "When editing files with edit_file, send SEARCH/REPLACE blocks:\n\
<<<<<<< SEARCH\nexact existing text\n=======\nreplacement text\n>>>>>>> REPLACE\n\
The SEARCH text must match the file; include enough lines to be unique.";

/// Workspace instruction files, in the order they are added.
const INSTRUCTION_FILES: &[(&str, &str)] = &[
    ("AGENTS.md", "Project Instructions"),
    ("QUILL.md", "Quill Instructions"),
];

/// Build the system prompt.
///
/// `extra` (from `agent.system_prompt`) is appended after the generated parts.
pub fn build_system_prompt(tools: &[ToolDefinition], workspace: &Path, extra: Option<&str>) -> String {
    let mut parts = vec![IDENTITY.to_string()];

    let now = chrono::Utc::now();
    parts.push(format!("Current time: {}", now.format("%Y-%m-%d %H:%M:%S UTC")));
    parts.push(format!("Workspace directory: {}", workspace.display()));

    if !tools.is_empty() {
        let listing: Vec<String> = tools
            .iter()
            .map(|t| match t.approval_type {
                ApprovalType::None => format!("- {}", t.name),
                other => format!("- {} (needs {} approval)", t.name, format!("{other:?}").to_lowercase()),
            })
            .collect();
        parts.push(format!("Available tools:\n{}", listing.join("\n")));
        if tools.iter().any(|t| t.name == "edit_file") {
            parts.push(EDITING_RULES.to_string());
        }
    }

    for (file, heading) in INSTRUCTION_FILES {
        let path = workspace.join(file);
        if let Ok(content) = std::fs::read_to_string(&path) {
            if !content.trim().is_empty() {
                parts.push(format!("--- {heading} ---\n{}", content.trim_end()));
            }
        }
    }

    if let Some(extra) = extra.filter(|e| !e.trim().is_empty()) {
        parts.push(extra.to_string());
    }

    parts.join("\n\n")
}
