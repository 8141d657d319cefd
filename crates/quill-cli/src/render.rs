//! Event printing for interactive and `--json` runs.

use std::io::Write;

use tokio::sync::mpsc;

use quill_agent::AgentEvent;

const RESULT_PREVIEW_CHARS: usize = 160;

/// Print events until the sender side is dropped.
///
/// Assistant text goes to stdout; tool activity to stderr.
pub async fn print_events(mut rx: mpsc::UnboundedReceiver<AgentEvent>, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
            continue;
        }
        match event {
            AgentEvent::Progress { text } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::ToolCall { tool, arguments, .. } => {
                eprintln!("\n→ {tool} {arguments}");
            }
            AgentEvent::ToolResult {
                tool, success, content, ..
            } => {
                let mark = if success { "✓" } else { "✗" };
                eprintln!("{mark} {tool}: {}", preview(&content));
            }
            AgentEvent::Compressed {
                level,
                chars_before,
                chars_after,
            } => {
                eprintln!("[context compressed to {level}: {chars_before} → {chars_after} chars]");
            }
            AgentEvent::TaskStarted { task_id, title } => eprintln!("▶ {task_id}: {title}"),
            AgentEvent::TaskFinished {
                task_id,
                status,
                attempts,
            } => eprintln!("■ {task_id}: {} (attempts: {attempts})", status.as_str()),
            AgentEvent::Error { code, message } => eprintln!("\nerror [{code}]: {message}"),
            AgentEvent::StateChanged { .. }
            | AgentEvent::Reasoning { .. }
            | AgentEvent::ApprovalRequested { .. } => {}
        }
    }
}

/// First line of `content`, clipped.
pub fn preview(content: &str) -> String {
    let first = content.lines().next().unwrap_or_default();
    let clipped: String = first.chars().take(RESULT_PREVIEW_CHARS).collect();
    let more = clipped.len() < first.len() || content.lines().nth(1).is_some();
    if more { format!("{clipped} …") } else { clipped }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_clips() {
        assert_eq!(preview("ok"), "ok");
        assert_eq!(preview("line one\nline two"), "line one …");
        let long = "x".repeat(400);
        assert_eq!(preview(&long).chars().count(), RESULT_PREVIEW_CHARS + 2);
        assert_eq!(preview(""), "");
    }
}
