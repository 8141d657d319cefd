//! Terminal approval prompts.

use async_trait::async_trait;
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;

use quill_agent::{ApprovalDecision, ApprovalGate};
use quill_core::types::{ApprovalType, ToolCall};

/// Asks on the terminal before each gated call.
pub struct PromptGate;

/// One-line description of what a call is about to do.
pub fn describe(call: &ToolCall) -> String {
    let field = |name: &str| call.arguments.get(name).and_then(|v| v.as_str());
    match call.name.as_str() {
        "run_command" => format!("run `{}`", field("command").unwrap_or_default()),
        _ => match field("path") {
            Some(path) => format!("{} {path}", call.name),
            None => format!("{} {}", call.name, call.arguments),
        },
    }
}

#[async_trait]
impl ApprovalGate for PromptGate {
    async fn decide(&self, call: &ToolCall, approval: ApprovalType) -> ApprovalDecision {
        let prompt = match approval {
            ApprovalType::Dangerous => format!("DANGEROUS: allow {}?", describe(call)),
            _ => format!("Allow {}?", describe(call)),
        };
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .default(approval != ApprovalType::Dangerous)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(true)) => ApprovalDecision::Approve,
            Ok(Ok(false)) => ApprovalDecision::Reject {
                reason: "declined by user".into(),
            },
            Ok(Err(e)) => ApprovalDecision::Reject {
                reason: format!("approval prompt failed: {e}"),
            },
            Err(e) => ApprovalDecision::Reject {
                reason: format!("approval prompt failed: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_describe_calls() {
        let cmd = ToolCall::new("c1", "run_command", json!({"command": "cargo test"}));
        assert_eq!(describe(&cmd), "run `cargo test`");
        let write = ToolCall::new("c2", "write_file", json!({"path": "src/a.rs", "content": "x"}));
        assert_eq!(describe(&write), "write_file src/a.rs");
    }
}
