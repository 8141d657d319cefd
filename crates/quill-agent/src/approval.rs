//! Approval gating for side-effecting tool calls.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use quill_core::config::Config;
use quill_core::types::{ApprovalType, ToolCall};
use quill_tools::catalog;
use quill_tools::exec::is_dangerous_command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject { reason: String },
}

/// Asks whoever is in charge (a user, a policy) whether a call may run.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn decide(&self, call: &ToolCall, approval: ApprovalType) -> ApprovalDecision;
}

/// Approves everything. For headless runs that already trust the workspace.
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn decide(&self, _call: &ToolCall, _approval: ApprovalType) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

pub struct RejectAll;

#[async_trait]
impl ApprovalGate for RejectAll {
    async fn decide(&self, call: &ToolCall, approval: ApprovalType) -> ApprovalDecision {
        ApprovalDecision::Reject {
            reason: format!("{} requires {approval:?} approval and approvals are disabled", call.name),
        }
    }
}

/// Which calls need to go through the gate.
///
/// `auto_approve` entries name either a tool (`write_file`) or an approval
/// class (`edits`, `terminal`, `dangerous`).
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    auto_approve: HashSet<String>,
}

impl ApprovalPolicy {
    pub fn new<I, S>(auto_approve: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            auto_approve: auto_approve.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.auto_approve().iter().cloned())
    }

    /// Approval class of a call, escalating risky shell commands to `dangerous`.
    pub fn classify(&self, call: &ToolCall) -> ApprovalType {
        let base = catalog::approval_type(&call.name);
        if call.name == "run_command" {
            let command = call.arguments.get("command").and_then(Value::as_str).unwrap_or_default();
            if is_dangerous_command(command) {
                return ApprovalType::Dangerous;
            }
        }
        base
    }

    /// The class to ask about, or `None` when the call may run unprompted.
    pub fn requires_approval(&self, call: &ToolCall) -> Option<ApprovalType> {
        let class = self.classify(call);
        if class == ApprovalType::None {
            return None;
        }
        if self.auto_approve.contains(&call.name) || self.auto_approve.contains(class_name(class)) {
            return None;
        }
        Some(class)
    }
}

fn class_name(class: ApprovalType) -> &'static str {
    match class {
        ApprovalType::None => "none",
        ApprovalType::Edits => "edits",
        ApprovalType::Terminal => "terminal",
        ApprovalType::Dangerous => "dangerous",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new("c", name, args)
    }

    #[test]
    fn test_read_only_tools_never_prompt() {
        let policy = ApprovalPolicy::default();
        assert_eq!(policy.requires_approval(&call("read_file", json!({"path": "a"}))), None);
        assert_eq!(policy.requires_approval(&call("search_files", json!({}))), None);
    }

    #[test]
    fn test_classes_and_escalation() {
        let policy = ApprovalPolicy::default();
        assert_eq!(
            policy.requires_approval(&call("write_file", json!({}))),
            Some(ApprovalType::Edits)
        );
        assert_eq!(
            policy.requires_approval(&call("run_command", json!({"command": "cargo test"}))),
            Some(ApprovalType::Terminal)
        );
        assert_eq!(
            policy.requires_approval(&call("run_command", json!({"command": "sudo rm -rf /"}))),
            Some(ApprovalType::Dangerous)
        );
        assert_eq!(
            policy.requires_approval(&call("mystery_tool", json!({}))),
            Some(ApprovalType::Dangerous)
        );
    }

    #[test]
    fn test_auto_approve_by_tool_or_class() {
        let policy = ApprovalPolicy::new(["edit_file", "terminal"]);
        assert_eq!(policy.requires_approval(&call("edit_file", json!({}))), None);
        assert_eq!(
            policy.requires_approval(&call("write_file", json!({}))),
            Some(ApprovalType::Edits)
        );
        assert_eq!(
            policy.requires_approval(&call("run_command", json!({"command": "ls"}))),
            None
        );
        // escalated commands leave the terminal class
        assert_eq!(
            policy.requires_approval(&call("run_command", json!({"command": "git push --force"}))),
            Some(ApprovalType::Dangerous)
        );
    }

    #[tokio::test]
    async fn test_builtin_gates() {
        let c = call("delete_file_or_folder", json!({"path": "x"}));
        assert_eq!(AutoApprove.decide(&c, ApprovalType::Dangerous).await, ApprovalDecision::Approve);
        assert!(matches!(
            RejectAll.decide(&c, ApprovalType::Dangerous).await,
            ApprovalDecision::Reject { .. }
        ));
    }
}
