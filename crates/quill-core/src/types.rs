use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::QuillError;

/// Conversation role of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Structured content block inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

/// Message body: plain text or a list of structured blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated text of the content, images omitted.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// A canonical conversation message shared by every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Assistant message proposing tool calls.
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, text)
        }
    }

    /// Result of a tool call, addressed back to the call id.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::new(Role::Tool, text)
        }
    }

    pub fn text(&self) -> String {
        self.content.text()
    }

    /// Character size used for budget accounting: text plus serialized tool calls.
    pub fn char_len(&self) -> usize {
        let calls: usize = self
            .tool_calls
            .iter()
            .map(|c| c.name.chars().count() + c.arguments.to_string().chars().count())
            .sum();
        self.text().chars().count() + calls
    }
}

/// Total character size of a message list.
pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

/// Lifecycle status of a [`ToolCall`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
    Awaiting,
    Rejected,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Rejected)
    }

    /// Whether `self -> next` is a forward transition.
    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        use ToolCallStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Awaiting)
                | (Running, Success)
                | (Running, Error)
                | (Awaiting, Success)
                | (Awaiting, Error)
                | (Awaiting, Rejected)
        )
    }
}

impl fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Awaiting => "awaiting",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A tool invocation proposed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
        }
    }

    fn transition(&mut self, next: ToolCallStatus) -> Result<(), QuillError> {
        if !self.status.can_transition_to(next) {
            return Err(QuillError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), QuillError> {
        self.transition(ToolCallStatus::Running)
    }

    pub fn await_approval(&mut self) -> Result<(), QuillError> {
        self.transition(ToolCallStatus::Awaiting)
    }

    pub fn succeed(&mut self, result: impl Into<String>) -> Result<(), QuillError> {
        self.transition(ToolCallStatus::Success)?;
        self.result = Some(result.into());
        self.error = None;
        Ok(())
    }

    /// Mark the call failed. `output` keeps whatever the tool produced before failing.
    pub fn fail(&mut self, error: impl Into<String>, output: Option<String>) -> Result<(), QuillError> {
        self.transition(ToolCallStatus::Error)?;
        self.error = Some(error.into());
        self.result = output;
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), QuillError> {
        self.transition(ToolCallStatus::Rejected)?;
        self.error = Some(reason.into());
        self.result = None;
        Ok(())
    }
}

/// Risk classification gating whether a call needs user confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    #[default]
    None,
    Edits,
    Terminal,
    Dangerous,
}

/// Tool definition published to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool arguments.
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub approval_type: ApprovalType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_success_path() {
        let mut call = ToolCall::new("c1", "read_file", json!({"path": "a.txt"}));
        call.start().unwrap();
        call.succeed("contents").unwrap();
        assert_eq!(call.status, ToolCallStatus::Success);
        assert_eq!(call.result.as_deref(), Some("contents"));
        assert!(call.error.is_none());
    }

    #[test]
    fn test_tool_call_never_reverses() {
        let mut call = ToolCall::new("c1", "run_command", json!({}));
        call.start().unwrap();
        call.fail("exit code 1", Some("boom".into())).unwrap();
        assert!(call.start().is_err());
        assert!(call.succeed("late").is_err());
        assert_eq!(call.status, ToolCallStatus::Error);
        assert_eq!(call.result.as_deref(), Some("boom"));
    }

    #[test]
    fn test_tool_call_approval_path() {
        let mut call = ToolCall::new("c1", "delete_file_or_folder", json!({}));
        call.await_approval().unwrap();
        assert!(call.start().is_err());
        call.reject("user declined").unwrap();
        assert_eq!(call.status, ToolCallStatus::Rejected);
        assert!(call.status.is_terminal());
    }

    #[test]
    fn test_message_char_len_counts_calls() {
        let msg = Message::assistant_with_calls(
            "ok",
            vec![ToolCall::new("c1", "ls", json!({}))],
        );
        assert_eq!(msg.char_len(), 2 + 2 + 2);
    }

    #[test]
    fn test_message_content_untagged() {
        let msg: Message = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "text", "text": "hi"}, {"type": "text", "text": "there"}]
        }))
        .unwrap();
        assert_eq!(msg.text(), "hi\nthere");

        let msg: Message = serde_json::from_value(json!({"role": "tool", "content": "out", "tool_call_id": "c1"})).unwrap();
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
    }
}
