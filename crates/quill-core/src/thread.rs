//! Conversation thread model: message history, loop state, and compression bookkeeping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuillError;
use crate::types::Message;

/// Loop state of a thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    #[default]
    Idle,
    Streaming,
    ToolCall,
    AwaitingApproval,
    Executing,
    Done,
    Error,
    Aborted,
}

impl ThreadState {
    /// Whether the thread is between turns.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Done | Self::Error | Self::Aborted)
    }

    pub fn can_transition_to(self, next: ThreadState) -> bool {
        use ThreadState::*;
        match (self, next) {
            // any settled thread may start a new turn
            (s, Streaming) if s.is_settled() => true,
            // a handoff closes the thread before any model call
            (s, Done) if s.is_settled() => true,
            (Streaming, Done | ToolCall | Error | Aborted) => true,
            (ToolCall, AwaitingApproval | Executing | Error | Aborted) => true,
            (AwaitingApproval, Executing | Error | Aborted) => true,
            (Executing, AwaitingApproval | Streaming | Done | Error | Aborted) => true,
            (s, Idle) => s.is_settled(),
            _ => false,
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::ToolCall => "tool_call",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Done => "done",
            Self::Error => "error",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// How aggressively a thread's history has been compressed.
///
/// Levels only ever increase within a thread.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum CompressionLevel {
    #[default]
    None = 0,
    Truncate = 1,
    Window = 2,
    Summarize = 3,
    Handoff = 4,
}

impl CompressionLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// The next stronger level, saturating at [`CompressionLevel::Handoff`].
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Truncate,
            Self::Truncate => Self::Window,
            Self::Window => Self::Summarize,
            Self::Summarize | Self::Handoff => Self::Handoff,
        }
    }
}

impl From<CompressionLevel> for u8 {
    fn from(level: CompressionLevel) -> u8 {
        level as u8
    }
}

impl TryFrom<u8> for CompressionLevel {
    type Error = QuillError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Truncate,
            2 => Self::Window,
            3 => Self::Summarize,
            4 => Self::Handoff,
            other => {
                return Err(QuillError::Agent(format!(
                    "invalid compression level {other}"
                )));
            }
        })
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.as_u8())
    }
}

/// A file touched during the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// `created`, `modified`, or `deleted`.
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

/// Distilled state of a conversation, regenerated on each summarizing compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredSummary {
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub pending_steps: Vec<String>,
    #[serde(default)]
    pub file_changes: Vec<FileChange>,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    #[serde(default)]
    pub user_instructions: Vec<String>,
}

impl StructuredSummary {
    pub fn is_empty(&self) -> bool {
        self.objective.is_empty()
            && self.completed_steps.is_empty()
            && self.pending_steps.is_empty()
            && self.file_changes.is_empty()
            && self.key_decisions.is_empty()
            && self.user_instructions.is_empty()
    }

    /// Render as markdown suitable for a pinned context message.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if !self.objective.is_empty() {
            out.push_str(&format!("## Objective\n{}\n\n", self.objective));
        }
        push_list(&mut out, "Completed", &self.completed_steps);
        push_list(&mut out, "Pending", &self.pending_steps);
        if !self.file_changes.is_empty() {
            out.push_str("## File changes\n");
            for change in &self.file_changes {
                if change.summary.is_empty() {
                    out.push_str(&format!("- {} ({})\n", change.path, change.action));
                } else {
                    out.push_str(&format!(
                        "- {} ({}): {}\n",
                        change.path, change.action, change.summary
                    ));
                }
            }
            out.push('\n');
        }
        push_list(&mut out, "Key decisions", &self.key_decisions);
        push_list(&mut out, "User instructions", &self.user_instructions);
        out.trim_end().to_string()
    }
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("## {title}\n"));
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
    out.push('\n');
}

/// One conversation: history plus the state the loop controller tracks for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub compression_level: CompressionLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<StructuredSummary>,
    #[serde(default)]
    pub state: ThreadState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

impl Thread {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
            compression_level: CompressionLevel::None,
            summary: None,
            state: ThreadState::Idle,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.updated_at = Utc::now();
    }

    /// Swap in a rewritten history (compression only).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.updated_at = Utc::now();
    }

    /// Move to `next`, rejecting transitions the loop never makes.
    pub fn transition(&mut self, next: ThreadState) -> Result<(), QuillError> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(QuillError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(thread = %self.id, from = %self.state, to = %next, "thread state");
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Raise the compression level. Lower levels are ignored.
    pub fn raise_compression(&mut self, level: CompressionLevel) {
        if level > self.compression_level {
            self.compression_level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_turn_lifecycle() {
        let mut thread = Thread::new();
        thread.transition(ThreadState::Streaming).unwrap();
        thread.transition(ThreadState::ToolCall).unwrap();
        thread.transition(ThreadState::AwaitingApproval).unwrap();
        thread.transition(ThreadState::Executing).unwrap();
        thread.transition(ThreadState::Streaming).unwrap();
        thread.transition(ThreadState::Done).unwrap();
        // next turn
        thread.transition(ThreadState::Streaming).unwrap();
        thread.transition(ThreadState::Aborted).unwrap();
        assert!(thread.state.is_settled());
    }

    #[test]
    fn test_thread_rejects_skipped_states() {
        let mut thread = Thread::new();
        let err = thread.transition(ThreadState::Executing).unwrap_err();
        assert!(matches!(err, QuillError::InvalidTransition { .. }));
        assert_eq!(thread.state, ThreadState::Idle);
    }

    #[test]
    fn test_settled_thread_can_close() {
        let mut thread = Thread::new();
        thread.transition(ThreadState::Done).unwrap();
        assert_eq!(thread.state, ThreadState::Done);
        let mut aborted = Thread::new();
        aborted.transition(ThreadState::Streaming).unwrap();
        aborted.transition(ThreadState::Aborted).unwrap();
        aborted.transition(ThreadState::Done).unwrap();
    }

    #[test]
    fn test_compression_level_never_lowers() {
        let mut thread = Thread::new();
        thread.raise_compression(CompressionLevel::Summarize);
        thread.raise_compression(CompressionLevel::Truncate);
        assert_eq!(thread.compression_level, CompressionLevel::Summarize);
        assert_eq!(CompressionLevel::Summarize.next(), CompressionLevel::Handoff);
        assert_eq!(CompressionLevel::Handoff.next(), CompressionLevel::Handoff);
    }

    #[test]
    fn test_compression_level_serializes_as_number() {
        let json = serde_json::to_string(&CompressionLevel::Window).unwrap();
        assert_eq!(json, "2");
        let level: CompressionLevel = serde_json::from_str("4").unwrap();
        assert_eq!(level, CompressionLevel::Handoff);
        assert!(serde_json::from_str::<CompressionLevel>("7").is_err());
    }

    #[test]
    fn test_summary_markdown() {
        let summary = StructuredSummary {
            objective: "Add retry".into(),
            completed_steps: vec!["read retry.rs".into()],
            file_changes: vec![FileChange {
                path: "src/retry.rs".into(),
                action: "modified".into(),
                summary: String::new(),
            }],
            ..Default::default()
        };
        let md = summary.to_markdown();
        assert!(md.starts_with("## Objective\nAdd retry"));
        assert!(md.contains("- read retry.rs"));
        assert!(md.contains("- src/retry.rs (modified)"));
        assert!(!md.contains("Pending"));
        assert!(StructuredSummary::default().is_empty());
    }
}
