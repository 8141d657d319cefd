//! Handoff documents: the terminal compression level, seeding a fresh session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quill_core::thread::StructuredSummary;
use quill_core::types::{Message, Role};

use super::summary_message;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffDocument {
    pub created_at: DateTime<Utc>,
    pub summary: StructuredSummary,
    /// The most recent user request, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request: Option<String>,
    /// History size that forced the handoff.
    pub chars_before: usize,
}

impl HandoffDocument {
    pub fn new(summary: StructuredSummary, messages: &[Message], chars_before: usize) -> Self {
        let last_request = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text);
        Self {
            created_at: Utc::now(),
            summary,
            last_request,
            chars_before,
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Session handoff\n\n");
        out.push_str(&format!(
            "Context exceeded its budget at {} chars on {}.\n\n",
            self.chars_before,
            self.created_at.format("%Y-%m-%d %H:%M UTC")
        ));
        let body = self.summary.to_markdown();
        if !body.is_empty() {
            out.push_str(&body);
            out.push_str("\n\n");
        }
        if let Some(request) = &self.last_request {
            out.push_str("## Last request\n");
            out.push_str(request);
            out.push('\n');
        }
        out
    }

    /// Opening history for the session that picks up the work.
    pub fn seed_messages(&self) -> Vec<Message> {
        vec![summary_message(&self.summary)]
    }
}
