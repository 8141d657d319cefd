//! Model-written summaries layered over the heuristic pass.

use std::sync::Arc;

use thiserror::Error;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use quill_core::thread::StructuredSummary;
use quill_core::types::{Message, Role};
use quill_providers::{ChatAdapter, ChatRequest, Credentials, StreamEvent};

use super::summary::merge_llm;
use super::truncate::truncate_text;

const USER_TEXT_LIMIT: usize = 500;
const ASSISTANT_TEXT_LIMIT: usize = 300;
const TOOL_RESULT_LIMIT: usize = 150;
const MAX_TRANSCRIPT_CHARS: usize = 30_000;

const SUMMARY_INSTRUCTIONS: &str = "You condense coding-assistant sessions so work can continue \
with less context. Reply with exactly one JSON object and no other text, using these keys: \
objective (string), completed_steps (array of strings), pending_steps (array of strings), \
file_changes (array of {path, action, summary}), key_decisions (array of strings), \
user_instructions (array of strings). Keep every explicit instruction the user gave.";

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summarizer call failed: {0}")]
    Call(String),

    #[error("summarizer returned no output")]
    Empty,

    #[error("failed to parse summarizer response: {0}")]
    Parse(String),
}

/// Line-per-message transcript for the summarizer prompt.
///
/// ```text
/// [USER] text
/// [ASSISTANT] text
/// [TOOL_CALL] name {"path":"..."}
/// [TOOL_RESULT] text
/// ```
pub fn serialize_messages(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for message in messages {
        let text = message.text();
        match message.role {
            Role::System => lines.push(format!("[CONTEXT] {}", truncate_text(&text, USER_TEXT_LIMIT, 1.0))),
            Role::User => lines.push(format!("[USER] {}", truncate_text(&text, USER_TEXT_LIMIT, 0.5))),
            Role::Assistant => {
                if !text.trim().is_empty() {
                    lines.push(format!("[ASSISTANT] {}", truncate_text(&text, ASSISTANT_TEXT_LIMIT, 0.7)));
                }
                for call in &message.tool_calls {
                    let args = truncate_text(&call.arguments.to_string(), TOOL_RESULT_LIMIT, 1.0);
                    lines.push(format!("[TOOL_CALL] {} {args}", call.name));
                }
            }
            Role::Tool => lines.push(format!("[TOOL_RESULT] {}", truncate_text(&text, TOOL_RESULT_LIMIT, 0.5))),
        }
    }
    truncate_text(&lines.join("\n"), MAX_TRANSCRIPT_CHARS, 0.5)
}

/// Pull the JSON object out of a model reply, tolerating prose or code fences around it.
pub fn parse_summary(text: &str) -> Result<StructuredSummary, SummaryError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(SummaryError::Parse("no JSON object in response".into()));
    };
    if end < start {
        return Err(SummaryError::Parse("no JSON object in response".into()));
    }
    let summary: StructuredSummary =
        serde_json::from_str(&text[start..=end]).map_err(|e| SummaryError::Parse(e.to_string()))?;
    if summary.is_empty() {
        return Err(SummaryError::Empty);
    }
    Ok(summary)
}

pub struct LlmSummarizer {
    adapter: Arc<dyn ChatAdapter>,
    credentials: Credentials,
    model: String,
    max_tokens: u32,
}

impl LlmSummarizer {
    pub fn new(adapter: Arc<dyn ChatAdapter>, credentials: Credentials, model: impl Into<String>) -> Self {
        Self {
            adapter,
            credentials,
            model: model.into(),
            max_tokens: 2048,
        }
    }

    /// Refine `heuristic` with a model call. Any failure keeps `heuristic` as is.
    pub async fn refine(
        &self,
        messages: &[Message],
        heuristic: StructuredSummary,
        cancel: CancellationToken,
    ) -> StructuredSummary {
        match self.request(messages, &heuristic, cancel).await {
            Ok(llm) => {
                debug!(model = %self.model, "LLM summary merged");
                merge_llm(heuristic, llm)
            }
            Err(e) => {
                warn!(error = %e, "LLM summary unavailable, keeping heuristic summary");
                heuristic
            }
        }
    }

    async fn request(
        &self,
        messages: &[Message],
        heuristic: &StructuredSummary,
        cancel: CancellationToken,
    ) -> Result<StructuredSummary, SummaryError> {
        let notes = serde_json::to_string_pretty(heuristic).map_err(|e| SummaryError::Call(e.to_string()))?;
        let prompt = format!(
            "Current notes:\n{notes}\n\nTranscript:\n{}",
            serialize_messages(messages)
        );
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::user(prompt)],
            system_prompt: Some(SUMMARY_INSTRUCTIONS.to_string()),
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.0),
            ..ChatRequest::default()
        };

        let mut stream = self.adapter.send(&request, &self.credentials, cancel).await;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Done { content, .. } => return parse_summary(&content),
                StreamEvent::Error { error } => return Err(SummaryError::Call(error.to_string())),
                _ => {}
            }
        }
        Err(SummaryError::Empty)
    }
}
