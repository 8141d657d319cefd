//! Graduated context compression.
//!
//! | level | effect |
//! |-------|--------|
//! | L0 | none |
//! | L1 | long tool output and assistant text truncated head/tail |
//! | L2 | last turns kept, older turns compacted |
//! | L3 | older turns replaced by a pinned summary, kept turns truncated hard |
//! | L4 | handoff document; the thread cannot continue |
//!
//! A thread's level only ever rises. Each call starts at the thread's current
//! level and escalates until the history fits the budget.

pub mod handoff;
pub mod llm_summary;
pub mod summary;
pub mod truncate;
pub mod window;

use tracing::{debug, info};

use quill_core::config::CompressionConfig;
use quill_core::thread::{CompressionLevel, StructuredSummary, Thread};
use quill_core::types::{Message, Role, total_chars};

pub use handoff::HandoffDocument;
pub use llm_summary::LlmSummarizer;

/// First line of the pinned summary message.
pub const SUMMARY_PREFIX: &str = "[Context summary]";

/// Lower bound for the L1/L2 per-message cap.
const MIN_MESSAGE_CHARS: usize = 1_000;

pub fn summary_message(summary: &StructuredSummary) -> Message {
    Message::system(format!("{SUMMARY_PREFIX}\n{}", summary.to_markdown()))
}

pub fn is_summary_message(message: &Message) -> bool {
    message.role == Role::System && message.text().starts_with(SUMMARY_PREFIX)
}

fn truncate_cap(budget: usize) -> usize {
    (budget / 10).max(MIN_MESSAGE_CHARS)
}

fn aggressive_cap(budget: usize) -> usize {
    (budget / 40).max(MIN_MESSAGE_CHARS / 2)
}

/// Per-thread compression bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressionState {
    pub level: CompressionLevel,
    pub summary: Option<StructuredSummary>,
}

impl CompressionState {
    pub fn from_thread(thread: &Thread) -> Self {
        Self {
            level: thread.compression_level,
            summary: thread.summary.clone(),
        }
    }

    pub fn apply_to(&self, thread: &mut Thread) {
        thread.raise_compression(self.level);
        if self.summary.is_some() {
            thread.summary = self.summary.clone();
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub messages: Vec<Message>,
    pub level: CompressionLevel,
    pub chars_before: usize,
    pub chars_after: usize,
    /// Whether `messages` differs from the input.
    pub changed: bool,
    pub summary: Option<StructuredSummary>,
    pub handoff: Option<HandoffDocument>,
}

impl CompressionOutcome {
    /// The conversation cannot continue in this thread.
    pub fn is_terminal(&self) -> bool {
        self.handoff.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct CompressionEngine {
    keep_recent_turns: usize,
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::from_config(&CompressionConfig::default())
    }
}

impl CompressionEngine {
    pub fn new(keep_recent_turns: usize) -> Self {
        Self {
            keep_recent_turns: keep_recent_turns.max(1),
        }
    }

    pub fn from_config(config: &CompressionConfig) -> Self {
        Self::new(config.keep_recent_turns)
    }

    /// Fit `messages` into `budget` characters.
    ///
    /// An in-budget history is returned untouched at the current level.
    pub fn compress(
        &self,
        messages: &[Message],
        budget: usize,
        state: &mut CompressionState,
    ) -> CompressionOutcome {
        let before = total_chars(messages);
        if before <= budget {
            return CompressionOutcome {
                messages: messages.to_vec(),
                level: state.level,
                chars_before: before,
                chars_after: before,
                changed: false,
                summary: None,
                handoff: None,
            };
        }

        let mut level = state.level.max(CompressionLevel::Truncate);
        let outcome = loop {
            let outcome = self.apply_level(level, messages, budget, state, before);
            debug!(level = %level, before, after = outcome.chars_after, budget, "Compression pass");
            if outcome.chars_after <= budget || level == CompressionLevel::Handoff {
                break outcome;
            }
            level = level.next();
        };

        if outcome.level > state.level {
            metrics::counter!("quill_compression_level_changes_total", "level" => outcome.level.to_string())
                .increment(1);
            state.level = outcome.level;
        }
        if let Some(summary) = &outcome.summary {
            state.summary = Some(summary.clone());
        }
        info!(
            level = %outcome.level,
            before = outcome.chars_before,
            after = outcome.chars_after,
            budget,
            "Compressed context"
        );
        outcome
    }

    fn apply_level(
        &self,
        level: CompressionLevel,
        messages: &[Message],
        budget: usize,
        state: &CompressionState,
        before: usize,
    ) -> CompressionOutcome {
        let mut pinned = None;
        let mut handoff = None;
        let compacted: Vec<Message> = match level {
            CompressionLevel::None | CompressionLevel::Truncate => {
                let cap = truncate_cap(budget);
                messages
                    .iter()
                    .map(|m| match m.role {
                        Role::Tool | Role::Assistant => truncate::truncate_with_calls(m, cap),
                        Role::User | Role::System => m.clone(),
                    })
                    .collect()
            }
            CompressionLevel::Window => window::apply(messages, self.keep_recent_turns, truncate_cap(budget)),
            CompressionLevel::Summarize => {
                let fresh = summary::carry_forward(state.summary.as_ref(), summary::extract(messages));
                let out = self.summarized(messages, &fresh, self.keep_recent_turns, budget);
                pinned = Some(fresh);
                out
            }
            CompressionLevel::Handoff => {
                let fresh = summary::carry_forward(state.summary.as_ref(), summary::extract(messages));
                let out = self.summarized(messages, &fresh, 1, budget);
                handoff = Some(HandoffDocument::new(fresh.clone(), messages, before));
                pinned = Some(fresh);
                out
            }
        };
        let after = total_chars(&compacted);
        CompressionOutcome {
            changed: compacted.as_slice() != messages,
            messages: compacted,
            level,
            chars_before: before,
            chars_after: after,
            summary: pinned,
            handoff,
        }
    }

    /// Pinned summary, then the last `keep` turns truncated hard.
    fn summarized(
        &self,
        messages: &[Message],
        summary: &StructuredSummary,
        keep: usize,
        budget: usize,
    ) -> Vec<Message> {
        let (preamble, turns) = window::split_turns(messages);
        let cap = aggressive_cap(budget);
        let split = turns.len().saturating_sub(keep.max(1));

        let mut out: Vec<Message> = preamble.into_iter().filter(|m| !is_summary_message(m)).collect();
        out.push(summary_message(summary));
        for message in turns[split..].iter().flatten() {
            if message.role == Role::System {
                out.push(message.clone());
            } else {
                out.push(truncate::truncate_with_calls(message, cap));
            }
        }
        out
    }
}
