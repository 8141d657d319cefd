//! Turn grouping and the sliding window over recent turns.

use quill_core::types::{Message, Role};

use super::is_summary_message;
use super::truncate::{compact_arguments, truncate_text, truncate_with_calls};

/// Text budget for messages in turns outside the window.
pub const OLD_TEXT_CHARS: usize = 200;

/// Messages before the first user message, then one group per user message.
pub fn split_turns(messages: &[Message]) -> (Vec<Message>, Vec<Vec<Message>>) {
    let mut preamble = Vec::new();
    let mut turns: Vec<Vec<Message>> = Vec::new();
    for message in messages {
        if message.role == Role::User && !is_summary_message(message) {
            turns.push(vec![message.clone()]);
        } else if let Some(turn) = turns.last_mut() {
            turn.push(message.clone());
        } else {
            preamble.push(message.clone());
        }
    }
    (preamble, turns)
}

fn is_elided(text: &str) -> bool {
    text.starts_with('[') && text.contains(" output elided: ")
}

/// Shrink a message from a turn outside the window: tool output becomes a
/// marker, text is clipped, and long call arguments are elided.
pub fn compact_old(message: &Message) -> Message {
    if is_summary_message(message) || message.role == Role::System {
        return message.clone();
    }
    let text = message.text();
    let mut out = if message.role == Role::Tool {
        let len = text.chars().count();
        if len <= OLD_TEXT_CHARS || is_elided(&text) {
            message.clone()
        } else {
            let tool = message.tool_name.as_deref().unwrap_or("tool");
            super::truncate::with_text(message, format!("[{tool} output elided: {len} chars]"))
        }
    } else if text.chars().count() > OLD_TEXT_CHARS {
        super::truncate::with_text(message, truncate_text(&text, OLD_TEXT_CHARS, 1.0))
    } else {
        message.clone()
    };
    for call in &mut out.tool_calls {
        call.arguments = compact_arguments(&call.arguments, OLD_TEXT_CHARS);
    }
    out
}

/// Keep the last `keep` turns (truncated to `cap`), compact everything older.
pub fn apply(messages: &[Message], keep: usize, cap: usize) -> Vec<Message> {
    let (preamble, turns) = split_turns(messages);
    let split = turns.len().saturating_sub(keep.max(1));

    let mut out = preamble;
    for (i, turn) in turns.iter().enumerate() {
        for message in turn {
            if i < split {
                out.push(compact_old(message));
            } else if matches!(message.role, Role::Tool | Role::Assistant) {
                out.push(truncate_with_calls(message, cap));
            } else {
                out.push(message.clone());
            }
        }
    }
    out
}
