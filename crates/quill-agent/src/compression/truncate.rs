//! Head/tail truncation of individual messages.

use serde_json::Value;

use quill_core::types::{ContentBlock, Message, MessageContent, Role};

/// Fraction of the kept characters taken from the start of a message.
///
/// File reads and searches front-load the useful part; command output puts
/// errors and summaries at the end.
pub fn head_ratio(message: &Message) -> f64 {
    match message.role {
        Role::Tool => match message.tool_name.as_deref() {
            Some("run_command") => 0.2,
            _ => 0.8,
        },
        Role::Assistant => 0.7,
        Role::User | Role::System => 0.5,
    }
}

fn marker(omitted: usize) -> String {
    format!("\n[... {omitted} chars truncated ...]\n")
}

/// Shorten `text` to at most `max_chars` (when `max_chars` can hold the
/// marker), keeping `head_ratio` of the budget from the start and the rest
/// from the end. Text already within bounds is returned unchanged.
pub fn truncate_text(text: &str, max_chars: usize, head_ratio: f64) -> String {
    let len = text.chars().count();
    if len <= max_chars {
        return text.to_string();
    }
    // Sized for the worst case so the final marker never overflows.
    let reserve = marker(len).chars().count();
    let keep = max_chars.saturating_sub(reserve);
    let head = ((keep as f64) * head_ratio.clamp(0.0, 1.0)).round() as usize;
    let head = head.min(keep);
    let tail = keep - head;

    let mut out: String = text.chars().take(head).collect();
    out.push_str(&marker(len - keep));
    out.extend(text.chars().skip(len - tail));
    out
}

/// Replace the text of `message`, keeping any image blocks.
pub fn with_text(message: &Message, text: String) -> Message {
    let content = match &message.content {
        MessageContent::Text(_) => MessageContent::Text(text),
        MessageContent::Blocks(blocks) => {
            let mut rebuilt = vec![ContentBlock::Text { text }];
            rebuilt.extend(
                blocks
                    .iter()
                    .filter(|b| matches!(b, ContentBlock::Image { .. }))
                    .cloned(),
            );
            MessageContent::Blocks(rebuilt)
        }
    };
    Message {
        content,
        ..message.clone()
    }
}

/// Truncate the text of a message to `max_chars` using its source ratio.
pub fn truncate_message(message: &Message, max_chars: usize) -> Message {
    let text = message.text();
    if text.chars().count() <= max_chars {
        return message.clone();
    }
    with_text(message, truncate_text(&text, max_chars, head_ratio(message)))
}

/// Elide long string values inside tool-call arguments.
pub fn compact_arguments(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > max_chars => {
            Value::String(format!("[{} chars elided]", s.chars().count()))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| compact_arguments(v, max_chars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), compact_arguments(v, max_chars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Truncate text and tool-call arguments together.
pub fn truncate_with_calls(message: &Message, max_chars: usize) -> Message {
    let mut out = truncate_message(message, max_chars);
    for call in &mut out.tool_calls {
        call.arguments = compact_arguments(&call.arguments, max_chars);
    }
    out
}
