//! Streaming reconstruction: turns decoded payload lines into canonical events.

use std::collections::BTreeMap;

use tracing::{trace, warn};

use quill_core::adapter::{AdapterConfig, ResponseShape, ToolParseFormat};
use quill_core::types::ToolCall;

use crate::StreamEvent;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::response::{ToolCallDelta, XmlToolParser, chunk_error, parse_arguments, parse_chunk};

/// Accumulates tool call data across streaming deltas.
#[derive(Debug, Clone, Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_call(self) -> Option<ToolCall> {
        if self.name.is_empty() {
            warn!(id = ?self.id, "Dropping streamed tool call without a name");
            return None;
        }
        let arguments = parse_arguments(&self.arguments, &self.name);
        let id = self.id.unwrap_or_else(generate_call_id);
        Some(ToolCall::new(id, self.name, arguments))
    }
}

pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Index-keyed tool-call reconstruction.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: BTreeMap<usize, ToolCallAccumulator>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta. Returns the previous call at this index when the delta starts a new one.
    pub fn push(&mut self, delta: &ToolCallDelta) -> Option<ToolCall> {
        let starts_new = self.slots.get(&delta.index).is_some_and(|acc| {
            match (&delta.id, &acc.id) {
                (Some(new), Some(old)) => new != old,
                // id-less vendors: a repeated name marks the next call
                (None, None) => delta.name.is_some() && !acc.name.is_empty(),
                _ => false,
            }
        });
        let flushed = if starts_new {
            self.slots.remove(&delta.index).and_then(ToolCallAccumulator::into_call)
        } else {
            None
        };

        let acc = self.slots.entry(delta.index).or_default();
        if acc.id.is_none() {
            acc.id.clone_from(&delta.id);
        }
        if let Some(name) = &delta.name {
            if acc.name.is_empty() {
                acc.name.clone_from(name);
            }
        }
        if let Some(fragment) = &delta.args_fragment {
            acc.arguments.push_str(fragment);
        }
        flushed
    }

    /// Flush every remaining call in index order.
    pub fn finish(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.slots)
            .into_values()
            .filter_map(ToolCallAccumulator::into_call)
            .collect()
    }
}

/// Per-response decoding state for one adapter config.
pub struct StreamDecoder {
    shape: ResponseShape,
    format: ToolParseFormat,
    xml: Option<XmlToolParser>,
    assembler: ToolCallAssembler,
    content: String,
    json_calls: Vec<ToolCall>,
    done: bool,
    failed: bool,
}

impl StreamDecoder {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        let format = config.tool_parse_format();
        let xml = format
            .xml_config()
            .map(XmlToolParser::new)
            .transpose()
            .map_err(|e| AdapterError::bad_request(format!("invalid toolCallTag: {e}")))?;
        Ok(Self {
            shape: config.response.clone(),
            format,
            xml,
            assembler: ToolCallAssembler::new(),
            content: String::new(),
            json_calls: Vec::new(),
            done: false,
            failed: false,
        })
    }

    /// Whether the response has ended (done marker or vendor error).
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode one payload line.
    pub fn feed(&mut self, payload: &str) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        let payload = payload.trim();
        if self.shape.done_marker.as_deref() == Some(payload) {
            self.done = true;
            return Vec::new();
        }

        let chunk: serde_json::Value = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                trace!(%e, payload, "Skipping unparsable chunk");
                return Vec::new();
            }
        };

        if let Some(message) = chunk_error(&chunk) {
            self.done = true;
            self.failed = true;
            return vec![StreamEvent::Error {
                error: AdapterError::new(AdapterErrorKind::Server, message),
            }];
        }

        let parts = parse_chunk(&self.shape, &chunk);
        let mut events = Vec::new();
        if let Some(reasoning) = parts.reasoning {
            events.push(StreamEvent::Reasoning { content: reasoning });
        }
        if let Some(text) = parts.text {
            self.content.push_str(&text);
            events.push(StreamEvent::Text { content: text });
        }
        if matches!(self.format, ToolParseFormat::Xml { .. }) {
            return events;
        }
        for delta in parts.deltas {
            events.push(StreamEvent::ToolCallDelta {
                index: delta.index,
                id: delta.id.clone(),
                name: delta.name.clone(),
                args_fragment: delta.args_fragment.clone(),
            });
            if let Some(call) = self.assembler.push(&delta) {
                self.json_calls.push(call.clone());
                events.push(StreamEvent::ToolCall { call });
            }
        }
        events
    }

    /// Flush remaining calls and emit the final [`StreamEvent::Done`].
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.failed {
            return Vec::new();
        }
        self.done = true;

        let mut events = Vec::new();
        for call in self.assembler.finish() {
            self.json_calls.push(call.clone());
            events.push(StreamEvent::ToolCall { call });
        }

        let mut tool_calls = std::mem::take(&mut self.json_calls);
        let mut content = std::mem::take(&mut self.content);
        if let Some(xml) = &self.xml {
            let use_xml = match self.format {
                ToolParseFormat::Mixed { .. } => tool_calls.is_empty(),
                _ => true,
            };
            if use_xml {
                for parsed in xml.parse(&content) {
                    let call = ToolCall::new(generate_call_id(), parsed.name, parsed.arguments);
                    tool_calls.push(call.clone());
                    events.push(StreamEvent::ToolCall { call });
                }
            }
            content = xml.strip(&content);
        }

        events.push(StreamEvent::Done { content, tool_calls });
        events
    }
}
