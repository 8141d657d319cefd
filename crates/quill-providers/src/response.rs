//! Per-chunk response parsing: text, reasoning, and tool-call deltas (JSON) or
//! tool-call blocks embedded in text (XML).

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use quill_core::adapter::{ArgsFormat, NameSource, ResponseShape, XmlToolConfig};

use crate::path::{get_by_path, get_str};

/// Tool-call fragment extracted from one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub args_fragment: Option<String>,
}

/// Everything one streamed chunk contributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkParts {
    pub text: Option<String>,
    pub reasoning: Option<String>,
    pub deltas: Vec<ToolCallDelta>,
}

/// Extract text, reasoning, and JSON tool-call deltas from a decoded chunk.
pub fn parse_chunk(shape: &ResponseShape, chunk: &Value) -> ChunkParts {
    let text = get_str(chunk, &shape.content_field)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let reasoning = shape
        .reasoning_field
        .as_deref()
        .and_then(|path| get_str(chunk, path))
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    ChunkParts {
        text,
        reasoning,
        deltas: tool_call_deltas(shape, chunk),
    }
}

fn tool_call_deltas(shape: &ResponseShape, chunk: &Value) -> Vec<ToolCallDelta> {
    let items: Vec<&Value> = match get_by_path(chunk, &shape.tool_call_field) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let id = get_str(item, &shape.tool_id_path).map(str::to_string);
            let name = get_str(item, &shape.tool_name_path).map(str::to_string);
            let args_fragment = match get_by_path(item, &shape.tool_args_path) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            };
            // chunks rooted at the tool-call field may carry no call at all
            if id.is_none() && name.is_none() && args_fragment.is_none() {
                return None;
            }
            let index = shape
                .tool_index_path
                .as_deref()
                .and_then(|p| get_by_path(item, p))
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .unwrap_or(position);
            Some(ToolCallDelta {
                index,
                id,
                name,
                args_fragment,
            })
        })
        .collect()
}

/// Vendor error object embedded in a stream chunk (`{"error": {...}}` or `{"type": "error", ...}`).
pub fn chunk_error(chunk: &Value) -> Option<String> {
    let is_error_type = chunk.get("type").and_then(Value::as_str) == Some("error");
    match chunk.get("error") {
        Some(Value::String(message)) => Some(message.clone()),
        Some(err @ Value::Object(_)) => Some(
            err.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
        ),
        _ if is_error_type => Some(chunk.to_string()),
        _ => None,
    }
}

/// Parse raw argument text into a JSON object. Fails open to `{}`.
pub fn parse_arguments(raw: &str, tool_name: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            warn!(
                tool_name,
                parsed_type = other.to_string().chars().take(20).collect::<String>(),
                "Tool arguments parsed as non-object, using empty object"
            );
            Value::Object(Map::new())
        }
        Err(e) => {
            warn!(
                tool_name,
                error = %e,
                args_preview = trimmed.chars().take(100).collect::<String>(),
                "Failed to parse tool arguments, using empty object"
            );
            Value::Object(Map::new())
        }
    }
}

/// A tool call recovered from response text.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Scanner for XML-encoded tool calls in model text.
pub struct XmlToolParser {
    config: XmlToolConfig,
    block: Regex,
}

impl XmlToolParser {
    pub fn new(config: &XmlToolConfig) -> Result<Self, regex::Error> {
        let tag = regex::escape(&config.tool_call_tag);
        let block = Regex::new(&format!(r"(?s)<{tag}(\s[^>]*)?>(.*?)</{tag}\s*>"))?;
        Ok(Self {
            config: config.clone(),
            block,
        })
    }

    /// Extract every well-formed call block, in order. Blocks without a name are skipped.
    pub fn parse(&self, text: &str) -> Vec<XmlToolCall> {
        self.block
            .captures_iter(text)
            .filter_map(|caps| {
                let attrs = caps.get(1).map_or("", |m| m.as_str());
                let inner = caps.get(2).map_or("", |m| m.as_str());
                self.parse_block(attrs, inner)
            })
            .collect()
    }

    /// Text with every call block removed.
    pub fn strip(&self, text: &str) -> String {
        self.block.replace_all(text, "").trim().to_string()
    }

    fn parse_block(&self, attrs: &str, inner: &str) -> Option<XmlToolCall> {
        let (name, rest) = match &self.config.name_source {
            NameSource::Attribute { name } => (attribute(attrs, name)?, inner.to_string()),
            NameSource::AtPrefix => {
                let body = inner.trim_start().strip_prefix('@')?;
                let end = body
                    .find(|c: char| c.is_whitespace() || c == '<')
                    .unwrap_or(body.len());
                (body[..end].to_string(), body[end..].to_string())
            }
            NameSource::Tag { tag } => {
                let (value, start, end) = tag_span(inner, tag)?;
                let rest = format!("{}{}", &inner[..start], &inner[end..]);
                (value.trim().to_string(), rest)
            }
        };
        if name.is_empty() {
            return None;
        }

        let args_region = match tag_span(&rest, &self.config.args_tag) {
            Some((value, _, _)) => value.to_string(),
            None => rest,
        };
        let arguments = match self.config.args_format {
            ArgsFormat::Json => parse_arguments(&args_region, &name),
            ArgsFormat::KeyValue => Value::Object(key_value_pairs(&args_region)),
        };
        Some(XmlToolCall { name, arguments })
    }
}

/// First `<tag>…</tag>` in `text`: inner text and the byte span of the whole element.
fn tag_span<'a>(text: &'a str, tag: &str) -> Option<(&'a str, usize, usize)> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)?;
    let inner_start = start + open.len();
    let inner_len = text[inner_start..].find(&close)?;
    let end = inner_start + inner_len + close.len();
    Some((&text[inner_start..inner_start + inner_len], start, end))
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r#"{}\s*=\s*(?:"([^"]*)"|'([^']*)')"#, regex::escape(name))).ok()?;
    let caps = re.captures(attrs)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string())
}

static OPEN_TAG: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"<([A-Za-z_][\w.\-]*)>").expect("static regex"));

/// Flat `<key>value</key>` pairs. Values that parse as JSON keep their type.
fn key_value_pairs(region: &str) -> Map<String, Value> {
    let mut out = Map::new();
    let mut cursor = 0;
    while let Some(caps) = OPEN_TAG.captures(&region[cursor..]) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let key = key.as_str();
        let value_start = cursor + whole.end();
        let close = format!("</{key}>");
        let Some(len) = region[value_start..].find(&close) else {
            cursor = value_start;
            continue;
        };
        let raw = region[value_start..value_start + len].trim();
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        out.insert(key.to_string(), value);
        cursor = value_start + len + close.len();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets;
    use serde_json::json;

    #[test]
    fn test_openai_chunk() {
        let shape = presets::openai().response;
        let chunk = json!({"choices": [{"delta": {"content": "Hel", "tool_calls": [
            {"index": 0, "id": "call_1", "function": {"name": "read_file", "arguments": ""}}
        ]}}]});
        let parts = parse_chunk(&shape, &chunk);
        assert_eq!(parts.text.as_deref(), Some("Hel"));
        assert_eq!(parts.deltas.len(), 1);
        assert_eq!(parts.deltas[0].id.as_deref(), Some("call_1"));
        assert_eq!(parts.deltas[0].name.as_deref(), Some("read_file"));
        assert_eq!(parts.deltas[0].args_fragment.as_deref(), Some(""));
    }

    #[test]
    fn test_anthropic_root_tool_field() {
        let shape = presets::anthropic().response;
        let start = json!({"type": "content_block_start", "index": 1,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "list_directory", "input": {}}});
        let parts = parse_chunk(&shape, &start);
        assert_eq!(parts.deltas[0].index, 1);
        assert_eq!(parts.deltas[0].name.as_deref(), Some("list_directory"));

        let text = json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "ok"}});
        let parts = parse_chunk(&shape, &text);
        assert_eq!(parts.text.as_deref(), Some("ok"));
        assert!(parts.deltas.is_empty());
    }

    #[test]
    fn test_gemini_object_args() {
        let shape = presets::gemini().response;
        let chunk = json!({"candidates": [{"content": {"parts": [
            {"functionCall": {"name": "read_file", "args": {"path": "a.rs"}}}
        ]}}]});
        let parts = parse_chunk(&shape, &chunk);
        assert!(parts.text.is_none());
        assert_eq!(parts.deltas[0].id, None);
        assert_eq!(parts.deltas[0].args_fragment.as_deref(), Some(r#"{"path":"a.rs"}"#));
    }

    #[test]
    fn test_xml_name_tag_json_args() {
        let parser = XmlToolParser::new(&XmlToolConfig::default()).unwrap();
        let text = r#"Let me look.<tool_call><name>foo</name><arguments>{"a":1}</arguments></tool_call>"#;
        let calls = parser.parse(text);
        assert_eq!(calls, vec![XmlToolCall { name: "foo".into(), arguments: json!({"a": 1}) }]);
        assert_eq!(parser.strip(text), "Let me look.");
    }

    #[test]
    fn test_xml_attribute_key_value() {
        let parser = XmlToolParser::new(&XmlToolConfig {
            tool_call_tag: "invoke".into(),
            name_source: NameSource::Attribute { name: "name".into() },
            args_tag: "parameters".into(),
            args_format: ArgsFormat::KeyValue,
        })
        .unwrap();
        let text = "<invoke name=\"read_file\"><parameters><path>src/main.rs</path><start_line>10</start_line></parameters></invoke>";
        let calls = parser.parse(text);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, json!({"path": "src/main.rs", "start_line": 10}));
    }

    #[test]
    fn test_xml_at_prefix_without_args_tag() {
        let parser = XmlToolParser::new(&XmlToolConfig {
            tool_call_tag: "tool".into(),
            name_source: NameSource::AtPrefix,
            args_tag: "args".into(),
            args_format: ArgsFormat::Json,
        })
        .unwrap();
        let calls = parser.parse("<tool>@run_command {\"command\": \"ls\"}</tool>\n<tool>@get_dir_tree</tool>");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments, json!({"command": "ls"}));
        assert_eq!(calls[1].name, "get_dir_tree");
        assert_eq!(calls[1].arguments, json!({}));
    }

    #[test]
    fn test_malformed_arguments_fail_open() {
        assert_eq!(parse_arguments("{\"a\":", "x"), json!({}));
        assert_eq!(parse_arguments("[1,2]", "x"), json!({}));
        assert_eq!(parse_arguments("  ", "x"), json!({}));
    }

    #[test]
    fn test_chunk_error_detection() {
        assert_eq!(
            chunk_error(&json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})).as_deref(),
            Some("Overloaded")
        );
        assert!(chunk_error(&json!({"choices": []})).is_none());
    }
}
