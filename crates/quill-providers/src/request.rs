//! Canonical request → vendor HTTP request.

use serde_json::{Map, Value, json};

use quill_core::adapter::{
    AdapterConfig, ArgsFormat, AuthType, MessageFormat, NameSource, ToolFormat, XmlToolConfig,
};
use quill_core::types::{ContentBlock, Message, MessageContent, Role, ToolDefinition};

use crate::error::{AdapterError, AdapterErrorKind};
use crate::{ChatRequest, Credentials};

/// A fully resolved HTTP call, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Values substituted into `{{placeholder}}` strings. `None` removes the key.
struct Placeholders {
    model: Value,
    messages: Value,
    tools: Option<Value>,
    system: Option<Value>,
    max_tokens: Option<Value>,
    temperature: Option<Value>,
}

impl Placeholders {
    fn lookup(&self, name: &str) -> Option<Option<&Value>> {
        Some(match name {
            "model" => Some(&self.model),
            "messages" => Some(&self.messages),
            "tools" => self.tools.as_ref(),
            "system" => self.system.as_ref(),
            "max_tokens" => self.max_tokens.as_ref(),
            "temperature" => self.temperature.as_ref(),
            _ => return None,
        })
    }
}

/// Build the vendor request for `request` under `config`.
pub fn build_http_request(
    config: &AdapterConfig,
    request: &ChatRequest,
    credentials: &Credentials,
) -> Result<HttpRequest, AdapterError> {
    let shape = &config.request;
    let tool_parse = config.tool_parse_format();

    let mut system = request.system_prompt.clone().filter(|s| !s.is_empty());
    if shape.tool_format == ToolFormat::None && !request.tools.is_empty() {
        if let Some(xml) = tool_parse.xml_config() {
            let grammar = xml_tool_prompt(&request.tools, xml);
            system = Some(match system {
                Some(s) => format!("{s}\n\n{grammar}"),
                None => grammar,
            });
        }
    }

    let messages = format_messages(shape.message_format, &request.messages, system.as_deref());
    let tools = format_tools(shape.message_format, shape.tool_format, &request.tools);

    let placeholders = Placeholders {
        model: Value::String(request.model.clone()),
        messages: Value::Array(messages),
        tools,
        system: system.map(Value::String),
        max_tokens: request.max_tokens.map(Value::from),
        temperature: request.temperature.map(Value::from),
    };

    let body = substitute(&shape.body_template, &placeholders).unwrap_or_else(|| json!({}));

    let base_url = credentials
        .base_url
        .as_deref()
        .unwrap_or(&shape.base_url)
        .trim_end_matches('/');
    let url = format!("{base_url}{}", shape.endpoint.replace("{{model}}", &request.model));

    let api_key = credentials.api_key.as_deref().filter(|k| !k.is_empty());
    let mut headers: Vec<(String, String)> = shape
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.replace("{{api_key}}", api_key.unwrap_or_default())))
        .collect();

    let auth_header = match config.auth.auth_type {
        AuthType::None => None,
        AuthType::Bearer => Some(("authorization".to_string(), format!("Bearer {}", require_key(api_key, &config.id)?))),
        AuthType::ApiKey => Some((
            config.auth.header_name.clone().unwrap_or_else(|| "x-api-key".into()),
            require_key(api_key, &config.id)?.to_string(),
        )),
        AuthType::Header => {
            let name = config.auth.header_name.clone().ok_or_else(|| {
                AdapterError::bad_request(format!("adapter '{}' uses header auth without headerName", config.id))
            })?;
            Some((name, require_key(api_key, &config.id)?.to_string()))
        }
    };
    headers.extend(auth_header);

    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
        headers.push(("content-type".into(), "application/json".into()));
    }

    Ok(HttpRequest {
        method: shape.method.to_uppercase(),
        url,
        headers,
        body,
    })
}

fn require_key<'a>(key: Option<&'a str>, adapter: &str) -> Result<&'a str, AdapterError> {
    key.ok_or_else(|| {
        AdapterError::new(AdapterErrorKind::Auth, format!("no API key for adapter '{adapter}'"))
    })
}

/// Recursively substitute placeholders. Returns `None` when the value should be removed.
fn substitute(template: &Value, placeholders: &Placeholders) -> Option<Value> {
    match template {
        Value::String(s) => substitute_str(s, placeholders),
        Value::Object(map) => {
            let mut out = Map::new();
            let mut removed = false;
            for (k, v) in map {
                match substitute(v, placeholders) {
                    Some(v) => {
                        out.insert(k.clone(), v);
                    }
                    None => removed = true,
                }
            }
            // prune only objects emptied by removals
            if removed && out.is_empty() {
                None
            } else {
                Some(Value::Object(out))
            }
        }
        Value::Array(items) => {
            let before = items.len();
            let out: Vec<Value> = items.iter().filter_map(|v| substitute(v, placeholders)).collect();
            if before > 0 && out.is_empty() {
                None
            } else {
                Some(Value::Array(out))
            }
        }
        other => Some(other.clone()),
    }
}

fn substitute_str(s: &str, placeholders: &Placeholders) -> Option<Value> {
    let trimmed = s.trim();
    if let Some(name) = trimmed.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
        if !name.contains("{{") {
            if let Some(value) = placeholders.lookup(name.trim()) {
                return value.cloned();
            }
        }
    }

    if !s.contains("{{") {
        return Some(Value::String(s.to_string()));
    }
    let mut out = s.to_string();
    for name in ["model", "messages", "tools", "system", "max_tokens", "temperature"] {
        let token = format!("{{{{{name}}}}}");
        if !out.contains(&token) {
            continue;
        }
        let text = match placeholders.lookup(name).flatten() {
            Some(Value::String(v)) => v.clone(),
            Some(v) => v.to_string(),
            None => String::new(),
        };
        out = out.replace(&token, &text);
    }
    Some(Value::String(out))
}

/// Shape canonical messages for the wire. The system prompt is inlined only for OpenAI-style lists.
pub fn format_messages(format: MessageFormat, messages: &[Message], system: Option<&str>) -> Vec<Value> {
    match format {
        MessageFormat::OpenAi => {
            let mut out = Vec::with_capacity(messages.len() + 1);
            if let Some(system) = system {
                out.push(json!({"role": "system", "content": system}));
            }
            out.extend(messages.iter().map(openai_message));
            out
        }
        MessageFormat::Anthropic => grouped_messages(messages, anthropic_message, "content"),
        MessageFormat::Gemini => grouped_messages(messages, gemini_message, "parts"),
    }
}

fn openai_message(msg: &Message) -> Value {
    match msg.role {
        Role::System => json!({"role": "system", "content": msg.text()}),
        Role::User => match &msg.content {
            MessageContent::Blocks(blocks) if blocks.iter().any(|b| matches!(b, ContentBlock::Image { .. })) => {
                let parts: Vec<Value> = blocks
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                        ContentBlock::Image { source } => {
                            let url = if source.source_type == "base64" {
                                format!("data:{};base64,{}", source.media_type, source.data)
                            } else {
                                source.data.clone()
                            };
                            json!({"type": "image_url", "image_url": {"url": url}})
                        }
                    })
                    .collect();
                json!({"role": "user", "content": parts})
            }
            content => json!({"role": "user", "content": content.text()}),
        },
        Role::Assistant => {
            let text = msg.text();
            let content = if text.is_empty() { Value::Null } else { Value::String(text) };
            let mut out = json!({"role": "assistant", "content": content});
            if !msg.tool_calls.is_empty() {
                out["tool_calls"] = msg
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.arguments.to_string()},
                        })
                    })
                    .collect();
            }
            out
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.text(),
        }),
    }
}

/// One wire message: its role and list of content parts.
type Parts = (&'static str, Vec<Value>);

/// Vendors that forbid consecutive same-role messages get adjacent tool results merged.
fn grouped_messages(
    messages: &[Message],
    to_parts: fn(&Message) -> Parts,
    key: &str,
) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    let mut prev_was_tool = false;
    for msg in messages {
        let (role, parts) = to_parts(msg);
        if parts.is_empty() {
            continue;
        }
        let is_tool = msg.role == Role::Tool;
        if is_tool && prev_was_tool {
            if let Some(Value::Array(existing)) = out.last_mut().and_then(|m| m.get_mut(key)) {
                existing.extend(parts);
                continue;
            }
        }
        let mut wire = Map::new();
        wire.insert("role".into(), Value::from(role));
        wire.insert(key.to_string(), Value::Array(parts));
        out.push(Value::Object(wire));
        prev_was_tool = is_tool;
    }
    out
}

fn anthropic_message(msg: &Message) -> Parts {
    let mut parts = content_parts(&msg.content, |text| json!({"type": "text", "text": text}), |source| {
        json!({"type": "image", "source": {"type": source.source_type, "media_type": source.media_type, "data": source.data}})
    });
    match msg.role {
        // system text mid-history travels as user content
        Role::System | Role::User => ("user", parts),
        Role::Assistant => {
            parts.extend(msg.tool_calls.iter().map(|c| {
                json!({"type": "tool_use", "id": c.id, "name": c.name, "input": c.arguments})
            }));
            ("assistant", parts)
        }
        Role::Tool => (
            "user",
            vec![json!({
                "type": "tool_result",
                "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.text(),
            })],
        ),
    }
}

fn gemini_message(msg: &Message) -> Parts {
    let mut parts = content_parts(&msg.content, |text| json!({"text": text}), |source| {
        json!({"inlineData": {"mimeType": source.media_type, "data": source.data}})
    });
    match msg.role {
        Role::System | Role::User => ("user", parts),
        Role::Assistant => {
            parts.extend(
                msg.tool_calls
                    .iter()
                    .map(|c| json!({"functionCall": {"name": c.name, "args": c.arguments}})),
            );
            ("model", parts)
        }
        Role::Tool => (
            "user",
            vec![json!({
                "functionResponse": {
                    "name": msg.tool_name.clone().unwrap_or_default(),
                    "response": {"content": msg.text()},
                }
            })],
        ),
    }
}

fn content_parts(
    content: &MessageContent,
    text_part: impl Fn(&str) -> Value,
    image_part: impl Fn(&quill_core::types::ImageSource) -> Value,
) -> Vec<Value> {
    match content {
        MessageContent::Text(text) if text.is_empty() => Vec::new(),
        MessageContent::Text(text) => vec![text_part(text)],
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => text_part(text),
                ContentBlock::Image { source } => image_part(source),
            })
            .collect(),
    }
}

/// Shape tool definitions. `None` when no tools should be sent.
pub fn format_tools(message_format: MessageFormat, format: ToolFormat, tools: &[ToolDefinition]) -> Option<Value> {
    if tools.is_empty() || format == ToolFormat::None {
        return None;
    }
    let items: Vec<Value> = tools
        .iter()
        .map(|t| match format {
            ToolFormat::Wrapped => json!({
                "type": "function",
                "function": {"name": t.name, "description": t.description, "parameters": t.parameters},
            }),
            ToolFormat::InputSchema => json!({
                "name": t.name, "description": t.description, "input_schema": t.parameters,
            }),
            ToolFormat::Flat | ToolFormat::None => json!({
                "name": t.name, "description": t.description, "parameters": t.parameters,
            }),
        })
        .collect();

    // Gemini groups declarations under a single tool object
    if message_format == MessageFormat::Gemini {
        return Some(json!([{"function_declarations": items}]));
    }
    Some(Value::Array(items))
}

/// System-prompt section teaching the model the XML calling grammar.
pub fn xml_tool_prompt(tools: &[ToolDefinition], xml: &XmlToolConfig) -> String {
    let tag = &xml.tool_call_tag;
    let args_example = match xml.args_format {
        ArgsFormat::Json => format!("<{0}>{{\"param\": \"value\"}}</{0}>", xml.args_tag),
        ArgsFormat::KeyValue => format!("<{0}><param>value</param></{0}>", xml.args_tag),
    };
    let example = match &xml.name_source {
        NameSource::Attribute { name } => format!("<{tag} {name}=\"TOOL_NAME\">{args_example}</{tag}>"),
        NameSource::AtPrefix => format!("<{tag}>@TOOL_NAME {args_example}</{tag}>"),
        NameSource::Tag { tag: name_tag } => {
            format!("<{tag}><{name_tag}>TOOL_NAME</{name_tag}>{args_example}</{tag}>")
        }
    };

    let mut out = String::from("## Tools\n\nCall a tool by writing exactly:\n\n");
    out.push_str(&example);
    out.push_str("\n\nOne block per call. Available tools:\n");
    for tool in tools {
        out.push_str(&format!(
            "\n### {}\n{}\nParameters: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    out
}
