//! Declarative description of one vendor's chat API.
//!
//! An [`AdapterConfig`] is pure data: the generic adapter engine interprets it
//! to build requests and decode streamed responses. Adding a vendor means
//! adding a config value, not code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    pub id: String,
    pub request: RequestShape,
    pub response: ResponseShape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_parse: Option<ToolParseFormat>,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AdapterConfig {
    /// Tool-call encoding, defaulting to JSON.
    pub fn tool_parse_format(&self) -> ToolParseFormat {
        self.tool_parse.clone().unwrap_or(ToolParseFormat::Json)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestShape {
    pub base_url: String,
    /// Path appended to the base URL; `{{model}}` is substituted.
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// JSON body with `{{placeholder}}` strings.
    pub body_template: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub message_format: MessageFormat,
    #[serde(default)]
    pub tool_format: ToolFormat,
}

fn default_method() -> String {
    "POST".into()
}

/// Wire shape of the message list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
}

/// Wire shape of each tool definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFormat {
    /// `{"type": "function", "function": {name, description, parameters}}`
    #[default]
    Wrapped,
    /// `{name, description, parameters}`
    Flat,
    /// `{name, description, input_schema}`
    InputSchema,
    /// Tools are not sent in the body.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseShape {
    /// Dot path to the text delta inside a chunk.
    pub content_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_field: Option<String>,
    /// Dot path to the tool-call list (or single object); empty means the chunk root.
    #[serde(default)]
    pub tool_call_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_index_path: Option<String>,
    #[serde(default = "default_id_path")]
    pub tool_id_path: String,
    pub tool_name_path: String,
    pub tool_args_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_marker: Option<String>,
    #[serde(default = "default_data_prefix")]
    pub data_prefix: String,
}

fn default_id_path() -> String {
    "id".into()
}

fn default_data_prefix() -> String {
    "data:".into()
}

/// How tool calls are encoded in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "responseFormat", rename_all = "snake_case")]
pub enum ToolParseFormat {
    Json,
    Xml {
        #[serde(rename = "xmlConfig", default)]
        xml_config: XmlToolConfig,
    },
    /// JSON first, XML only when no JSON tool calls were found.
    Mixed {
        #[serde(rename = "xmlConfig", default)]
        xml_config: XmlToolConfig,
    },
}

impl ToolParseFormat {
    pub fn xml_config(&self) -> Option<&XmlToolConfig> {
        match self {
            Self::Json => None,
            Self::Xml { xml_config } | Self::Mixed { xml_config } => Some(xml_config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XmlToolConfig {
    pub tool_call_tag: String,
    pub name_source: NameSource,
    pub args_tag: String,
    pub args_format: ArgsFormat,
}

impl Default for XmlToolConfig {
    fn default() -> Self {
        Self {
            tool_call_tag: "tool_call".into(),
            name_source: NameSource::Tag { tag: "name".into() },
            args_tag: "arguments".into(),
            args_format: ArgsFormat::Json,
        }
    }
}

/// Where the tool name lives inside an XML tool-call block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NameSource {
    /// `<tool_call name="read_file">`
    Attribute { name: String },
    /// `<tool_call>@read_file ...`
    AtPrefix,
    /// `<tool_call><name>read_file</name>`
    Tag { tag: String },
}

/// Encoding of the arguments inside an XML tool-call block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgsFormat {
    /// Embedded JSON object.
    Json,
    /// Flat `<key>value</key>` pairs.
    KeyValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthType {
    #[default]
    Bearer,
    ApiKey,
    Header,
    None,
}
