//! Built-in adapter configs for common vendors.

use std::collections::BTreeMap;

use serde_json::json;

use quill_core::adapter::{
    AdapterConfig, AuthConfig, AuthType, MessageFormat, RequestShape, ResponseShape, ToolFormat,
    ToolParseFormat, XmlToolConfig,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Every built-in config.
pub fn builtin() -> Vec<AdapterConfig> {
    vec![openai(), openrouter(), ollama(), anthropic(), gemini(), xml_tools()]
}

fn openai_body() -> serde_json::Value {
    json!({
        "model": "{{model}}",
        "messages": "{{messages}}",
        "tools": "{{tools}}",
        "max_tokens": "{{max_tokens}}",
        "temperature": "{{temperature}}",
        "stream": true,
    })
}

fn openai_response(reasoning_field: &str) -> ResponseShape {
    ResponseShape {
        content_field: "choices.0.delta.content".into(),
        reasoning_field: Some(reasoning_field.into()),
        tool_call_field: "choices.0.delta.tool_calls".into(),
        tool_index_path: Some("index".into()),
        tool_id_path: "id".into(),
        tool_name_path: "function.name".into(),
        tool_args_path: "function.arguments".into(),
        done_marker: Some("[DONE]".into()),
        data_prefix: "data:".into(),
    }
}

fn openai_compatible(id: &str, base_url: &str, auth: AuthType) -> AdapterConfig {
    AdapterConfig {
        id: id.into(),
        request: RequestShape {
            base_url: base_url.into(),
            endpoint: "/v1/chat/completions".into(),
            method: "POST".into(),
            body_template: openai_body(),
            headers: BTreeMap::new(),
            message_format: MessageFormat::OpenAi,
            tool_format: ToolFormat::Wrapped,
        },
        response: openai_response("choices.0.delta.reasoning_content"),
        tool_parse: None,
        auth: AuthConfig {
            auth_type: auth,
            header_name: None,
        },
    }
}

pub fn openai() -> AdapterConfig {
    openai_compatible("openai", OPENAI_BASE_URL, AuthType::Bearer)
}

pub fn openrouter() -> AdapterConfig {
    let mut config = openai_compatible("openrouter", OPENROUTER_BASE_URL, AuthType::Bearer);
    config.request.headers.insert("X-Title".into(), "Quill".into());
    config.response.reasoning_field = Some("choices.0.delta.reasoning".into());
    config
}

pub fn ollama() -> AdapterConfig {
    openai_compatible("ollama", OLLAMA_BASE_URL, AuthType::None)
}

/// OpenAI transport for models without native tool calling; tools are taught in the system prompt.
pub fn xml_tools() -> AdapterConfig {
    let mut config = openai_compatible("xml-tools", OLLAMA_BASE_URL, AuthType::None);
    config.request.tool_format = ToolFormat::None;
    config.tool_parse = Some(ToolParseFormat::Xml {
        xml_config: XmlToolConfig::default(),
    });
    config
}

pub fn anthropic() -> AdapterConfig {
    AdapterConfig {
        id: "anthropic".into(),
        request: RequestShape {
            base_url: ANTHROPIC_BASE_URL.into(),
            endpoint: "/v1/messages".into(),
            method: "POST".into(),
            body_template: json!({
                "model": "{{model}}",
                "system": "{{system}}",
                "messages": "{{messages}}",
                "tools": "{{tools}}",
                "max_tokens": "{{max_tokens}}",
                "temperature": "{{temperature}}",
                "stream": true,
            }),
            headers: BTreeMap::from([("anthropic-version".to_string(), "2023-06-01".to_string())]),
            message_format: MessageFormat::Anthropic,
            tool_format: ToolFormat::InputSchema,
        },
        response: ResponseShape {
            content_field: "delta.text".into(),
            reasoning_field: Some("delta.thinking".into()),
            // content_block_start / content_block_delta events carry the call at the root
            tool_call_field: String::new(),
            tool_index_path: Some("index".into()),
            tool_id_path: "content_block.id".into(),
            tool_name_path: "content_block.name".into(),
            tool_args_path: "delta.partial_json".into(),
            done_marker: None,
            data_prefix: "data:".into(),
        },
        tool_parse: None,
        auth: AuthConfig {
            auth_type: AuthType::ApiKey,
            header_name: Some("x-api-key".into()),
        },
    }
}

pub fn gemini() -> AdapterConfig {
    AdapterConfig {
        id: "gemini".into(),
        request: RequestShape {
            base_url: GEMINI_BASE_URL.into(),
            endpoint: "/v1beta/models/{{model}}:streamGenerateContent?alt=sse".into(),
            method: "POST".into(),
            body_template: json!({
                "contents": "{{messages}}",
                "systemInstruction": {"parts": [{"text": "{{system}}"}]},
                "tools": "{{tools}}",
                "generationConfig": {
                    "maxOutputTokens": "{{max_tokens}}",
                    "temperature": "{{temperature}}",
                },
            }),
            headers: BTreeMap::new(),
            message_format: MessageFormat::Gemini,
            tool_format: ToolFormat::Flat,
        },
        response: ResponseShape {
            content_field: "candidates.0.content.parts.0.text".into(),
            reasoning_field: None,
            tool_call_field: "candidates.0.content.parts".into(),
            tool_index_path: None,
            tool_id_path: "functionCall.id".into(),
            tool_name_path: "functionCall.name".into(),
            tool_args_path: "functionCall.args".into(),
            done_marker: None,
            data_prefix: "data:".into(),
        },
        tool_parse: None,
        auth: AuthConfig {
            auth_type: AuthType::Header,
            header_name: Some("x-goog-api-key".into()),
        },
    }
}
