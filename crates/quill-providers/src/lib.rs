//! Protocol adapter layer.
//!
//! Every vendor is described by an [`AdapterConfig`](quill_core::adapter::AdapterConfig)
//! and driven by one [`GenericAdapter`]. Callers see a single canonical
//! [`StreamEvent`] sequence regardless of how the vendor shapes requests,
//! streams chunks, or encodes tool calls.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use quill_core::types::{Message, ToolCall, ToolDefinition};

pub mod adapter;
pub mod error;
pub mod path;
pub mod presets;
pub mod registry;
pub mod request;
pub mod response;
pub mod retry;
pub mod sse;
pub mod stream;

pub use adapter::GenericAdapter;
pub use error::{AdapterError, AdapterErrorKind};
pub use registry::AdapterRegistry;
pub use retry::RetryPolicy;

/// Canonical chat request, independent of vendor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Credentials for one call.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    /// Replaces the adapter's configured base URL.
    pub base_url: Option<String>,
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            base_url: None,
        }
    }
}

/// One canonical event of a model response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text {
        content: String,
    },
    Reasoning {
        content: String,
    },
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        args_fragment: Option<String>,
    },
    /// A fully reconstructed tool call.
    ToolCall {
        call: ToolCall,
    },
    /// End of a successful response: visible text and every tool call, in order.
    Done {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    /// Terminal failure; no further events follow.
    Error {
        error: AdapterError,
    },
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A streaming chat backend.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Adapter identifier (e.g. "openai", "anthropic").
    fn id(&self) -> &str;

    /// Stream a response.
    ///
    /// Failures arrive as a single [`StreamEvent::Error`]. Cancelling `cancel`
    /// ends the stream without an error event.
    async fn send(
        &self,
        request: &ChatRequest,
        credentials: &Credentials,
        cancel: CancellationToken,
    ) -> EventStream;
}
