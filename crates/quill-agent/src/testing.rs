//! Scripted chat adapter for loop tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use quill_core::types::ToolCall;
use quill_providers::{AdapterError, ChatAdapter, ChatRequest, Credentials, EventStream, StreamEvent};

enum Step {
    Events(Vec<StreamEvent>),
    /// Emit the events, then stay open until cancelled.
    Hang(Vec<StreamEvent>),
}

#[derive(Default)]
pub struct ScriptedAdapter {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn then_events(self, events: Vec<StreamEvent>) -> Self {
        self.push(Step::Events(events))
    }

    pub fn then_text(self, text: &str) -> Self {
        self.then_events(vec![
            StreamEvent::Text {
                content: text.to_string(),
            },
            StreamEvent::Done {
                content: text.to_string(),
                tool_calls: vec![],
            },
        ])
    }

    pub fn then_tool_calls(self, text: &str, calls: Vec<ToolCall>) -> Self {
        let mut events = Vec::new();
        if !text.is_empty() {
            events.push(StreamEvent::Text {
                content: text.to_string(),
            });
        }
        events.extend(calls.iter().map(|c| StreamEvent::ToolCall { call: c.clone() }));
        events.push(StreamEvent::Done {
            content: text.to_string(),
            tool_calls: calls,
        });
        self.then_events(events)
    }

    pub fn then_error(self, error: AdapterError) -> Self {
        self.then_events(vec![StreamEvent::Error { error }])
    }

    pub fn then_hang(self, events: Vec<StreamEvent>) -> Self {
        self.push(Step::Hang(events))
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        request: &ChatRequest,
        _credentials: &Credentials,
        cancel: CancellationToken,
    ) -> EventStream {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Events(events)) => Box::pin(stream::iter(events)),
            Some(Step::Hang(events)) => {
                let tail = stream::once(async move { cancel.cancelled().await })
                    .filter_map(|_| async { None::<StreamEvent> });
                Box::pin(stream::iter(events).chain(tail))
            }
            None => Box::pin(stream::iter(vec![StreamEvent::Done {
                content: String::new(),
                tool_calls: vec![],
            }])),
        }
    }
}
