//! The one adapter engine: interprets an [`AdapterConfig`] to talk to any vendor.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use quill_core::adapter::AdapterConfig;

use crate::error::{AdapterError, AdapterErrorKind};
use crate::request::{HttpRequest, build_http_request};
use crate::retry::{RetryPolicy, with_retry};
use crate::sse::data_lines;
use crate::stream::StreamDecoder;
use crate::{ChatAdapter, ChatRequest, Credentials, EventStream, StreamEvent};

pub struct GenericAdapter {
    config: Arc<AdapterConfig>,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl GenericAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn connect(&self, http: &HttpRequest) -> Result<reqwest::Response, AdapterError> {
        let method = reqwest::Method::from_bytes(http.method.as_bytes())
            .map_err(|e| AdapterError::bad_request(format!("invalid method '{}': {e}", http.method)))?;
        let mut builder = self.client.request(method, &http.url).json(&http.body);
        for (name, value) in &http.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(status.as_u16(), &body));
        }
        Ok(response)
    }
}

fn error_stream(error: AdapterError) -> EventStream {
    Box::pin(futures::stream::once(async move { StreamEvent::Error { error } }))
}

struct DecodeState {
    lines: Pin<Box<dyn Stream<Item = Result<String, AdapterError>> + Send>>,
    decoder: StreamDecoder,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

/// Decode payload lines into canonical events, ending with `Done` or `Error`.
pub fn decode_events<S>(lines: S, decoder: StreamDecoder) -> impl Stream<Item = StreamEvent> + Send
where
    S: Stream<Item = Result<String, AdapterError>> + Send + 'static,
{
    futures::stream::unfold(
        DecodeState {
            lines: Box::pin(lines),
            decoder,
            pending: VecDeque::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((event, state));
                }
                if state.finished {
                    return None;
                }
                match state.lines.next().await {
                    Some(Ok(line)) => {
                        let events = state.decoder.feed(&line);
                        state.pending.extend(events);
                        if state.decoder.is_done() {
                            let tail = state.decoder.finish();
                            state.pending.extend(tail);
                            state.finished = true;
                        }
                    }
                    Some(Err(error)) => {
                        state.pending.push_back(StreamEvent::Error { error });
                        state.finished = true;
                    }
                    None => {
                        let tail = state.decoder.finish();
                        state.pending.extend(tail);
                        state.finished = true;
                    }
                }
            }
        },
    )
}

#[async_trait]
impl ChatAdapter for GenericAdapter {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn send(
        &self,
        request: &ChatRequest,
        credentials: &Credentials,
        cancel: CancellationToken,
    ) -> EventStream {
        let adapter = self.config.id.clone();
        metrics::counter!("quill_model_requests_total", "adapter" => adapter.clone()).increment(1);

        let prepared = build_http_request(&self.config, request, credentials)
            .and_then(|http| StreamDecoder::new(&self.config).map(|decoder| (http, decoder)));
        let (http, decoder) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                metrics::counter!("quill_model_errors_total", "adapter" => adapter, "code" => error.code()).increment(1);
                return error_stream(error);
            }
        };

        debug!(adapter = %adapter, model = %request.model, url = %http.url, "Streaming model call");

        let response = with_retry(&self.retry, &cancel, &adapter, || self.connect(&http)).await;
        let response = match response {
            Ok(response) => response,
            Err(error) if error.kind == AdapterErrorKind::Cancelled => {
                debug!(adapter = %adapter, "Model call cancelled before response");
                return Box::pin(futures::stream::empty());
            }
            Err(error) => {
                warn!(adapter = %adapter, code = %error.code(), %error, "Model call failed");
                metrics::counter!("quill_model_errors_total", "adapter" => adapter, "code" => error.code()).increment(1);
                return error_stream(error);
            }
        };

        let lines = data_lines(response.bytes_stream(), self.config.response.data_prefix.clone());
        let events = decode_events(lines, decoder).take_until(cancel.cancelled_owned());
        Box::pin(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets;

    fn lines(items: Vec<Result<&'static str, AdapterError>>) -> impl Stream<Item = Result<String, AdapterError>> + Send {
        futures::stream::iter(items.into_iter().map(|r| r.map(str::to_string)).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_decode_ends_with_done_at_stream_end() {
        let decoder = StreamDecoder::new(&presets::anthropic()).unwrap();
        let events: Vec<StreamEvent> = decode_events(
            lines(vec![
                Ok(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#),
                Ok(r#"{"type":"message_stop"}"#),
            ]),
            decoder,
        )
        .collect()
        .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], StreamEvent::Done { content, .. } if content == "hi"));
    }

    #[tokio::test]
    async fn test_transport_error_is_single_terminal_event() {
        let decoder = StreamDecoder::new(&presets::openai()).unwrap();
        let events: Vec<StreamEvent> = decode_events(
            lines(vec![
                Ok(r#"{"choices":[{"delta":{"content":"par"}}]}"#),
                Err(AdapterError::network("reset")),
            ]),
            decoder,
        )
        .collect()
        .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], StreamEvent::Error { error } if error.kind == AdapterErrorKind::Network));
    }

    #[tokio::test]
    async fn test_missing_key_yields_error_event() {
        let adapter = GenericAdapter::new(presets::openai()).with_retry(RetryPolicy::none());
        let request = ChatRequest {
            model: "gpt-4o".into(),
            ..Default::default()
        };
        let events: Vec<StreamEvent> = adapter
            .send(&request, &Credentials::default(), CancellationToken::new())
            .await
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error { error } if error.code() == "auth"));
    }
}
