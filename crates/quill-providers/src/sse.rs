//! Line decoder for SSE and NDJSON response bodies.
//!
//! Converts a byte stream into a `Stream` of payload strings, reassembling
//! lines split across network chunks.

use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;

use crate::error::AdapterError;

type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

struct LineState<E> {
    byte_stream: ByteStream<E>,
    buffer: Vec<u8>,
    data_prefix: String,
    finished: bool,
}

/// Payload of one line: the text after `data_prefix`, or the whole line when the prefix is empty.
fn payload<'a>(line: &'a str, data_prefix: &str) -> Option<&'a str> {
    let payload = if data_prefix.is_empty() {
        line
    } else {
        line.strip_prefix(data_prefix)?
    };
    let payload = payload.trim();
    (!payload.is_empty()).then_some(payload)
}

/// Yield the payload of every data line. Comments, `event:` fields, and blank lines are skipped.
pub fn data_lines<S, E>(byte_stream: S, data_prefix: impl Into<String>) -> impl Stream<Item = Result<String, AdapterError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    futures::stream::unfold(
        LineState {
            byte_stream: Box::pin(byte_stream),
            buffer: Vec::new(),
            data_prefix: data_prefix.into(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(newline_pos) = state.buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = state.buffer.drain(..=newline_pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if let Some(data) = payload(line, &state.data_prefix) {
                        let data = data.to_string();
                        return Some((Ok(data), state));
                    }
                    continue;
                }

                if state.finished {
                    // trailing line without a newline
                    if state.buffer.is_empty() {
                        return None;
                    }
                    let raw = std::mem::take(&mut state.buffer);
                    let line = String::from_utf8_lossy(&raw).into_owned();
                    match payload(line.trim_end_matches('\r'), &state.data_prefix) {
                        Some(data) => {
                            let data = data.to_string();
                            return Some((Ok(data), state));
                        }
                        None => return None,
                    }
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.finished = true;
                        state.buffer.clear();
                        return Some((Err(AdapterError::network(format!("stream error: {e}"))), state));
                    }
                    None => state.finished = true,
                }
            }
        },
    )
}
