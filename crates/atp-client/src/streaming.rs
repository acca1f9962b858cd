//! Server-sent event decoding for streamed tool execution.

use std::pin::Pin;

use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::{Value, json};
use tracing::{trace, warn};

use crate::error::{AtpError, Result};

/// A stream of decoded event payloads.
pub type EventStream = BoxStream<'static, Result<Value>>;

/// Incremental decoder for `data:` lines of an event stream.
///
/// Chunks may split lines, including inside multi-byte characters; only
/// complete lines are decoded. Each `data:` line holds one JSON payload.
/// Payloads that fail to parse are logged and skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the events completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever remains once the stream has ended.
    pub fn finish(&mut self) -> Option<Value> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }
}

fn decode_line(line: &[u8]) -> Option<Value> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str(data) {
        Ok(event) => {
            trace!(%data, "Stream event");
            Some(event)
        }
        Err(e) => {
            warn!("Failed to parse stream event: {}", e);
            None
        }
    }
}

struct DecodeState<S> {
    chunks: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: std::collections::VecDeque<Value>,
    done: bool,
}

/// Decode a byte stream into event payloads.
pub fn sse_events<S, B, E>(chunks: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<AtpError> + Send + 'static,
{
    let state = DecodeState {
        chunks: Box::pin(chunks),
        decoder: SseDecoder::new(),
        pending: std::collections::VecDeque::new(),
        done: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

/// The accumulated outcome of a streamed execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedStream {
    /// Number of events received.
    pub events: usize,
    /// Text deltas, concatenated in arrival order.
    pub text: String,
    /// The last `result` or `done` payload, if any arrived.
    pub result: Option<Value>,
}

impl CollectedStream {
    /// Fold one event into the accumulator.
    pub fn push(&mut self, event: &Value) {
        self.events += 1;
        match event.get("delta") {
            Some(Value::String(delta)) => self.text.push_str(delta),
            Some(Value::Object(delta)) => {
                if let Some(text) = delta
                    .get("text")
                    .or_else(|| delta.get("content"))
                    .and_then(Value::as_str)
                {
                    self.text.push_str(text);
                }
            }
            _ => {}
        }

        let is_done = event.get("type").and_then(Value::as_str) == Some("done")
            || event.get("event").and_then(Value::as_str) == Some("done");
        if let Some(result) = event.get("result") {
            self.result = Some(result.clone());
        } else if is_done && let Some(payload) = event.get("payload") {
            self.result = Some(payload.clone());
        } else if let Some(error) = event.get("error") {
            self.result = Some(json!({ "error": error }));
        }
    }

    /// The final result: the last result payload, else the accumulated text.
    pub fn into_value(self) -> Value {
        self.result.unwrap_or(Value::String(self.text))
    }
}

/// Drain a stream into its final result.
///
/// # Errors
///
/// Returns the first transport error raised by the stream.
pub async fn collect_stream(mut events: EventStream) -> Result<CollectedStream> {
    let mut collected = CollectedStream::default();
    while let Some(event) = events.next().await {
        collected.push(&event?);
    }
    Ok(collected)
}
