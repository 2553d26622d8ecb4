//! Streaming schema generation over server-sent events.

use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;

use super::client::BackendClient;
use super::error::BackendError;

/// Payload that ends a stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Incremental decoder for `data: ...` event lines.
///
/// Network chunks can split lines (and UTF-8 sequences) anywhere, so bytes
/// are buffered until a newline arrives.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
  buffer: Vec<u8>,
  done: bool,
}

impl SseLineDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Whether the `[DONE]` marker has been seen.
  pub fn is_done(&self) -> bool {
    self.done
  }

  /// Feed raw bytes, returning every chunk completed by them.
  pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
    if self.done {
      return Vec::new();
    }
    self.buffer.extend_from_slice(bytes);

    let mut chunks = Vec::new();
    while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
      let line: Vec<u8> = self.buffer.drain(..=pos).collect();
      if let Some(chunk) = self.decode_line(&line) {
        chunks.push(chunk);
      }
      if self.done {
        self.buffer.clear();
        break;
      }
    }
    chunks
  }

  /// Flush a trailing line that never got its newline.
  pub fn finish(&mut self) -> Vec<String> {
    if self.done || self.buffer.is_empty() {
      return Vec::new();
    }
    let line = std::mem::take(&mut self.buffer);
    self.decode_line(&line).into_iter().collect()
  }

  fn decode_line(&mut self, raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);

    // Blank separators, comments and non-data fields carry nothing for us.
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_MARKER {
      self.done = true;
      return None;
    }
    Some(chunk_text(payload))
  }
}

/// Text carried by one event payload. JSON objects with a `content` or
/// `text` string field yield that field; anything else is passed through.
fn chunk_text(payload: &str) -> String {
  if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(payload) {
    for field in ["content", "text"] {
      if let Some(Value::String(s)) = obj.get(field) {
        return s.clone();
      }
    }
  }
  payload.to_string()
}

struct SseState<S> {
  inner: Pin<Box<S>>,
  decoder: SseLineDecoder,
  pending: VecDeque<String>,
  finished: bool,
}

/// Turn a byte stream of server-sent events into a stream of text chunks.
pub fn sse_chunks<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, BackendError>>
where
  S: Stream<Item = Result<B, E>>,
  B: AsRef<[u8]>,
  E: Into<BackendError>,
{
  let state = SseState {
    inner: Box::pin(bytes),
    decoder: SseLineDecoder::new(),
    pending: VecDeque::new(),
    finished: false,
  };

  futures::stream::unfold(state, |mut state| async move {
    loop {
      if let Some(chunk) = state.pending.pop_front() {
        return Some((Ok(chunk), state));
      }
      if state.finished || state.decoder.is_done() {
        return None;
      }

      match state.inner.next().await {
        Some(Ok(bytes)) => {
          let chunks = state.decoder.feed(bytes.as_ref());
          state.pending.extend(chunks);
        }
        Some(Err(e)) => {
          state.finished = true;
          return Some((Err(e.into()), state));
        }
        None => {
          state.finished = true;
          let chunks = state.decoder.finish();
          state.pending.extend(chunks);
        }
      }
    }
  })
}

impl BackendClient {
  /// Stream a generated JSON schema for `prompt`, chunk by chunk.
  pub async fn generate_schema_stream(
    &self,
    prompt: &str,
  ) -> Result<impl Stream<Item = Result<String, BackendError>>, BackendError> {
    let request = self
      .http()
      .post(self.url("llm/generate-schema/stream"))
      .header(reqwest::header::ACCEPT, "text/event-stream")
      .json(&json!({ "prompt": prompt }));

    let response = Self::send(request).await?;
    Ok(sse_chunks(response.bytes_stream()))
  }
}
