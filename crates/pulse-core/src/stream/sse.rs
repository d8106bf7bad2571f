//! Incremental decoder for `data: ...` server-sent-event lines.
//!
//! Network chunks can end mid-line (or mid UTF-8 sequence), so bytes are
//! buffered until a newline arrives. Only `data:` lines carry payloads;
//! comments, `event:` lines and blank separators are dropped.

use serde::Deserialize;
use tracing::debug;

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and return every complete event it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the body has closed without a final newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.is_empty() {
            return None;
        }
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<SseEvent> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            debug!("skipping SSE line with invalid UTF-8: {}", e);
            return None;
        }
    };
    let line = line.trim_end_matches(&['\n', '\r'][..]);

    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data.trim() == DONE_SENTINEL {
        Some(SseEvent::Done)
    } else if data.trim().is_empty() {
        None
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// What one `data:` payload contributes to the turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Delta {
        content: Option<String>,
        reasoning: Option<String>,
        citations: Vec<String>,
    },
    /// The provider reported an error in-band.
    Error(String),
    /// Not JSON, or JSON without anything we use.
    Skip,
}

pub fn parse_payload(data: &str) -> Payload {
    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("skipping unparseable SSE payload: {} ({})", e, data);
            return Payload::Skip;
        }
    };

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .unwrap_or("An error occurred during streaming")
            .to_string();
        return Payload::Error(message);
    }

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .map(|c| c.delta)
        .unwrap_or_default();
    let content = delta.content.filter(|c| !c.is_empty());
    let reasoning = delta.reasoning.filter(|r| !r.is_empty());

    if content.is_none() && reasoning.is_none() && chunk.citations.is_empty() {
        return Payload::Skip;
    }

    Payload::Delta {
        content,
        reasoning,
        citations: chunk.citations,
    }
}
