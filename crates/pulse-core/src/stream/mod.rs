pub mod assembler;
pub mod sse;

pub use assembler::{strip_thinking, Delta, TokenAssembler, THINK_END, THINK_START};
pub use sse::{parse_payload, Payload, SseDecoder, SseEvent};

use crate::error::{PulseError, PulseResult};
use crate::sources::citation_numbers;

/// Per-turn streaming state. Owned by exactly one in-flight turn and
/// dropped when that turn reaches a terminal phase.
#[derive(Debug, Default)]
pub struct StreamState {
    decoder: SseDecoder,
    assembler: TokenAssembler,
    provider_citations: Vec<String>,
    done: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk. Returns the deltas ready for display.
    pub fn ingest(&mut self, chunk: &[u8]) -> PulseResult<Vec<Delta>> {
        let mut deltas = Vec::new();
        if self.done {
            return Ok(deltas);
        }
        for event in self.decoder.push(chunk) {
            self.apply(event, &mut deltas)?;
            if self.done {
                break;
            }
        }
        Ok(deltas)
    }

    /// Close the stream and flush everything still buffered.
    pub fn finish(&mut self) -> PulseResult<Vec<Delta>> {
        let mut deltas = Vec::new();
        if !self.done {
            if let Some(event) = self.decoder.finish() {
                self.apply(event, &mut deltas)?;
            }
            self.done = true;
        }
        deltas.extend(self.assembler.finish());
        Ok(deltas)
    }

    /// True once the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn answer_text(&self) -> &str {
        self.assembler.answer_text()
    }

    pub fn thinking_text(&self) -> &str {
        self.assembler.thinking_text()
    }

    pub fn has_answer(&self) -> bool {
        self.assembler.has_answer()
    }

    /// Citation URLs the provider sent alongside the text, if any.
    pub fn provider_citations(&self) -> &[String] {
        &self.provider_citations
    }

    /// Distinct `[n]` markers in the answer so far.
    pub fn citation_numbers_seen(&self) -> Vec<u32> {
        citation_numbers(self.assembler.answer_text())
    }

    fn apply(&mut self, event: SseEvent, deltas: &mut Vec<Delta>) -> PulseResult<()> {
        match event {
            SseEvent::Done => self.done = true,
            SseEvent::Data(data) => match parse_payload(&data) {
                Payload::Skip => {}
                Payload::Error(message) => return Err(PulseError::UpstreamUnavailable(message)),
                Payload::Delta {
                    content,
                    reasoning,
                    citations,
                } => {
                    if self.provider_citations.is_empty() && !citations.is_empty() {
                        self.provider_citations = citations;
                    }
                    if let Some(reasoning) = reasoning {
                        deltas.extend(self.assembler.push_reasoning(&reasoning));
                    }
                    if let Some(content) = content {
                        deltas.extend(self.assembler.push(&content));
                    }
                }
            },
        }
        Ok(())
    }
}
