//! Turns incremental completion text into display-ready deltas.
//!
//! Text between `<think>` and `</think>` is routed to the thinking channel,
//! everything else to the answer channel, and the markers themselves never
//! reach either. A marker may be split across deltas, so a trailing prefix
//! of the marker being searched for is held back until the next push.
//!
//! Each channel buffers until a word boundary so partial words are not
//! shown. A channel flushes through its last whitespace or sentence
//! terminator, and anything left after that is flushed as well once it
//! reaches the length threshold. `finish` flushes everything unconditionally.

pub const THINK_START: &str = "<think>";
pub const THINK_END: &str = "</think>";
pub const DEFAULT_FLUSH_THRESHOLD: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Thinking(String),
    Answer(String),
}

impl Delta {
    pub fn text(&self) -> &str {
        match self {
            Delta::Thinking(text) | Delta::Answer(text) => text,
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, Delta::Answer(_))
    }
}

#[derive(Debug, Default)]
struct Channel {
    pending: String,
    full: String,
}

impl Channel {
    fn append(&mut self, text: &str) {
        self.pending.push_str(text);
        self.full.push_str(text);
    }

    fn take_ready(&mut self, threshold: usize) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        let boundary = self
            .pending
            .char_indices()
            .rev()
            .find(|(_, c)| is_boundary(*c))
            .map(|(i, c)| i + c.len_utf8());

        let mut ready: String = match boundary {
            Some(end) => self.pending.drain(..end).collect(),
            None => String::new(),
        };
        if self.pending.chars().count() >= threshold {
            ready.push_str(&self.take_all());
        }

        if ready.is_empty() {
            None
        } else {
            Some(ready)
        }
    }

    fn take_all(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

fn is_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '.' | '!' | '?')
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .find(|&k| text.ends_with(&marker[..k]))
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct TokenAssembler {
    raw: String,
    in_thinking: bool,
    thinking: Channel,
    answer: Channel,
    flush_threshold: usize,
}

impl Default for TokenAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenAssembler {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_threshold(flush_threshold: usize) -> Self {
        Self {
            raw: String::new(),
            in_thinking: false,
            thinking: Channel::default(),
            answer: Channel::default(),
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Feed in-band content that may carry thinking markers.
    pub fn push(&mut self, content: &str) -> Vec<Delta> {
        self.raw.push_str(content);
        let mut out = Vec::new();

        loop {
            let marker = if self.in_thinking { THINK_END } else { THINK_START };

            if let Some(idx) = self.raw.find(marker) {
                let before: String = self.raw.drain(..idx).collect();
                self.raw.drain(..marker.len());
                self.route(&before, &mut out);

                // The channel being left is complete; flush it whole.
                let leaving = self.current_channel_mut();
                let rest = leaving.take_all();
                let was_thinking = self.in_thinking;
                if !rest.is_empty() {
                    out.push(make_delta(was_thinking, rest));
                }
                self.in_thinking = !self.in_thinking;
            } else {
                let keep = partial_marker_len(&self.raw, marker);
                let split = self.raw.len() - keep;
                let ready: String = self.raw.drain(..split).collect();
                self.route(&ready, &mut out);
                break;
            }
        }

        out
    }

    /// Feed reasoning the provider delivered out-of-band.
    pub fn push_reasoning(&mut self, reasoning: &str) -> Vec<Delta> {
        let mut out = Vec::new();
        self.thinking.append(reasoning);
        if let Some(ready) = self.thinking.take_ready(self.flush_threshold) {
            out.push(Delta::Thinking(ready));
        }
        out
    }

    /// Flush everything that is still buffered. Call once when the stream ends.
    pub fn finish(&mut self) -> Vec<Delta> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.raw);
        if !rest.is_empty() {
            self.current_channel_mut().append(&rest);
        }

        let thinking = self.thinking.take_all();
        if !thinking.is_empty() {
            out.push(Delta::Thinking(thinking));
        }
        let answer = self.answer.take_all();
        if !answer.is_empty() {
            out.push(Delta::Answer(answer));
        }
        out
    }

    /// Answer text routed so far, including text not yet flushed.
    pub fn answer_text(&self) -> &str {
        &self.answer.full
    }

    pub fn thinking_text(&self) -> &str {
        &self.thinking.full
    }

    pub fn has_answer(&self) -> bool {
        !self.answer.full.trim().is_empty()
    }

    fn current_channel_mut(&mut self) -> &mut Channel {
        if self.in_thinking {
            &mut self.thinking
        } else {
            &mut self.answer
        }
    }

    fn route(&mut self, text: &str, out: &mut Vec<Delta>) {
        if text.is_empty() {
            return;
        }
        let threshold = self.flush_threshold;
        let in_thinking = self.in_thinking;
        let channel = self.current_channel_mut();
        channel.append(text);
        if let Some(ready) = channel.take_ready(threshold) {
            out.push(make_delta(in_thinking, ready));
        }
    }
}

fn make_delta(thinking: bool, text: String) -> Delta {
    if thinking {
        Delta::Thinking(text)
    } else {
        Delta::Answer(text)
    }
}

/// Remove thinking blocks (and their markers) from a finished text.
pub fn strip_thinking(text: &str) -> String {
    let mut assembler = TokenAssembler::new();
    assembler.push(text);
    assembler.finish();
    assembler.answer_text().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> (Vec<Delta>, TokenAssembler) {
        let mut assembler = TokenAssembler::new();
        let mut deltas = Vec::new();
        for chunk in chunks {
            deltas.extend(assembler.push(chunk));
        }
        deltas.extend(assembler.finish());
        (deltas, assembler)
    }

    fn answer_of(deltas: &[Delta]) -> String {
        deltas
            .iter()
            .filter(|d| d.is_answer())
            .map(|d| d.text())
            .collect()
    }

    fn thinking_of(deltas: &[Delta]) -> String {
        deltas
            .iter()
            .filter(|d| !d.is_answer())
            .map(|d| d.text())
            .collect()
    }

    #[test]
    fn test_single_sentence_is_one_delta() {
        let (deltas, _) = run(&["Headaches can be caused by stress."]);
        assert_eq!(
            deltas,
            vec![Delta::Answer("Headaches can be caused by stress.".to_string())]
        );
    }

    #[test]
    fn test_partial_words_are_held_back() {
        let mut assembler = TokenAssembler::new();
        assert_eq!(assembler.push("Hel"), vec![]);
        assert_eq!(
            assembler.push("lo wor"),
            vec![Delta::Answer("Hello ".to_string())]
        );
        assert_eq!(assembler.push("ld"), vec![]);
        assert_eq!(assembler.finish(), vec![Delta::Answer("world".to_string())]);
    }

    #[test]
    fn test_threshold_flushes_long_words() {
        let mut assembler = TokenAssembler::with_threshold(5);
        assert_eq!(assembler.push("abc"), vec![]);
        assert_eq!(
            assembler.push("defg"),
            vec![Delta::Answer("abcdefg".to_string())]
        );
    }

    #[test]
    fn test_long_tail_after_boundary_is_flushed() {
        let mut assembler = TokenAssembler::new();
        assert_eq!(
            assembler.push("a abcdefghijklmnopqrstuvwxyz0123"),
            vec![Delta::Answer("a abcdefghijklmnopqrstuvwxyz0123".to_string())]
        );
        assert_eq!(
            assembler.push("Short tai"),
            vec![Delta::Answer("Short ".to_string())]
        );
        assert_eq!(assembler.finish(), vec![Delta::Answer("tai".to_string())]);
    }

    #[test]
    fn test_thinking_is_separated_and_markers_stripped() {
        let (deltas, assembler) = run(&["<think>Let me recall. </think>Drink water."]);
        assert_eq!(thinking_of(&deltas), "Let me recall. ");
        assert_eq!(answer_of(&deltas), "Drink water.");
        assert_eq!(assembler.answer_text(), "Drink water.");
    }

    #[test]
    fn test_markers_split_across_chunks() {
        let chunks = ["Intro <th", "ink>hidden rea", "soning</th", "ink> visible", " end."];
        let (deltas, assembler) = run(&chunks);
        assert_eq!(answer_of(&deltas), "Intro  visible end.");
        assert_eq!(thinking_of(&deltas), "hidden reasoning");
        assert_eq!(assembler.thinking_text(), "hidden reasoning");
    }

    #[test]
    fn test_concatenation_matches_text_without_thinking() {
        let full = "<think>plan the answer carefully</think>Migraines are severe. \
                    They often affect one side [1]. Tension-type headaches feel like pressure.";
        // Every chunking of the same text yields the same answer stream.
        for size in [1usize, 2, 3, 7, 13, 64] {
            let chars: Vec<char> = full.chars().collect();
            let chunks: Vec<String> = chars.chunks(size).map(|c| c.iter().collect()).collect();
            let refs: Vec<&str> = chunks.iter().map(|s| s.as_str()).collect();
            let (deltas, _) = run(&refs);
            assert_eq!(
                answer_of(&deltas),
                "Migraines are severe. They often affect one side [1]. Tension-type headaches feel like pressure."
            );
            assert_eq!(thinking_of(&deltas), "plan the answer carefully");
        }
    }

    #[test]
    fn test_unterminated_thinking_stays_thinking() {
        let (deltas, assembler) = run(&["<think>still going"]);
        assert_eq!(thinking_of(&deltas), "still going");
        assert!(!assembler.has_answer());
    }

    #[test]
    fn test_lone_angle_bracket_is_not_swallowed() {
        let (deltas, _) = run(&["a <", "b"]);
        assert_eq!(answer_of(&deltas), "a <b");
    }

    #[test]
    fn test_out_of_band_reasoning() {
        let mut assembler = TokenAssembler::new();
        let mut deltas = assembler.push_reasoning("Considering causes. ");
        deltas.extend(assembler.push("Stress."));
        deltas.extend(assembler.finish());
        assert_eq!(thinking_of(&deltas), "Considering causes. ");
        assert_eq!(answer_of(&deltas), "Stress.");
    }

    #[test]
    fn test_strip_thinking() {
        assert_eq!(
            strip_thinking("<think>x</think>1. What next?"),
            "1. What next?"
        );
        assert_eq!(strip_thinking("no markers"), "no markers");
    }
}
