use crate::ai::{ChatBackend, ChatMessage, ChatRequest};
use crate::stream::strip_thinking;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub const MAX_SUGGESTIONS: usize = 3;
const MAX_ANSWER_CHARS: usize = 4000;

fn numbered_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\d+\.\s*(.+?)\s*$").expect("numbered line pattern is valid")
    })
}

/// Pull up to three `N. question?` lines out of a model reply.
pub fn parse_suggestions(reply: &str) -> Vec<String> {
    let reply = strip_thinking(reply);
    reply
        .lines()
        .filter_map(|line| numbered_line_regex().captures(line))
        .map(|caps| {
            caps[1]
                .trim_matches(|c: char| c == '*' || c == '"' || c.is_whitespace())
                .to_string()
        })
        .filter(|q| q.len() > 1 && q.ends_with('?'))
        .take(MAX_SUGGESTIONS)
        .collect()
}

/// Best-effort follow-up questions for a finished answer
#[derive(Clone)]
pub struct SuggestionGenerator {
    backend: Arc<dyn ChatBackend>,
    model: String,
}

impl SuggestionGenerator {
    pub fn new(backend: Arc<dyn ChatBackend>, model: &str) -> Self {
        Self {
            backend,
            model: model.to_string(),
        }
    }

    fn build_request(&self, query: &str, answer: &str) -> ChatRequest {
        let answer: String = answer.chars().take(MAX_ANSWER_CHARS).collect();
        let prompt = format!(
            "Based on the following question and answer, suggest {} follow-up questions the user might ask next.\n\
             Reply with a numbered list only, one question per line, each ending with a question mark.\n\n\
             Question: {}\n\nAnswer: {}",
            MAX_SUGGESTIONS, query, answer
        );

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system("You suggest concise, relevant follow-up questions about health topics."),
                ChatMessage::user(prompt),
            ],
            temperature: 0.5,
            max_tokens: 200,
        }
    }

    /// Never fails: any error yields an empty list.
    pub async fn generate(&self, query: &str, answer: &str) -> Vec<String> {
        let request = self.build_request(query, answer);
        match self.backend.complete(&request).await {
            Ok(reply) => {
                let suggestions = parse_suggestions(&reply);
                debug!(count = suggestions.len(), "parsed follow-up suggestions");
                suggestions
            }
            Err(e) => {
                warn!("follow-up suggestion request failed: {}", e);
                Vec::new()
            }
        }
    }
}
