//! UI-agnostic conversation state types
//!
//! These are shared by every front end (the CLI today) and don't depend on
//! any rendering framework. A `ChatTurn` is mutated while its answer streams
//! in and becomes read-only once `finalize` has run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A cited source attached to an assistant answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl Source {
    pub fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

/// Drop later entries whose non-empty url was already seen. Entries with an
/// empty url are never treated as duplicates.
pub fn dedupe_sources(sources: Vec<Source>) -> Vec<Source> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| s.url.is_empty() || seen.insert(s.url.clone()))
        .collect()
}

/// One message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: Uuid,
    pub role: ChatRole,
    pub text: String,
    /// Reasoning trace separated from the answer; never part of `text`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thinking: String,
    pub timestamp: DateTime<Utc>,
    sources: Vec<Source>,
    suggested_follow_ups: Vec<String>,
    streaming: bool,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: ChatRole::User,
            text: text.into(),
            thinking: String::new(),
            timestamp: Utc::now(),
            sources: Vec::new(),
            suggested_follow_ups: Vec::new(),
            streaming: false,
        }
    }

    /// An empty assistant turn that is about to receive streamed text.
    pub fn assistant_streaming() -> Self {
        Self {
            role: ChatRole::Assistant,
            streaming: true,
            ..Self::user(String::new())
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn suggested_follow_ups(&self) -> &[String] {
        &self.suggested_follow_ups
    }

    /// Append answer text. Ignored once the turn is finalized.
    pub fn push_answer(&mut self, delta: &str) {
        if self.streaming {
            self.text.push_str(delta);
        }
    }

    /// Append reasoning text. Ignored once the turn is finalized.
    pub fn push_thinking(&mut self, delta: &str) {
        if self.streaming {
            self.thinking.push_str(delta);
        }
    }

    /// Attach resolved sources and follow-ups and freeze the turn.
    pub fn finalize(&mut self, sources: Vec<Source>, suggested_follow_ups: Vec<String>) {
        if !self.streaming {
            return;
        }
        self.sources = dedupe_sources(sources);
        self.suggested_follow_ups = suggested_follow_ups;
        self.streaming = false;
    }
}

/// Ordered list of turns for a single session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub turns: Vec<ChatTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }
}
