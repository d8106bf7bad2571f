//! Recover cited sources from a finished answer.
//!
//! Extraction order: provider-supplied citation URLs, then a trailing
//! "References:" / "Sources:" block, then bare `[n]` markers in the body.
//! Bare markers can be backed by a search lookup when a search backend is
//! configured. Text with no citation markers yields no sources.

use crate::ai::SearchBackend;
use crate::state::{dedupe_sources, Source};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Characters of context taken on each side of a citation marker.
pub const SNIPPET_RADIUS: usize = 100;
pub const MAX_SEARCH_PHRASES: usize = 3;
pub const RESULTS_PER_PHRASE: usize = 2;
pub const MAX_SEARCHED_SOURCES: usize = 5;
const MIN_KEY_SENTENCE_CHARS: usize = 20;

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*|__)?(?:references|sources)(?:\*\*|__)?[ \t]*:(?:\*\*|__)?")
            .expect("references header pattern is valid")
    })
}

fn entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:[-*][ \t]*)?\[(\d+)\][ \t]*(.*?)[ \t]*$")
            .expect("reference entry pattern is valid")
    })
}

fn parenthesized_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.*?)[ \t]*\([ \t]*(https?://[^\s)]+)[ \t]*\)[ \t.]*$")
            .expect("parenthesized url pattern is valid")
    })
}

fn bare_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s)\]>]+").expect("bare url pattern is valid"))
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d{1,3})\]").expect("citation marker pattern is valid"))
}

fn linked_entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(\d+)\][ \t]*([^\[\]\n(]+?)[ \t]*\([ \t]*(https?://[^\s)]+)[ \t]*\)")
            .expect("linked citation pattern is valid")
    })
}

/// Distinct citation numbers in order of first appearance. Markdown link
/// labels such as `[1](https://...)` are not citations.
pub fn citation_numbers(text: &str) -> Vec<u32> {
    let mut seen = HashSet::new();
    let mut numbers = Vec::new();
    for caps in marker_regex().captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if text[whole.end()..].starts_with('(') {
            continue;
        }
        if let Ok(n) = caps[1].parse::<u32>() {
            if seen.insert(n) {
                numbers.push(n);
            }
        }
    }
    numbers
}

/// Up to `SNIPPET_RADIUS` characters either side of the first `[n]` in
/// `text`, with that marker removed and whitespace collapsed.
pub fn snippet_around(text: &str, number: u32) -> Option<String> {
    let marker = format!("[{}]", number);
    let start = text.find(&marker)?;
    let end = start + marker.len();

    let from = text[..start]
        .char_indices()
        .rev()
        .nth(SNIPPET_RADIUS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let to = text[end..]
        .char_indices()
        .nth(SNIPPET_RADIUS)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    let snippet = text[from..to]
        .replace(&marker, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if snippet.is_empty() {
        None
    } else {
        Some(snippet)
    }
}

fn cited_snippet(body: &str, number: u32) -> String {
    snippet_around(body, number)
        .unwrap_or_else(|| format!("Cited as [{}] in the response", number))
}

fn split_title_and_url(rest: &str) -> (String, String) {
    if let Some(caps) = parenthesized_url_regex().captures(rest) {
        return (clean_title(&caps[1]), caps[2].to_string());
    }
    if let Some(found) = bare_url_regex().find(rest) {
        let title = format!("{}{}", &rest[..found.start()], &rest[found.end()..]);
        return (clean_title(&title), found.as_str().to_string());
    }
    (clean_title(rest), String::new())
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '*' || c == '_' || c == '"')
        .trim_end_matches(|c: char| c == '-' || c == ':' || c == ',' || c.is_whitespace())
        .trim()
        .to_string()
}

/// Parse a trailing references block. `None` when there is no header or the
/// block holds no `[n]` entries.
pub fn references_block(text: &str) -> Option<Vec<Source>> {
    let header = header_regex().find_iter(text).last()?;
    let body = &text[..header.start()];
    let block = &text[header.end()..];

    let mut sources = Vec::new();
    for caps in entry_regex().captures_iter(block) {
        let Ok(number) = caps[1].parse::<u32>() else { continue };
        let (title, url) = split_title_and_url(&caps[2]);
        let title = if title.is_empty() {
            format!("Source {}", number)
        } else {
            title
        };
        sources.push(Source {
            title,
            url,
            snippet: cited_snippet(body, number),
        });
    }

    if sources.is_empty() {
        None
    } else {
        Some(dedupe_sources(sources))
    }
}

/// One placeholder per distinct inline marker.
pub fn inline_placeholders(text: &str) -> Vec<Source> {
    citation_numbers(text)
        .into_iter()
        .map(|n| Source {
            title: format!("Source {}", n),
            url: String::new(),
            snippet: format!("Referenced as [{}] in the text", n),
        })
        .collect()
}

/// Extract sources from finished answer text using only the text itself.
pub fn extract_sources(text: &str) -> Vec<Source> {
    references_block(text).unwrap_or_else(|| inline_placeholders(text))
}

/// `[n] Title (https://url)` entries anywhere in the text.
pub fn linked_citations(text: &str) -> Vec<Source> {
    let sources = linked_entry_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let number = caps[1].parse::<u32>().ok()?;
            let title = clean_title(&caps[2]);
            let snippet = snippet_around(text, number).unwrap_or_else(|| title.clone());
            Some(Source {
                title,
                url: caps[3].to_string(),
                snippet,
            })
        })
        .collect();
    dedupe_sources(sources)
}

/// Sources built from machine-readable citation URLs; `urls[i]` is `[i+1]`.
pub fn sources_from_citation_urls(urls: &[String], text: &str) -> Vec<Source> {
    let sources = urls
        .iter()
        .enumerate()
        .filter(|(_, u)| !u.trim().is_empty())
        .map(|(i, url)| {
            let number = (i + 1) as u32;
            let title = reqwest::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
                .unwrap_or_else(|| url.clone());
            Source {
                title,
                url: url.clone(),
                snippet: cited_snippet(text, number),
            }
        })
        .collect();
    dedupe_sources(sources)
}

/// Sentences long enough to be worth searching for.
pub fn key_sentences(text: &str) -> Vec<String> {
    text.split(|c| matches!(c, '.' | '!' | '?'))
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .map(|s| s.trim_start_matches(|c: char| c == '#' || c == '*' || c == '-').trim().to_string())
        .filter(|s| s.chars().count() > MIN_KEY_SENTENCE_CHARS)
        .collect()
}

/// Resolves the final source list for a turn.
#[derive(Clone, Default)]
pub struct SourceResolver {
    search: Option<Arc<dyn SearchBackend>>,
}

impl SourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(search: Arc<dyn SearchBackend>) -> Self {
        Self {
            search: Some(search),
        }
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    pub async fn resolve(&self, query: &str, answer: &str, provider_citations: &[String]) -> Vec<Source> {
        if !provider_citations.is_empty() {
            return sources_from_citation_urls(provider_citations, answer);
        }

        if let Some(sources) = references_block(answer) {
            return sources;
        }

        let placeholders = inline_placeholders(answer);
        if placeholders.is_empty() {
            return placeholders;
        }

        if let Some(search) = &self.search {
            let found = search_sources(search.as_ref(), query, answer).await;
            if !found.is_empty() {
                return found;
            }
            debug!("search returned nothing; keeping inline placeholders");
        }

        placeholders
    }
}

async fn search_sources(search: &dyn SearchBackend, query: &str, answer: &str) -> Vec<Source> {
    let mut phrases = Vec::with_capacity(MAX_SEARCH_PHRASES);
    if !query.trim().is_empty() {
        phrases.push(query.trim().to_string());
    }
    phrases.extend(key_sentences(answer));
    phrases.truncate(MAX_SEARCH_PHRASES);

    let mut collected = Vec::new();
    for phrase in &phrases {
        match search.search(phrase).await {
            Ok(results) => collected.extend(results.into_iter().take(RESULTS_PER_PHRASE)),
            Err(e) => warn!("source search failed for phrase {:?}: {}", phrase, e),
        }
    }

    let mut sources = dedupe_sources(collected);
    sources.truncate(MAX_SEARCHED_SOURCES);
    sources
}
