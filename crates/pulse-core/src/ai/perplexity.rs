use super::{upstream_error, ChatMessage, SearchBackend};
use crate::error::{PulseError, PulseResult};
use crate::provider::Provider;
use crate::sources::{linked_citations, sources_from_citation_urls};
use crate::state::Source;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SEARCH_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that searches the web to provide accurate information with sources.";

#[derive(Serialize)]
struct PerplexityRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct PerplexityMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct PerplexityChoice {
    message: PerplexityMessage,
}

#[derive(Deserialize)]
struct PerplexitySearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Deserialize)]
struct PerplexityResponse {
    #[serde(default)]
    choices: Vec<PerplexityChoice>,
    #[serde(default)]
    search_results: Vec<PerplexitySearchResult>,
    #[serde(default)]
    citations: Vec<String>,
}

/// Search client that asks Perplexity for sourced medical information
#[derive(Clone)]
pub struct PerplexityClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl PerplexityClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: Provider::Perplexity.default_base_url().to_string(),
            model: Provider::Perplexity.default_model().to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SearchBackend for PerplexityClient {
    async fn search(&self, query: &str) -> PulseResult<Vec<Source>> {
        let request = PerplexityRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SEARCH_SYSTEM_PROMPT),
                ChatMessage::user(format!(
                    "Please search for reliable medical information about: {}\n\nProvide only factual information from reputable medical sources.",
                    query
                )),
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(upstream_error("Perplexity", status, &text));
        }

        let body: PerplexityResponse = response
            .json()
            .await
            .map_err(|e| PulseError::UpstreamUnavailable(format!("Perplexity returned an unreadable body: {}", e)))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        let mut sources = linked_citations(content);

        if sources.is_empty() {
            sources = body
                .search_results
                .into_iter()
                .filter(|r| !r.title.is_empty() && !r.url.is_empty())
                .map(|r| Source {
                    title: r.title,
                    url: r.url,
                    snippet: r.snippet.unwrap_or_else(|| "Referenced source".to_string()),
                })
                .collect();
        }

        if sources.is_empty() {
            sources = sources_from_citation_urls(&body.citations, content);
        }

        debug!(query, found = sources.len(), "perplexity search finished");
        Ok(sources)
    }
}
