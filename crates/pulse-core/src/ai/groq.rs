use super::{upstream_error, ByteStream, ChatBackend, ChatRequest};
use crate::error::{PulseError, PulseResult};
use crate::provider::Provider;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MISSING_KEY_MESSAGE: &str =
    "Groq API key is not configured. Please add GROQ_API_KEY to your environment variables.";

#[derive(Serialize)]
struct GroqRequest<'a> {
    #[serde(flatten)]
    request: &'a ChatRequest,
    stream: bool,
}

#[derive(Deserialize)]
struct GroqResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct GroqChoice {
    message: GroqResponseMessage,
}

#[derive(Deserialize)]
struct GroqResponse {
    choices: Vec<GroqChoice>,
}

#[derive(Deserialize)]
struct GroqModel {
    id: String,
}

#[derive(Deserialize)]
struct GroqModelsResponse {
    data: Vec<GroqModel>,
}

/// OpenAI-compatible chat client for the Groq API
#[derive(Clone)]
pub struct GroqClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GroqClient {
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.map(|k| k.to_string()),
            base_url: Provider::Groq.default_base_url().to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn api_key(&self) -> PulseResult<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PulseError::UpstreamAuth(MISSING_KEY_MESSAGE.to_string()))
    }

    async fn post_completion(&self, request: &ChatRequest, stream: bool) -> PulseResult<Response> {
        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %request.model, stream, "sending Groq chat completion");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&GroqRequest { request, stream })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(upstream_error("Groq", status, &text));
        }

        Ok(response)
    }

    pub async fn list_models(&self) -> PulseResult<Vec<String>> {
        let api_key = self.api_key()?;
        let url = format!("{}/models", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(upstream_error("Groq", status, &text));
        }

        let models_response: GroqModelsResponse = response.json().await?;
        let mut model_names: Vec<String> = models_response
            .data
            .into_iter()
            .map(|model| model.id)
            .collect();
        model_names.sort();

        Ok(model_names)
    }
}

#[async_trait]
impl ChatBackend for GroqClient {
    async fn stream_chat(&self, request: &ChatRequest) -> PulseResult<ByteStream> {
        let response = self.post_completion(request, true).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(PulseError::from));
        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: &ChatRequest) -> PulseResult<String> {
        let response = self.post_completion(request, false).await?;
        let groq_response: GroqResponse = response.json().await?;
        Ok(groq_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
