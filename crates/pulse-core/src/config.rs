use crate::provider::Provider;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SUGGESTION_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_TOKENS: u32 = 1500;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub groq_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,
    pub chat_model: Option<String>,
    pub suggestion_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub groq_base_url: Option<String>,
    pub perplexity_base_url: Option<String>,
    pub enable_source_search: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            groq_api_key: None,
            perplexity_api_key: None,
            chat_model: None,
            suggestion_model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            groq_base_url: None,
            perplexity_base_url: None,
            enable_source_search: true,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    pub fn set_api_key(&mut self, provider: Provider, key: &str) {
        let key = Some(key.trim().to_string());
        match provider {
            Provider::Groq => self.groq_api_key = key,
            Provider::Perplexity => self.perplexity_api_key = key,
        }
    }

    fn stored_key(&self, provider: Provider) -> Option<&String> {
        match provider {
            Provider::Groq => self.groq_api_key.as_ref(),
            Provider::Perplexity => self.perplexity_api_key.as_ref(),
        }
    }

    /// API key for a provider - env vars first, then config
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        std::env::var(provider.env_var())
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.stored_key(provider).cloned())
            .filter(|k| !k.trim().is_empty())
    }

    /// Returns the source of the API key for a provider: "env", "config", or None
    pub fn key_source(&self, provider: Provider) -> Option<&'static str> {
        if std::env::var(provider.env_var()).map(|k| !k.trim().is_empty()).unwrap_or(false) {
            Some("env")
        } else if self.stored_key(provider).map(|k| !k.trim().is_empty()).unwrap_or(false) {
            Some("config")
        } else {
            None
        }
    }

    pub fn chat_model(&self) -> &str {
        self.chat_model
            .as_deref()
            .unwrap_or_else(|| Provider::Groq.default_model())
    }

    pub fn suggestion_model(&self) -> &str {
        self.suggestion_model
            .as_deref()
            .unwrap_or(DEFAULT_SUGGESTION_MODEL)
    }

    pub fn base_url(&self, provider: Provider) -> &str {
        let configured = match provider {
            Provider::Groq => self.groq_base_url.as_deref(),
            Provider::Perplexity => self.perplexity_base_url.as_deref(),
        };
        configured.unwrap_or_else(|| provider.default_base_url())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("healthsync").join("config.json"))
    }
}
