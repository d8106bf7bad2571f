#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Groq,
    Perplexity,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Groq => "groq",
            Provider::Perplexity => "perplexity",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "groq" => Some(Provider::Groq),
            "perplexity" => Some(Provider::Perplexity),
            _ => None,
        }
    }

    pub fn all() -> Vec<Provider> {
        vec![Provider::Groq, Provider::Perplexity]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Groq => "Groq (chat completions)",
            Provider::Perplexity => "Perplexity (source search)",
        }
    }

    /// Environment variable that overrides the stored key.
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::Groq => "GROQ_API_KEY",
            Provider::Perplexity => "PERPLEXITY_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Perplexity => "https://api.perplexity.ai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Groq => "deepseek-r1-distill-llama-70b",
            Provider::Perplexity => "sonar",
        }
    }
}
