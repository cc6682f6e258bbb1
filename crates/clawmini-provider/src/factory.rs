//! Backend selection, resolved once at startup.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Result, bail};
use clawmini_protocol::{EmbeddingProvider, GenerationProvider};
use tracing::info;

use crate::agent::{DEFAULT_MAX_STEPS, ReactAgent};
use crate::embedding::{HashEmbedder, OpenAiEmbeddingClient};
use crate::openai::OpenAiChatClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationBackend {
    OpenAi,
    DeepSeek,
    DashScope,
    Ollama,
}

impl GenerationBackend {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::DashScope => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            Self::Ollama => "http://127.0.0.1:11434/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o",
            Self::DeepSeek => "deepseek-chat",
            Self::DashScope => "qwen3-max",
            Self::Ollama => "qwen3:8b",
        }
    }

    /// Conventional environment variable holding the backend's key.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::DashScope => Some("DASHSCOPE_API_KEY"),
            Self::Ollama => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::DashScope => "dashscope",
            Self::Ollama => "ollama",
        }
    }
}

impl FromStr for GenerationBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "deepseek" => Ok(Self::DeepSeek),
            "dashscope" => Ok(Self::DashScope),
            "ollama" => Ok(Self::Ollama),
            other => bail!("unknown generation backend: {other}"),
        }
    }
}

impl fmt::Display for GenerationBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    OpenAi,
    Ollama,
    Hash,
}

impl EmbeddingBackend {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://127.0.0.1:11434/v1",
            Self::Hash => "",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "text-embedding-3-small",
            Self::Ollama => "nomic-embed-text",
            Self::Hash => "hash-bow-256",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Hash => "hash",
        }
    }
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "hash" => Ok(Self::Hash),
            other => bail!("unknown embedding backend: {other}"),
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub backend: GenerationBackend,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_steps: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: GenerationBackend::OpenAi,
            model: None,
            base_url: None,
            api_key: None,
            temperature: 0.2,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hash,
            model: None,
            base_url: None,
            api_key: None,
        }
    }
}

pub struct ProviderFactory;

impl ProviderFactory {
    pub fn generation(config: &GenerationConfig) -> Arc<dyn GenerationProvider> {
        let backend = config.backend;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| backend.default_base_url().to_owned());
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| backend.default_model().to_owned());
        info!(%backend, %model, %base_url, "generation provider selected");

        let client = OpenAiChatClient::new(base_url, model)
            .with_api_key(config.api_key.clone())
            .with_temperature(config.temperature);
        Arc::new(ReactAgent::new(Arc::new(client)).with_max_steps(config.max_steps))
    }

    pub fn embedding(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
        let backend = config.backend;
        if backend == EmbeddingBackend::Hash {
            info!(%backend, "embedding provider selected");
            return Arc::new(HashEmbedder::default());
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| backend.default_base_url().to_owned());
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| backend.default_model().to_owned());
        info!(%backend, %model, %base_url, "embedding provider selected");
        Arc::new(OpenAiEmbeddingClient::new(base_url, model).with_api_key(config.api_key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backends_parse_case_insensitively() -> Result<()> {
        assert_eq!("DeepSeek".parse::<GenerationBackend>()?, GenerationBackend::DeepSeek);
        assert_eq!(" ollama ".parse::<EmbeddingBackend>()?, EmbeddingBackend::Ollama);
        assert!("google".parse::<GenerationBackend>().is_err());
        Ok(())
    }

    #[test]
    fn display_round_trips_through_from_str() -> Result<()> {
        for backend in [
            GenerationBackend::OpenAi,
            GenerationBackend::DeepSeek,
            GenerationBackend::DashScope,
            GenerationBackend::Ollama,
        ] {
            assert_eq!(backend.to_string().parse::<GenerationBackend>()?, backend);
        }
        Ok(())
    }

    #[test]
    fn hash_embedding_needs_no_endpoint() {
        let provider = ProviderFactory::embedding(&EmbeddingConfig::default());
        assert_eq!(provider.model_name(), EmbeddingBackend::Hash.default_model());
    }

    #[test]
    fn configured_model_overrides_default() {
        let provider = ProviderFactory::embedding(&EmbeddingConfig {
            backend: EmbeddingBackend::Ollama,
            model: Some("mxbai-embed-large".into()),
            ..EmbeddingConfig::default()
        });
        assert_eq!(provider.model_name(), "mxbai-embed-large");
    }
}
