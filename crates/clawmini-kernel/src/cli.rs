//! Command-line and environment options shared by the binaries.

use std::path::PathBuf;

use clap::Args;
use clawmini_memory::DEFAULT_TOP_K;
use clawmini_provider::{
    DEFAULT_MAX_STEPS, EmbeddingBackend, EmbeddingConfig, GenerationBackend, GenerationConfig,
};
use clawmini_session::DEFAULT_MAX_MESSAGES;

use crate::settings::{DEFAULT_COMMAND_TIMEOUT_SECS, Settings};

#[derive(Debug, Clone, Args)]
pub struct SettingsArgs {
    /// Directory holding sessions/, memory/, workspace/ and skills/.
    #[arg(long, env = "CLAWMINI_ROOT", default_value = ".clawmini")]
    pub root: PathBuf,

    /// openai, deepseek, dashscope or ollama.
    #[arg(long, env = "MODEL_TYPE", default_value = "openai")]
    pub model_type: GenerationBackend,
    #[arg(long, env = "DEFAULT_MODEL")]
    pub model: Option<String>,
    #[arg(long, env = "LLM_BASE_URL")]
    pub base_url: Option<String>,
    /// Falls back to the backend's conventional variable, e.g. `OPENAI_API_KEY`.
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = 0.2)]
    pub temperature: f32,
    #[arg(long, env = "MAX_AGENT_STEPS", default_value_t = DEFAULT_MAX_STEPS)]
    pub max_agent_steps: usize,

    /// openai, ollama or hash.
    #[arg(long, env = "EMBEDDING_BACKEND", default_value = "hash")]
    pub embedding_backend: EmbeddingBackend,
    #[arg(long, env = "EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,
    #[arg(long, env = "EMBEDDING_BASE_URL")]
    pub embedding_base_url: Option<String>,
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    #[arg(long, env = "MAX_MESSAGES", default_value_t = DEFAULT_MAX_MESSAGES)]
    pub max_messages: usize,
    #[arg(long, env = "MEMORY_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub memory_top_k: usize,
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout_secs: u64,
    #[arg(long, env = "ALLOW_DANGEROUS_COMMANDS")]
    pub allow_dangerous_commands: bool,
}

impl SettingsArgs {
    pub fn into_settings(self) -> Settings {
        let backend = self.model_type;
        let api_key = self.api_key.or_else(|| {
            backend
                .api_key_env()
                .and_then(|name| std::env::var(name).ok())
        });
        let embedding_api_key = self.embedding_api_key.or_else(|| {
            (self.embedding_backend == EmbeddingBackend::OpenAi)
                .then(|| std::env::var("OPENAI_API_KEY").ok())
                .flatten()
        });

        Settings::new(self.root)
            .with_max_messages(self.max_messages)
            .with_memory_top_k(self.memory_top_k)
            .with_max_agent_steps(self.max_agent_steps)
            .with_command_timeout_secs(self.command_timeout_secs)
            .with_dangerous_commands(self.allow_dangerous_commands)
            .with_generation(GenerationConfig {
                backend,
                model: self.model,
                base_url: self.base_url,
                api_key,
                temperature: self.temperature,
                max_steps: self.max_agent_steps,
            })
            .with_embedding(EmbeddingConfig {
                backend: self.embedding_backend,
                model: self.embedding_model,
                base_url: self.embedding_base_url,
                api_key: embedding_api_key,
            })
    }
}
