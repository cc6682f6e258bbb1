//! Deployment settings, fixed at startup.

use std::path::{Path, PathBuf};

use clawmini_memory::DEFAULT_TOP_K;
use clawmini_memory::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use clawmini_provider::{DEFAULT_MAX_STEPS, EmbeddingConfig, GenerationConfig};
use clawmini_runtime::DEFAULT_PROMPT_FILE_MAX_CHARS;
use clawmini_session::DEFAULT_MAX_MESSAGES;

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub max_messages: usize,
    pub memory_top_k: usize,
    pub memory_chunk_size: usize,
    pub memory_chunk_overlap: usize,
    pub prompt_file_max_chars: usize,
    pub max_agent_steps: usize,
    pub command_timeout_secs: u64,
    /// Skip the shell denylist. Only for trusted single-user setups.
    pub allow_dangerous_commands: bool,
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
}

impl Settings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_messages: DEFAULT_MAX_MESSAGES,
            memory_top_k: DEFAULT_TOP_K,
            memory_chunk_size: DEFAULT_CHUNK_SIZE,
            memory_chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            prompt_file_max_chars: DEFAULT_PROMPT_FILE_MAX_CHARS,
            max_agent_steps: DEFAULT_MAX_STEPS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            allow_dangerous_commands: false,
            generation: GenerationConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_memory_top_k(mut self, top_k: usize) -> Self {
        self.memory_top_k = top_k;
        self
    }

    pub fn with_memory_chunking(mut self, chunk_size: usize, overlap: usize) -> Self {
        self.memory_chunk_size = chunk_size;
        self.memory_chunk_overlap = overlap;
        self
    }

    pub fn with_prompt_file_max_chars(mut self, max_chars: usize) -> Self {
        self.prompt_file_max_chars = max_chars;
        self
    }

    pub fn with_max_agent_steps(mut self, max_steps: usize) -> Self {
        self.max_agent_steps = max_steps;
        self
    }

    pub fn with_command_timeout_secs(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    pub fn with_dangerous_commands(mut self, allowed: bool) -> Self {
        self.allow_dangerous_commands = allowed;
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn memory_index_path(&self) -> PathBuf {
        self.sessions_dir().join("memory_index").join("index.json")
    }

    pub fn memory_document_path(&self) -> PathBuf {
        self.root.join("memory").join("MEMORY.md")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.root.join("skills")
    }
}
