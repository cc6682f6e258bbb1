//! Assembles the clawmini assistant from [`Settings`].

pub mod cli;
pub mod settings;

use std::sync::Arc;

use anyhow::{Context, Result};
use clawmini_memory::{MemoryDocument, MemoryIndexManager, TextChunker};
use clawmini_protocol::{
    CoreResult, EmbeddingProvider, GenerationProvider, Message, SessionId, ToolSet,
};
use clawmini_provider::ProviderFactory;
use clawmini_runtime::{PromptAssembler, SkillsCatalog, TurnDriver, TurnEventStream};
use clawmini_session::{FileSessionStore, HistoryCompactor, SessionStore};
use clawmini_tools::{
    CommandLimits, CommandPolicy, CoreToolsConfig, ToolRegistry, read_rooted, write_rooted,
};
use tokio::fs;
use tracing::{info, instrument, warn};

pub use cli::SettingsArgs;
pub use settings::{DEFAULT_COMMAND_TIMEOUT_SECS, Settings};

pub const SKILL_FILE_NAME: &str = "SKILL.md";

pub struct KernelBuilder {
    settings: Settings,
    generation: Option<Arc<dyn GenerationProvider>>,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
}

impl KernelBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            generation: None,
            embedding: None,
        }
    }

    /// Use `provider` instead of the configured backend.
    pub fn generation_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.generation = Some(provider);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding = Some(provider);
        self
    }

    pub fn build(self) -> Result<AssistantKernel> {
        let settings = self.settings;

        let generation = self.generation.unwrap_or_else(|| {
            let mut config = settings.generation.clone();
            config.max_steps = settings.max_agent_steps;
            ProviderFactory::generation(&config)
        });
        let embedding = self
            .embedding
            .unwrap_or_else(|| ProviderFactory::embedding(&settings.embedding));

        let compactor =
            HistoryCompactor::new(generation.clone()).with_max_messages(settings.max_messages);
        let store: Arc<dyn SessionStore> =
            Arc::new(FileSessionStore::new(settings.sessions_dir(), compactor));

        let memory = Arc::new(
            MemoryIndexManager::new(
                MemoryDocument::new(settings.memory_document_path()),
                settings.memory_index_path(),
                embedding,
            )
            .with_chunker(TextChunker::new(
                settings.memory_chunk_size,
                settings.memory_chunk_overlap,
            )),
        );

        let policy = if settings.allow_dangerous_commands {
            warn!("shell command denylist disabled");
            CommandPolicy::permissive()
        } else {
            CommandPolicy::standard().context("failed compiling command policy")?
        };
        let mut tools_config = CoreToolsConfig::new(settings.root.clone(), policy, memory.clone());
        tools_config.limits = CommandLimits {
            max_runtime_secs: settings.command_timeout_secs,
            ..CommandLimits::default()
        };
        tools_config.memory_top_k = settings.memory_top_k;
        let tools: Arc<dyn ToolSet> = Arc::new(ToolRegistry::with_core_tools(tools_config));

        let prompt = Arc::new(
            PromptAssembler::new(settings.skills_dir(), settings.workspace_dir(), memory.clone())
                .with_max_chars(settings.prompt_file_max_chars)
                .with_memory_top_k(settings.memory_top_k),
        );

        let turns = TurnDriver::new(store.clone(), generation, tools.clone(), prompt.clone());
        info!(root = %settings.root.display(), "assistant kernel built");

        Ok(AssistantKernel {
            settings: Arc::new(settings),
            store,
            memory,
            tools,
            prompt,
            turns,
        })
    }
}

#[derive(Clone)]
pub struct AssistantKernel {
    settings: Arc<Settings>,
    store: Arc<dyn SessionStore>,
    memory: Arc<MemoryIndexManager>,
    tools: Arc<dyn ToolSet>,
    prompt: Arc<PromptAssembler>,
    turns: TurnDriver,
}

impl AssistantKernel {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn memory(&self) -> &Arc<MemoryIndexManager> {
        &self.memory
    }

    pub fn tools(&self) -> &Arc<dyn ToolSet> {
        &self.tools
    }

    /// Create the directories of the on-disk layout.
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.settings.sessions_dir(),
            self.settings.workspace_dir(),
            self.settings.skills_dir(),
        ] {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed creating {dir:?}"))?;
        }
        if let Some(parent) = self.settings.memory_document_path().parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed creating {parent:?}"))?;
        }
        Ok(())
    }

    /// Run one turn. An invalid session id is rejected before anything starts.
    #[instrument(skip(self, message))]
    pub fn chat(
        &self,
        session_id: SessionId,
        message: impl Into<String>,
    ) -> CoreResult<TurnEventStream> {
        session_id.validate()?;
        Ok(self.turns.run_turn(session_id, message))
    }

    pub async fn history(&self, session_id: &SessionId) -> CoreResult<Vec<Message>> {
        self.store.load(session_id).await
    }

    pub async fn list_sessions(&self) -> CoreResult<Vec<SessionId>> {
        self.store.list().await
    }

    pub async fn system_prompt(&self, query: &str) -> String {
        self.prompt.build(query).await
    }

    /// Read a file relative to the root.
    pub async fn read_file(&self, path: &str) -> Result<String> {
        read_rooted(&self.settings.root, path).await
    }

    /// Write a file relative to the root. Saving a skill refreshes the
    /// skills snapshot.
    #[instrument(skip(self, content))]
    pub async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        write_rooted(&self.settings.root, path, content).await?;
        if path.ends_with(SKILL_FILE_NAME)
            && let Err(error) = SkillsCatalog::new(self.settings.skills_dir()).refresh().await
        {
            warn!(error = %format!("{error:#}"), "skill saved but snapshot refresh failed");
        }
        Ok(())
    }
}
