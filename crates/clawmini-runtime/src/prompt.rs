//! System prompt assembly from the workspace markdown files and memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clawmini_memory::{DEFAULT_TOP_K, MemoryIndexManager};
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::skills::SkillsCatalog;

pub const DEFAULT_PROMPT_FILE_MAX_CHARS: usize = 20_000;
pub const TRUNCATION_MARKER: &str = "\n...[truncated]\n";

/// Workspace files in prompt order; `MEMORY` always comes last.
pub const WORKSPACE_SECTIONS: [&str; 4] = ["SOUL", "IDENTITY", "USER", "AGENTS"];

/// Source of the system prompt for one turn.
#[async_trait]
pub trait SystemPrompt: Send + Sync {
    /// Never fails; unreadable parts are skipped.
    async fn system_prompt(&self, query: &str) -> String;
}

fn truncate_chars(content: String, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &content[..cut]),
        None => content,
    }
}

fn section(name: &str, content: &str) -> Option<String> {
    if content.trim().is_empty() {
        return None;
    }
    Some(format!("<!-- BEGIN {name} -->\n{content}\n<!-- END {name} -->"))
}

pub struct PromptAssembler {
    skills: SkillsCatalog,
    workspace_dir: PathBuf,
    memory: Arc<MemoryIndexManager>,
    max_chars: usize,
    memory_top_k: usize,
    refresh_skills: bool,
}

impl PromptAssembler {
    pub fn new(
        skills_dir: impl Into<PathBuf>,
        workspace_dir: impl Into<PathBuf>,
        memory: Arc<MemoryIndexManager>,
    ) -> Self {
        Self {
            skills: SkillsCatalog::new(skills_dir),
            workspace_dir: workspace_dir.into(),
            memory,
            max_chars: DEFAULT_PROMPT_FILE_MAX_CHARS,
            memory_top_k: DEFAULT_TOP_K,
            refresh_skills: true,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn with_memory_top_k(mut self, top_k: usize) -> Self {
        self.memory_top_k = top_k.max(1);
        self
    }

    /// Whether to rescan skill directories before every build.
    pub fn with_skill_refresh(mut self, enabled: bool) -> Self {
        self.refresh_skills = enabled;
        self
    }

    async fn read_truncated(&self, name: &str, path: &Path) -> String {
        match fs::read_to_string(path).await {
            Ok(content) => truncate_chars(content, self.max_chars),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(error) => {
                warn!(section = name, %error, "prompt file unreadable");
                format!("Error reading {name}: {error}\n")
            }
        }
    }

    async fn memory_section(&self, query: &str) -> String {
        if !query.trim().is_empty() {
            return self.memory.query(query, self.memory_top_k).await;
        }
        match self.memory.document().read().await {
            Ok(Some(content)) => truncate_chars(content, self.max_chars),
            Ok(None) => String::new(),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "memory document unreadable");
                String::new()
            }
        }
    }

    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn build(&self, query: &str) -> String {
        if self.refresh_skills
            && let Err(error) = self.skills.refresh().await
        {
            warn!(error = %format!("{error:#}"), "skills snapshot refresh failed");
        }

        let mut parts = Vec::new();
        let snapshot = self.read_truncated("SKILLS_SNAPSHOT", &self.skills.snapshot_path()).await;
        parts.extend(section("SKILLS_SNAPSHOT", &snapshot));
        for name in WORKSPACE_SECTIONS {
            let path = self.workspace_dir.join(format!("{name}.md"));
            let content = self.read_truncated(name, &path).await;
            parts.extend(section(name, &content));
        }
        let memory = self.memory_section(query).await;
        parts.extend(section("MEMORY", &memory));

        debug!(sections = parts.len(), "system prompt assembled");
        parts.join("\n\n")
    }
}

#[async_trait]
impl SystemPrompt for PromptAssembler {
    async fn system_prompt(&self, query: &str) -> String {
        self.build(query).await
    }
}

#[async_trait]
impl SystemPrompt for String {
    async fn system_prompt(&self, _query: &str) -> String {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use clawmini_memory::MemoryDocument;
    use clawmini_protocol::{CoreResult, EmbeddingProvider};

    use super::*;
    use crate::skills::SNAPSHOT_FILE;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    struct TeaEmbedder;

    #[async_trait]
    impl EmbeddingProvider for TeaEmbedder {
        async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
            let tea = if text.contains("tea") { 1.0 } else { 0.0 };
            Ok(vec![tea, 1.0 - tea])
        }

        fn model_name(&self) -> &str {
            "tea"
        }
    }

    fn assembler(root: &Path) -> PromptAssembler {
        let memory = Arc::new(MemoryIndexManager::new(
            MemoryDocument::new(root.join("memory").join("MEMORY.md")),
            root.join("sessions").join("memory_index").join("index.json"),
            Arc::new(TeaEmbedder),
        ));
        PromptAssembler::new(root.join("skills"), root.join("workspace"), memory)
            .with_skill_refresh(false)
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo".into(), 10), "héllo");
        assert_eq!(truncate_chars("héllo".into(), 2), format!("hé{TRUNCATION_MARKER}"));
    }

    #[tokio::test]
    async fn sections_follow_fixed_order_and_skip_blank_files() -> Result<()> {
        let root = unique_test_root("clawmini-prompt-order");
        fs::create_dir_all(root.join("workspace")).await?;
        fs::create_dir_all(root.join("skills")).await?;
        fs::write(root.join("workspace").join("AGENTS.md"), "agents rules").await?;
        fs::write(root.join("workspace").join("SOUL.md"), "be kind").await?;
        fs::write(root.join("workspace").join("USER.md"), "   \n").await?;
        fs::write(root.join("skills").join(SNAPSHOT_FILE), "<available_skills/>").await?;

        let prompt = assembler(&root).build("").await;

        assert_eq!(
            prompt,
            "<!-- BEGIN SKILLS_SNAPSHOT -->\n<available_skills/>\n<!-- END SKILLS_SNAPSHOT -->\n\n\
             <!-- BEGIN SOUL -->\nbe kind\n<!-- END SOUL -->\n\n\
             <!-- BEGIN AGENTS -->\nagents rules\n<!-- END AGENTS -->"
        );
        Ok(())
    }

    #[tokio::test]
    async fn long_files_are_truncated_with_marker() -> Result<()> {
        let root = unique_test_root("clawmini-prompt-truncate");
        fs::create_dir_all(root.join("workspace")).await?;
        fs::write(root.join("workspace").join("IDENTITY.md"), "x".repeat(50)).await?;

        let prompt = assembler(&root).with_max_chars(10).build("").await;
        assert!(prompt.contains(&format!("{}{TRUNCATION_MARKER}", "x".repeat(10))));
        Ok(())
    }

    #[tokio::test]
    async fn memory_uses_retrieval_for_queries_and_raw_text_otherwise() -> Result<()> {
        let root = unique_test_root("clawmini-prompt-memory");
        let prompt = assembler(&root);
        prompt.memory.document().append_fact("User drinks green tea").await?;

        let raw = prompt.build("").await;
        assert!(raw.contains("<!-- BEGIN MEMORY -->\n# Long-term Memory"));

        let queried = prompt.build("which tea?").await;
        assert!(queried.contains("green tea"));
        assert!(queried.ends_with("<!-- END MEMORY -->"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_workspace_gives_empty_prompt() -> Result<()> {
        let root = unique_test_root("clawmini-prompt-empty");
        assert_eq!(assembler(&root).build("hello").await, "");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_writes_skills_snapshot_before_build() -> Result<()> {
        let root = unique_test_root("clawmini-prompt-skills");
        let prompt = assembler(&root).with_skill_refresh(true).build("").await;
        assert!(prompt.starts_with("<!-- BEGIN SKILLS_SNAPSHOT -->\n### SYSTEM DIRECTIVE"));
        Ok(())
    }
}
