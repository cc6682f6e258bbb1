//! Tools over the long-term memory document.

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use clawmini_memory::{DEFAULT_TOP_K, MemoryIndexManager};
use clawmini_protocol::ToolDefinition;
use serde_json::{Value, json};

use crate::{Tool, required_str};

pub struct AddMemoryTool {
    memory: Arc<MemoryIndexManager>,
}

impl AddMemoryTool {
    pub fn new(memory: Arc<MemoryIndexManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for AddMemoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "add_memory".to_owned(),
            description: "Append a fact worth remembering across sessions to long-term memory"
                .to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "memory_content": { "type": "string", "description": "The fact to store" }
                },
                "required": ["memory_content"]
            }),
        }
    }

    async fn call(&self, input: &Value) -> Result<String> {
        let fact = required_str(input, "memory_content", "add_memory")?.trim();
        if fact.is_empty() {
            bail!("add_memory requires non-empty memory_content");
        }
        self.memory.document().append_fact(fact).await?;
        Ok(format!(
            "Successfully added memory: '{fact}' to long-term storage."
        ))
    }
}

pub struct SearchMemoryTool {
    memory: Arc<MemoryIndexManager>,
    top_k: usize,
}

impl SearchMemoryTool {
    pub fn new(memory: Arc<MemoryIndexManager>) -> Self {
        Self {
            memory,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }
}

#[async_trait]
impl Tool for SearchMemoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_memory".to_owned(),
            description: "Search long-term memory for passages relevant to a query".to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What to look for" }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, input: &Value) -> Result<String> {
        let query = required_str(input, "query", "search_memory")?;
        let found = self.memory.query(query, self.top_k).await;
        if found.trim().is_empty() {
            return Ok("No relevant memory found.".to_owned());
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use clawmini_memory::MemoryDocument;
    use clawmini_protocol::{CoreResult, EmbeddingProvider};

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    /// One dimension per known word.
    struct WordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for WordEmbedder {
        async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
            let text = text.to_lowercase();
            Ok(["tea", "rust", "lisbon"]
                .iter()
                .map(|word| if text.contains(word) { 1.0 } else { 0.0 })
                .collect())
        }

        fn model_name(&self) -> &str {
            "words"
        }
    }

    fn manager(name: &str) -> Arc<MemoryIndexManager> {
        let root = unique_test_root(name);
        Arc::new(MemoryIndexManager::new(
            MemoryDocument::new(root.join("memory").join("MEMORY.md")),
            root.join("index.json"),
            Arc::new(WordEmbedder),
        ))
    }

    #[tokio::test]
    async fn added_fact_is_searchable() -> Result<()> {
        let memory = manager("clawmini-tools-memory");
        let add = AddMemoryTool::new(memory.clone());
        let search = SearchMemoryTool::new(memory.clone()).with_top_k(1);

        let reply = add
            .call(&json!({ "memory_content": "User prefers green tea" }))
            .await?;
        assert!(reply.contains("User prefers green tea"));

        let found = search.call(&json!({ "query": "what tea?" })).await?;
        assert!(found.contains("green tea"));
        Ok(())
    }

    #[tokio::test]
    async fn search_without_document_reports_nothing() -> Result<()> {
        let search = SearchMemoryTool::new(manager("clawmini-tools-empty"));
        let found = search.call(&json!({ "query": "rust" })).await?;
        assert_eq!(found, "No relevant memory found.");
        Ok(())
    }

    #[tokio::test]
    async fn blank_fact_is_rejected() -> Result<()> {
        let add = AddMemoryTool::new(manager("clawmini-tools-blank"));
        assert!(add.call(&json!({ "memory_content": "  " })).await.is_err());
        Ok(())
    }
}
