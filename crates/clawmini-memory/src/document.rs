//! The long-term memory document (`MEMORY.md`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

const DOCUMENT_HEADER: &str = "# Long-term Memory (MEMORY)\n\n\
Core settings, important decisions, preferences and other history that spans \
sessions. This file is loaded as context for every conversation.\n\n---\n";

#[derive(Debug, Clone)]
pub struct MemoryDocument {
    path: PathBuf,
}

impl MemoryDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full text, or `None` when the document does not exist.
    pub async fn read(&self) -> Result<Option<String>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed reading memory document {:?}", self.path))?;
        Ok(Some(content))
    }

    /// First `max_chars` characters; empty when missing or unreadable.
    pub async fn prefix(&self, max_chars: usize) -> String {
        match self.read().await {
            Ok(Some(content)) => content.chars().take(max_chars).collect(),
            _ => String::new(),
        }
    }

    /// Last-modified time, `None` when the document does not exist.
    pub async fn modified_at(&self) -> Option<DateTime<Utc>> {
        let metadata = fs::metadata(&self.path).await.ok()?;
        metadata.modified().ok().map(DateTime::<Utc>::from)
    }

    /// Append one timestamped fact, creating the document with its header
    /// on first write.
    #[instrument(skip(self, fact), fields(path = ?self.path))]
    pub async fn append_fact(&self, fact: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create memory dir {parent:?}"))?;
        }
        let exists = fs::try_exists(&self.path).await.unwrap_or(false);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed opening memory document {:?}", self.path))?;
        if !exists {
            file.write_all(DOCUMENT_HEADER.as_bytes()).await?;
        }
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("\n- **[{stamp}]** {}\n", fact.trim());
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!("fact appended to memory document");
        Ok(())
    }
}
