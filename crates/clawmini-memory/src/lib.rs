//! Retrieval over the long-term memory document.
//!
//! The index is a disposable cache: a JSON file of `(chunk, sha256, vector)`
//! rows plus the time the build started. It is trusted only while that time
//! is not older than the document's modification time.

pub mod chunker;
pub mod document;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clawmini_protocol::{CoreError, EmbeddingProvider};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

pub use chunker::TextChunker;
pub use document::MemoryDocument;

pub const DEFAULT_TOP_K: usize = 3;
/// Bound for raw-document excerpts (empty query and fallback paths).
pub const PREFIX_CHARS: usize = 1000;
pub const EMPTY_MEMORY_PLACEHOLDER: &str = "[Empty Memory]";
pub const RESULT_SEPARATOR: &str = "\n\n...\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub text: String,
    pub sha256: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryIndex {
    pub built_at: DateTime<Utc>,
    pub embedding_model: String,
    pub chunks: Vec<IndexedChunk>,
}

impl MemoryIndex {
    pub fn is_fresh_for(&self, document_modified: DateTime<Utc>) -> bool {
        self.built_at >= document_modified
    }

    /// Chunk texts ranked by cosine similarity to `query`, best first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<String> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .map(|chunk| (cosine_similarity(query, &chunk.embedding), chunk))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(_, chunk)| chunk.text.clone())
            .collect()
    }
}

/// What a memory lookup produced, with the degraded path made explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryRecall {
    /// Top-k chunks from a fresh index.
    Ranked(Vec<String>),
    /// Empty query: the bounded document prefix.
    Prefix(String),
    /// Index could not be built or queried; raw document prefix instead.
    Degraded { excerpt: String, reason: String },
    /// Neither a document nor an index exists.
    NoIndex,
}

impl MemoryRecall {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Ranked(chunks) => chunks.join(RESULT_SEPARATOR),
            Self::Prefix(text) | Self::Degraded { excerpt: text, .. } => text,
            Self::NoIndex => String::new(),
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub struct MemoryIndexManager {
    document: MemoryDocument,
    index_path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: TextChunker,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl MemoryIndexManager {
    pub fn new(
        document: MemoryDocument,
        index_path: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            document,
            index_path: index_path.into(),
            embedder,
            chunker: TextChunker::default(),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn document(&self) -> &MemoryDocument {
        &self.document
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Relevant excerpts for `text` as one string. Never fails.
    pub async fn query(&self, text: &str, k: usize) -> String {
        self.recall(text, k).await.into_text()
    }

    #[instrument(skip(self, text), fields(query_len = text.len(), k))]
    pub async fn recall(&self, text: &str, k: usize) -> MemoryRecall {
        if text.trim().is_empty() {
            return MemoryRecall::Prefix(self.document.prefix(PREFIX_CHARS).await);
        }

        match self.ranked(text, k).await {
            Ok(Some(chunks)) => {
                debug!(hits = chunks.len(), "memory recall ranked");
                MemoryRecall::Ranked(chunks)
            }
            Ok(None) => MemoryRecall::NoIndex,
            Err(error) => {
                let reason = format!("{error:#}");
                warn!(%reason, "memory index unavailable, using raw document prefix");
                MemoryRecall::Degraded {
                    excerpt: self.document.prefix(PREFIX_CHARS).await,
                    reason,
                }
            }
        }
    }

    async fn ranked(&self, text: &str, k: usize) -> Result<Option<Vec<String>>> {
        let Some(index) = self.fresh_index().await? else {
            return Ok(None);
        };
        let vector = self
            .embedder
            .embed(text)
            .await
            .context("failed embedding memory query")?;
        Ok(Some(index.nearest(&vector, k)))
    }

    /// A trustworthy index, rebuilding it first when stale.
    pub async fn fresh_index(&self) -> Result<Option<MemoryIndex>> {
        if let Some(index) = self.current_index().await {
            return Ok(Some(index));
        }

        let _guard = self.rebuild_lock.lock().await;
        // Another query may have rebuilt while we waited.
        if let Some(index) = self.current_index().await {
            return Ok(Some(index));
        }
        self.rebuild()
            .await
            .map_err(|error| anyhow!(CoreError::IndexBuildFailure(format!("{error:#}"))))
    }

    /// The persisted index if it can be used as is.
    async fn current_index(&self) -> Option<MemoryIndex> {
        let index = self.load_index().await?;
        let model = self.embedder.model_name();
        if index.embedding_model != model {
            debug!(
                built_with = %index.embedding_model,
                %model,
                "memory index built by another model"
            );
            return None;
        }
        match self.document.modified_at().await {
            Some(modified) if !index.is_fresh_for(modified) => {
                debug!(built_at = %index.built_at, %modified, "memory index is stale");
                None
            }
            // No document means nothing newer than the index exists.
            _ => Some(index),
        }
    }

    async fn load_index(&self) -> Option<MemoryIndex> {
        if !fs::try_exists(&self.index_path).await.unwrap_or(false) {
            return None;
        }
        let raw = match fs::read_to_string(&self.index_path).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "memory index unreadable, treating as stale");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(index) => Some(index),
            Err(error) => {
                warn!(%error, "memory index corrupt, treating as stale");
                None
            }
        }
    }

    #[instrument(skip(self), fields(index = ?self.index_path))]
    async fn rebuild(&self) -> Result<Option<MemoryIndex>> {
        let started = Utc::now();
        let Some(content) = self.document.read().await? else {
            debug!("no memory document, skipping index build");
            return Ok(None);
        };

        let mut texts = self.chunker.split(&content);
        if texts.is_empty() {
            texts.push(EMPTY_MEMORY_PLACEHOLDER.to_owned());
        }

        let model = self.embedder.model_name().to_owned();
        let reusable: HashMap<String, Vec<f32>> = match self.load_index().await {
            Some(previous) if previous.embedding_model == model => previous
                .chunks
                .into_iter()
                .map(|chunk| (chunk.sha256, chunk.embedding))
                .collect(),
            _ => HashMap::new(),
        };

        let mut chunks = Vec::with_capacity(texts.len());
        let mut embedded = 0_usize;
        for text in texts {
            let sha256 = sha256_hex(&text);
            let embedding = match reusable.get(&sha256) {
                Some(vector) => vector.clone(),
                None => {
                    embedded += 1;
                    self.embedder
                        .embed(&text)
                        .await
                        .context("failed embedding memory chunk")?
                }
            };
            chunks.push(IndexedChunk {
                text,
                sha256,
                embedding,
            });
        }

        let index = MemoryIndex {
            built_at: started,
            embedding_model: model,
            chunks,
        };
        self.publish(&index).await?;
        info!(
            chunks = index.chunks.len(),
            embedded,
            reused = index.chunks.len() - embedded,
            "memory index rebuilt"
        );
        Ok(Some(index))
    }

    async fn publish(&self, index: &MemoryIndex) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create index dir {parent:?}"))?;
        }
        let payload = serde_json::to_vec(index).context("failed serializing memory index")?;
        let temp = self.index_path.with_extension("json.tmp");
        fs::write(&temp, payload)
            .await
            .with_context(|| format!("failed writing memory index {temp:?}"))?;
        fs::rename(&temp, &self.index_path)
            .await
            .with_context(|| format!("failed publishing memory index {:?}", self.index_path))?;
        Ok(())
    }
}
