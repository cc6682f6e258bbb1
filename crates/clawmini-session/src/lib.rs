//! Session message-log persistence.
//!
//! One JSON snapshot per session under the sessions directory. Every save
//! runs the [`HistoryCompactor`] first and replaces the snapshot wholesale.

pub mod compaction;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clawmini_protocol::{CoreError, CoreResult, Message, SessionId};
use parking_lot::Mutex;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

pub use compaction::{CompactionOutcome, DEFAULT_MAX_MESSAGES, HistoryCompactor};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Ordered log for `session_id`; empty when no snapshot exists.
    async fn load(&self, session_id: &SessionId) -> CoreResult<Vec<Message>>;

    /// Compact, then replace the snapshot.
    async fn save(
        &self,
        session_id: &SessionId,
        messages: Vec<Message>,
    ) -> CoreResult<CompactionOutcome>;

    /// Load, concatenate and save under the session's write lock.
    async fn append(
        &self,
        session_id: &SessionId,
        new_messages: Vec<Message>,
    ) -> CoreResult<CompactionOutcome>;

    /// Ids of every persisted session, sorted.
    async fn list(&self) -> CoreResult<Vec<SessionId>>;
}

pub struct FileSessionStore {
    sessions_dir: PathBuf,
    compactor: HistoryCompactor,
    write_locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileSessionStore {
    pub fn new(sessions_dir: impl Into<PathBuf>, compactor: HistoryCompactor) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            compactor,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn snapshot_path(&self, session_id: &SessionId) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    fn temp_path(&self, session_id: &SessionId) -> PathBuf {
        self.sessions_dir.join(format!(".{session_id}.json.tmp"))
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.write_locks.lock();
        guard
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn read_snapshot(&self, session_id: &SessionId) -> CoreResult<Vec<Message>> {
        session_id.validate()?;
        let path = self.snapshot_path(session_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&path).await?;
        serde_json::from_str(&raw).map_err(|error| CoreError::CorruptState {
            session_id: session_id.to_string(),
            reason: error.to_string(),
        })
    }

    async fn write_snapshot(&self, session_id: &SessionId, messages: &[Message]) -> Result<()> {
        fs::create_dir_all(&self.sessions_dir)
            .await
            .with_context(|| format!("failed to create sessions dir {:?}", self.sessions_dir))?;

        let payload =
            serde_json::to_vec_pretty(messages).context("failed serializing message log")?;
        let temp = self.temp_path(session_id);
        let target = self.snapshot_path(session_id);
        fs::write(&temp, payload)
            .await
            .with_context(|| format!("failed writing snapshot {temp:?}"))?;
        fs::rename(&temp, &target)
            .await
            .with_context(|| format!("failed publishing snapshot {target:?}"))?;
        Ok(())
    }

    async fn compact_and_write(
        &self,
        session_id: &SessionId,
        messages: Vec<Message>,
    ) -> CoreResult<CompactionOutcome> {
        let outcome = self.compactor.compact(messages).await;
        self.write_snapshot(session_id, outcome.messages())
            .await
            .map_err(|error| CoreError::Io(format!("{error:#}")))?;
        info!(
            outcome = outcome.label(),
            messages = outcome.messages().len(),
            "session saved"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn load(&self, session_id: &SessionId) -> CoreResult<Vec<Message>> {
        let messages = self.read_snapshot(session_id).await?;
        debug!(count = messages.len(), "session loaded");
        Ok(messages)
    }

    #[instrument(skip(self, messages), fields(session_id = %session_id, count = messages.len()))]
    async fn save(
        &self,
        session_id: &SessionId,
        messages: Vec<Message>,
    ) -> CoreResult<CompactionOutcome> {
        session_id.validate()?;
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.compact_and_write(session_id, messages).await
    }

    #[instrument(skip(self, new_messages), fields(session_id = %session_id, count = new_messages.len()))]
    async fn append(
        &self,
        session_id: &SessionId,
        new_messages: Vec<Message>,
    ) -> CoreResult<CompactionOutcome> {
        session_id.validate()?;
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut history = match self.read_snapshot(session_id).await {
            Ok(history) => history,
            Err(error @ CoreError::CorruptState { .. }) => {
                warn!(%error, "discarding unreadable snapshot");
                Vec::new()
            }
            Err(error) => return Err(error),
        };
        history.extend(new_messages);
        self.compact_and_write(session_id, history).await
    }

    #[instrument(skip(self))]
    async fn list(&self) -> CoreResult<Vec<SessionId>> {
        if !fs::try_exists(&self.sessions_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.sessions_dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(".json")
                && !stem.starts_with('.')
            {
                ids.push(SessionId::from(stem));
            }
        }
        ids.sort();
        debug!(count = ids.len(), "sessions listed");
        Ok(ids)
    }
}
