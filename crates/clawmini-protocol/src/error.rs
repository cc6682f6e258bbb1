//! Error types for the assistant core.

use thiserror::Error;

/// Errors that can cross a port boundary.
///
/// Maintenance failures (`CompactionFailure`, `IndexBuildFailure`) are
/// recovered inside their subsystem; `TurnExecution` is the only kind a
/// client ever sees, and `ToolDenied` is handed back to the model as a tool
/// result.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("corrupt session snapshot for {session_id}: {reason}")]
    CorruptState { session_id: String, reason: String },
    #[error("compaction failed: {0}")]
    CompactionFailure(String),
    #[error("memory index build failed: {0}")]
    IndexBuildFailure(String),
    #[error("turn execution failed: {0}")]
    TurnExecution(String),
    #[error("tool denied: {0}")]
    ToolDenied(String),
    #[error("tool failed: {0}")]
    ToolFailure(String),
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Recoverable errors are the ones callers are expected to absorb.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CorruptState { .. }
                | Self::CompactionFailure(_)
                | Self::IndexBuildFailure(_)
                | Self::ToolDenied(_)
        )
    }
}

impl From<std::io::Error> for CoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
