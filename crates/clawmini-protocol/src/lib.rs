//! # clawmini-protocol: shared contract for the assistant core
//!
//! This crate defines the message model, turn/execution event taxonomy, error
//! taxonomy, and the capability ports that the session store, memory index,
//! runtime, and provider crates all depend on.
//!
//! It is intentionally dependency-light (no tokio, no HTTP client, no
//! filesystem access) so it can be used as a pure contract crate.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (SessionId, RunId)
//! - [`message`]: Message (tagged by role), ToolCall, summary markers
//! - [`event`]: ExecutionEvent (provider side) and TurnEvent (client side)
//! - [`ports`]: Generation, embedding, and tool-set capabilities
//! - [`error`]: CoreError, CoreResult

pub mod error;
pub mod event;
pub mod ids;
pub mod message;
pub mod ports;

// Re-export the most commonly used types at the crate root.
pub use error::{CoreError, CoreResult};
pub use event::{ExecutionEvent, THOUGHT_PREFIX, TurnEvent};
pub use ids::{RunId, SessionId};
pub use message::{Message, SUMMARY_MARKER, ToolCall};
pub use ports::{
    EmbeddingProvider, ExecutionRequest, ExecutionStream, GenerationProvider, ToolDefinition,
    ToolSet,
};
