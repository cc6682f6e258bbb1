//! Capability ports between the assistant core and external implementations.
//!
//! Object-safety note:
//! - Traits use `async-trait` for async dyn-dispatch.
//! - Streaming uses boxed trait objects (`ExecutionStream`).

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;
use crate::event::ExecutionEvent;
use crate::message::{Message, ToolCall};

pub type ExecutionStream = BoxStream<'static, CoreResult<ExecutionEvent>>;

/// Input for one generation execution.
///
/// The system prompt travels beside the history; it is never part of the
/// persisted log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// Function-calling schema advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Start an execution. Events arrive in production order; the outermost
    /// run ends with a top-level [`ExecutionEvent::Completion`].
    async fn execute(
        &self,
        request: ExecutionRequest,
        tools: Arc<dyn ToolSet>,
    ) -> CoreResult<ExecutionStream>;

    /// Single non-streaming completion, used for summaries.
    async fn complete(&self, prompt: &str) -> CoreResult<String>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>>;

    fn model_name(&self) -> &str;
}

#[async_trait]
pub trait ToolSet: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one tool call. `ToolDenied` means a policy refused it.
    async fn invoke(&self, call: &ToolCall) -> CoreResult<String>;
}
