//! Generation and embedding providers for clawmini.
//!
//! - [`chat`]: one streamed model step and tool-call assembly
//! - [`openai`]: OpenAI-compatible HTTP chat client
//! - [`agent`]: the tool-calling loop that implements `GenerationProvider`
//! - [`embedding`]: HTTP and offline embedders
//! - [`factory`]: backend enums and the startup factory

pub mod agent;
pub mod chat;
pub mod embedding;
pub mod factory;
pub mod openai;

pub use agent::{DEFAULT_MAX_STEPS, ReactAgent};
pub use chat::{ChatDelta, ChatModel, ChatRequest, ChatStream, ToolCallAccumulator};
pub use embedding::{HashEmbedder, OpenAiEmbeddingClient};
pub use factory::{
    EmbeddingBackend, EmbeddingConfig, GenerationBackend, GenerationConfig, ProviderFactory,
};
pub use openai::{OpenAiChatClient, SseDecoder};
