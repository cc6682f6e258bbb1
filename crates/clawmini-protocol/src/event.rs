//! Event taxonomy for one generation turn.
//!
//! [`ExecutionEvent`] is what a generation provider produces while it runs.
//! [`TurnEvent`] is what the client sees. The runtime maps one onto the other.

use serde::{Deserialize, Serialize};

use crate::ids::RunId;
use crate::message::Message;

/// Prefix that distinguishes tool-activity lines from answer tokens on the wire.
pub const THOUGHT_PREFIX: &str = "[THOUGHT]";

/// Lower-level events emitted by a generation provider during one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    TokenDelta {
        text: String,
    },
    ToolStarted {
        name: String,
    },
    ToolCompleted {
        name: String,
    },
    /// A chain finished. `parent` is `None` only for the outermost run, whose
    /// `messages` is the authoritative conversation log for the turn.
    Completion {
        messages: Vec<Message>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<RunId>,
    },
}

impl ExecutionEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::TokenDelta { text: text.into() }
    }

    pub fn tool_started(name: impl Into<String>) -> Self {
        Self::ToolStarted { name: name.into() }
    }

    pub fn tool_completed(name: impl Into<String>) -> Self {
        Self::ToolCompleted { name: name.into() }
    }

    pub fn top_level(messages: Vec<Message>) -> Self {
        Self::Completion {
            messages,
            parent: None,
        }
    }

    pub fn nested(messages: Vec<Message>, parent: RunId) -> Self {
        Self::Completion {
            messages,
            parent: Some(parent),
        }
    }

    pub fn is_top_level_completion(&self) -> bool {
        matches!(self, Self::Completion { parent: None, .. })
    }
}

/// Client-visible events of one turn, in production order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TurnEvent {
    TokenDelta(String),
    ToolInvoked(String),
    ToolCompleted(String),
    TurnError(String),
}

impl TurnEvent {
    /// Plain-text record sent on the output channel.
    pub fn wire_text(&self) -> String {
        match self {
            Self::TokenDelta(text) => text.clone(),
            Self::ToolInvoked(name) => format!("{THOUGHT_PREFIX} Calling tool: {name}..."),
            Self::ToolCompleted(name) => format!("{THOUGHT_PREFIX} Finished tool: {name}"),
            Self::TurnError(message) => format!("Error: {message}"),
        }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, Self::ToolInvoked(_) | Self::ToolCompleted(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnError(_))
    }
}
