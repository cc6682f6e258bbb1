//! One model step: the streaming chat capability the agent loop drives.

use async_trait::async_trait;
use clawmini_protocol::{CoreResult, Message, ToolCall, ToolDefinition};
use futures_util::stream::BoxStream;
use serde_json::Value;
use std::collections::BTreeMap;

pub type ChatStream = BoxStream<'static, CoreResult<ChatDelta>>;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Incremental output of one model step.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    Text(String),
    /// Fragment of a tool call; fields arrive piecemeal keyed by `index`.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model(&self) -> &str;

    async fn stream(&self, request: ChatRequest) -> CoreResult<ChatStream>;

    async fn complete(&self, prompt: &str) -> CoreResult<String>;
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Assembles streamed tool-call fragments into whole calls.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

impl ToolCallAccumulator {
    pub fn push(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id
            && !id.is_empty()
        {
            call.id = id;
        }
        if let Some(name) = name
            && !name.is_empty()
        {
            call.name = name;
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(&arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calls in index order. Arguments that are not valid JSON are kept as
    /// a string; a missing id is synthesized so results can still correlate.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| {
                let arguments = if call.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&call.arguments)
                        .unwrap_or(Value::String(call.arguments))
                };
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                ToolCall::new(id, call.name, arguments)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accumulator_joins_fragments_in_index_order() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(1, Some("b".into()), Some("read_file".into()), Some("{\"pa".into()));
        acc.push(0, Some("a".into()), Some("terminal".into()), Some("{\"command\":".into()));
        acc.push(1, None, None, Some("th\":\"x\"}".into()));
        acc.push(0, None, None, Some("\"ls\"}".into()));

        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "terminal");
        assert_eq!(calls[0].arguments, json!({ "command": "ls" }));
        assert_eq!(calls[1].id, "b");
        assert_eq!(calls[1].arguments, json!({ "path": "x" }));
    }

    #[test]
    fn accumulator_tolerates_bad_arguments_and_missing_id() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(0, None, Some("terminal".into()), Some("not json".into()));
        let calls = acc.finish();
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].arguments, Value::String("not json".into()));
    }
}
