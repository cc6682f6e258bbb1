//! Tool-calling agent loop behind [`GenerationProvider`].
//!
//! Each step streams one model response. Tool calls requested by the step
//! are run in order and their results appended before the next step. The
//! loop ends on a step without tool calls, with a top-level completion
//! carrying the whole log.

use std::sync::Arc;

use async_trait::async_trait;
use clawmini_protocol::{
    CoreError, CoreResult, ExecutionEvent, ExecutionRequest, ExecutionStream, GenerationProvider,
    Message, RunId, ToolSet,
};
use futures_util::StreamExt;
use tracing::{debug, instrument, warn};

use crate::chat::{ChatDelta, ChatModel, ChatRequest, ToolCallAccumulator};

pub const DEFAULT_MAX_STEPS: usize = 12;

pub struct ReactAgent {
    model: Arc<dyn ChatModel>,
    max_steps: usize,
}

impl ReactAgent {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }
}

#[async_trait]
impl GenerationProvider for ReactAgent {
    #[instrument(skip_all, fields(model = %self.model.model(), history = request.messages.len()))]
    async fn execute(
        &self,
        request: ExecutionRequest,
        tools: Arc<dyn ToolSet>,
    ) -> CoreResult<ExecutionStream> {
        let model = self.model.clone();
        let max_steps = self.max_steps;
        let run_id = RunId::new_uuid();

        let stream = async_stream::try_stream! {
            let ExecutionRequest { system_prompt, messages, tools: definitions } = request;
            let mut log = messages;

            for step in 0..max_steps {
                let mut deltas = model
                    .stream(ChatRequest {
                        system_prompt: system_prompt.clone(),
                        messages: log.clone(),
                        tools: definitions.clone(),
                    })
                    .await?;

                let mut text = String::new();
                let mut calls = ToolCallAccumulator::default();
                while let Some(delta) = deltas.next().await {
                    match delta? {
                        ChatDelta::Text(chunk) => {
                            text.push_str(&chunk);
                            yield ExecutionEvent::token(chunk);
                        }
                        ChatDelta::ToolCall { index, id, name, arguments } => {
                            calls.push(index, id, name, arguments);
                        }
                    }
                }

                let calls = calls.finish();
                let reply = Message::assistant_with_tool_calls(text, calls.clone());
                log.push(reply.clone());
                yield ExecutionEvent::nested(vec![reply], run_id.clone());

                if calls.is_empty() {
                    debug!(step, "agent finished");
                    yield ExecutionEvent::top_level(log);
                    return;
                }

                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    yield ExecutionEvent::tool_started(call.name.clone());
                    let output = match tools.invoke(&call).await {
                        Ok(output) => output,
                        Err(CoreError::ToolDenied(reason)) => {
                            warn!(tool = %call.name, %reason, "tool call denied");
                            format!("Denied: {reason}")
                        }
                        Err(error) => {
                            warn!(tool = %call.name, %error, "tool call failed");
                            format!("Error: {error}")
                        }
                    };
                    let result = Message::tool_result(call.id.clone(), call.name.clone(), output);
                    log.push(result.clone());
                    results.push(result);
                    yield ExecutionEvent::tool_completed(call.name);
                }
                yield ExecutionEvent::nested(results, run_id.clone());
            }

            Err::<(), _>(CoreError::TurnExecution(format!(
                "agent stopped after {max_steps} steps without a final answer"
            )))?;
        };
        Ok(Box::pin(stream))
    }

    async fn complete(&self, prompt: &str) -> CoreResult<String> {
        self.model.complete(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::chat::ChatStream;
    use clawmini_protocol::{ToolCall, ToolDefinition};
    use futures_util::stream;
    use parking_lot::Mutex;

    /// Replays one scripted list of deltas per step.
    struct ScriptedModel {
        steps: Mutex<VecDeque<Vec<ChatDelta>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl ScriptedModel {
        fn new(steps: Vec<Vec<ChatDelta>>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, request: ChatRequest) -> CoreResult<ChatStream> {
            self.seen.lock().push(request.messages.len());
            let step = self
                .steps
                .lock()
                .pop_front()
                .ok_or_else(|| CoreError::Provider("script exhausted".into()))?;
            Ok(Box::pin(stream::iter(step.into_iter().map(Ok))))
        }

        async fn complete(&self, _prompt: &str) -> CoreResult<String> {
            Ok("summary".into())
        }
    }

    struct EchoTools;

    #[async_trait]
    impl ToolSet for EchoTools {
        fn definitions(&self) -> Vec<ToolDefinition> {
            Vec::new()
        }

        async fn invoke(&self, call: &ToolCall) -> CoreResult<String> {
            match call.name.as_str() {
                "terminal" => Err(CoreError::ToolDenied("rm -rf is blocked".into())),
                _ => Ok(format!("echo {}", call.arguments)),
            }
        }
    }

    fn tool_delta(index: usize, id: &str, name: &str, arguments: &str) -> ChatDelta {
        ChatDelta::ToolCall {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: Some(arguments.into()),
        }
    }

    async fn run(agent: &ReactAgent, history: Vec<Message>) -> Vec<CoreResult<ExecutionEvent>> {
        let request = ExecutionRequest {
            system_prompt: "persona".into(),
            messages: history,
            tools: Vec::new(),
        };
        match agent.execute(request, Arc::new(EchoTools)).await {
            Ok(stream) => stream.collect().await,
            Err(error) => vec![Err(error)],
        }
    }

    #[tokio::test]
    async fn plain_answer_streams_tokens_then_top_level_completion() {
        let model = ScriptedModel::new(vec![vec![
            ChatDelta::Text("Hel".into()),
            ChatDelta::Text("lo".into()),
        ]]);
        let agent = ReactAgent::new(model);

        let events: Vec<ExecutionEvent> = run(&agent, vec![Message::user("hi")])
            .await
            .into_iter()
            .collect::<CoreResult<_>>()
            .unwrap();

        assert_eq!(events[0], ExecutionEvent::token("Hel"));
        assert_eq!(events[1], ExecutionEvent::token("lo"));
        assert!(matches!(events[2], ExecutionEvent::Completion { parent: Some(_), .. }));
        assert_eq!(
            events[3],
            ExecutionEvent::top_level(vec![Message::user("hi"), Message::assistant("Hello")])
        );
    }

    #[tokio::test]
    async fn tool_round_trip_is_bracketed_and_logged() {
        let model = ScriptedModel::new(vec![
            vec![tool_delta(0, "c1", "fetch", "{\"url\":\"x\"}")],
            vec![ChatDelta::Text("Found it.".into())],
        ]);
        let agent = ReactAgent::new(model.clone());

        let events: Vec<ExecutionEvent> = run(&agent, vec![Message::user("look up x")])
            .await
            .into_iter()
            .collect::<CoreResult<_>>()
            .unwrap();

        let started = events
            .iter()
            .position(|e| *e == ExecutionEvent::tool_started("fetch"))
            .unwrap();
        let completed = events
            .iter()
            .position(|e| *e == ExecutionEvent::tool_completed("fetch"))
            .unwrap();
        let answer = events
            .iter()
            .position(|e| *e == ExecutionEvent::token("Found it."))
            .unwrap();
        assert!(started < completed && completed < answer);

        let Some(ExecutionEvent::Completion { messages, parent: None }) = events.last() else {
            panic!("missing top-level completion");
        };
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].tool_call_id(), Some("c1"));
        assert_eq!(messages[2].content(), "echo {\"url\":\"x\"}");
        // Second step saw the tool result.
        assert_eq!(*model.seen.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn denied_tool_becomes_tool_result_text() {
        let model = ScriptedModel::new(vec![
            vec![tool_delta(0, "c1", "terminal", "{\"command\":\"rm -rf /\"}")],
            vec![ChatDelta::Text("I can't do that.".into())],
        ]);
        let agent = ReactAgent::new(model);

        let events = run(&agent, vec![Message::user("wipe disk")]).await;
        let Some(Ok(ExecutionEvent::Completion { messages, parent: None })) = events.last() else {
            panic!("missing top-level completion");
        };
        assert_eq!(messages[2].content(), "Denied: rm -rf is blocked");
    }

    #[tokio::test]
    async fn step_limit_ends_in_error() {
        let model = ScriptedModel::new(vec![
            vec![tool_delta(0, "c1", "fetch", "{}")],
            vec![tool_delta(0, "c2", "fetch", "{}")],
        ]);
        let agent = ReactAgent::new(model).with_max_steps(2);

        let events = run(&agent, vec![Message::user("loop")]).await;
        assert!(matches!(events.last(), Some(Err(CoreError::TurnExecution(_)))));
        assert!(!events.iter().any(|e| matches!(e, Ok(ev) if ev.is_top_level_completion())));
    }

    #[tokio::test]
    async fn model_failure_surfaces_as_stream_error() {
        let model = ScriptedModel::new(Vec::new());
        let agent = ReactAgent::new(model);
        let events = run(&agent, vec![Message::user("hi")]).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(CoreError::Provider(_))));
    }
}
