//! One conversational turn: provider events in, client events out, one save.

use std::sync::Arc;

use clawmini_protocol::{
    CoreError, ExecutionEvent, ExecutionRequest, GenerationProvider, Message, SessionId,
    ToolSet, TurnEvent,
};
use clawmini_session::SessionStore;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::{debug, error, info, warn};

use crate::prompt::SystemPrompt;

pub type TurnEventStream = BoxStream<'static, TurnEvent>;

#[derive(Clone)]
pub struct TurnDriver {
    store: Arc<dyn SessionStore>,
    generation: Arc<dyn GenerationProvider>,
    tools: Arc<dyn ToolSet>,
    prompt: Arc<dyn SystemPrompt>,
}

impl TurnDriver {
    pub fn new(
        store: Arc<dyn SessionStore>,
        generation: Arc<dyn GenerationProvider>,
        tools: Arc<dyn ToolSet>,
        prompt: Arc<dyn SystemPrompt>,
    ) -> Self {
        Self {
            store,
            generation,
            tools,
            prompt,
        }
    }

    /// Stream the turn's client events.
    ///
    /// Token deltas and tool markers are forwarded in provider order. The
    /// first top-level completion is held back and saved once the provider
    /// stream has ended cleanly. Any failure ends the stream with a single
    /// [`TurnEvent::TurnError`] and nothing is saved. Dropping the stream
    /// early also skips the save.
    pub fn run_turn(&self, session_id: SessionId, user_text: impl Into<String>) -> TurnEventStream {
        let driver = self.clone();
        let user_text = user_text.into();

        let stream = async_stream::stream! {
            info!(session_id = %session_id, "turn started");
            let mut history = match driver.store.load(&session_id).await {
                Ok(history) => history,
                Err(error @ CoreError::CorruptState { .. }) => {
                    warn!(session_id = %session_id, %error, "starting from empty history");
                    Vec::new()
                }
                Err(error) => {
                    warn!(session_id = %session_id, %error, "failed loading history");
                    yield TurnEvent::TurnError(error.to_string());
                    return;
                }
            };
            history.push(Message::user(user_text.clone()));

            let system_prompt = driver.prompt.system_prompt(&user_text).await;
            let request = ExecutionRequest {
                system_prompt,
                messages: history,
                tools: driver.tools.definitions(),
            };
            let mut events = match driver.generation.execute(request, driver.tools.clone()).await {
                Ok(events) => events,
                Err(error) => {
                    warn!(session_id = %session_id, %error, "provider refused the turn");
                    yield TurnEvent::TurnError(error.to_string());
                    return;
                }
            };

            let mut completed: Option<Vec<Message>> = None;
            while let Some(event) = events.next().await {
                match event {
                    Ok(ExecutionEvent::TokenDelta { text }) => {
                        if !text.is_empty() {
                            yield TurnEvent::TokenDelta(text);
                        }
                    }
                    Ok(ExecutionEvent::ToolStarted { name }) => {
                        yield TurnEvent::ToolInvoked(name);
                    }
                    Ok(ExecutionEvent::ToolCompleted { name }) => {
                        yield TurnEvent::ToolCompleted(name);
                    }
                    Ok(ExecutionEvent::Completion { messages, parent: None }) => {
                        if completed.is_none() {
                            completed = Some(messages);
                        } else {
                            debug!(session_id = %session_id, "ignoring extra top-level completion");
                        }
                    }
                    Ok(ExecutionEvent::Completion { .. }) => {}
                    Err(error) => {
                        warn!(session_id = %session_id, %error, "turn failed mid-stream");
                        yield TurnEvent::TurnError(error.to_string());
                        return;
                    }
                }
            }

            let Some(messages) = completed else {
                warn!(session_id = %session_id, "turn ended without a final log, nothing saved");
                return;
            };
            match driver.store.save(&session_id, messages).await {
                Ok(outcome) => {
                    info!(
                        session_id = %session_id,
                        outcome = outcome.label(),
                        messages = outcome.messages().len(),
                        "turn finished"
                    );
                }
                Err(error) => {
                    error!(session_id = %session_id, %error, "failed saving session");
                    yield TurnEvent::TurnError(error.to_string());
                }
            }
        };
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use clawmini_protocol::{CoreResult, ExecutionStream, RunId, ToolCall, ToolDefinition};
    use clawmini_session::CompactionOutcome;
    use futures_util::stream;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        sessions: Mutex<HashMap<SessionId, Vec<Message>>>,
        saves: Mutex<Vec<(SessionId, Vec<Message>)>>,
        corrupt: bool,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn load(&self, session_id: &SessionId) -> CoreResult<Vec<Message>> {
            if self.corrupt {
                return Err(CoreError::CorruptState {
                    session_id: session_id.to_string(),
                    reason: "expected value at line 1".into(),
                });
            }
            Ok(self
                .sessions
                .lock()
                .get(session_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn save(
            &self,
            session_id: &SessionId,
            messages: Vec<Message>,
        ) -> CoreResult<CompactionOutcome> {
            self.saves.lock().push((session_id.clone(), messages.clone()));
            self.sessions
                .lock()
                .insert(session_id.clone(), messages.clone());
            Ok(CompactionOutcome::Unchanged(messages))
        }

        async fn append(
            &self,
            session_id: &SessionId,
            new_messages: Vec<Message>,
        ) -> CoreResult<CompactionOutcome> {
            let mut history = self.load(session_id).await?;
            history.extend(new_messages);
            self.save(session_id, history).await
        }

        async fn list(&self) -> CoreResult<Vec<SessionId>> {
            Ok(self.sessions.lock().keys().cloned().collect())
        }
    }

    /// Replays a fixed event list and records what it was asked.
    struct ScriptedProvider {
        events: Mutex<Option<Vec<CoreResult<ExecutionEvent>>>>,
        refuse: bool,
        requests: Mutex<Vec<ExecutionRequest>>,
    }

    impl ScriptedProvider {
        fn new(events: Vec<CoreResult<ExecutionEvent>>) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Some(events)),
                refuse: false,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn refusing() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(None),
                refuse: true,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        async fn execute(
            &self,
            request: ExecutionRequest,
            _tools: Arc<dyn ToolSet>,
        ) -> CoreResult<ExecutionStream> {
            self.requests.lock().push(request);
            if self.refuse {
                return Err(CoreError::Provider("connection refused".into()));
            }
            let events = self.events.lock().take().unwrap_or_default();
            Ok(Box::pin(stream::iter(events)))
        }

        async fn complete(&self, _prompt: &str) -> CoreResult<String> {
            Ok(String::new())
        }
    }

    struct NoTools;

    #[async_trait]
    impl ToolSet for NoTools {
        fn definitions(&self) -> Vec<ToolDefinition> {
            Vec::new()
        }

        async fn invoke(&self, call: &ToolCall) -> CoreResult<String> {
            Err(CoreError::NotFound(call.name.clone()))
        }
    }

    fn driver(store: Arc<MemoryStore>, provider: Arc<ScriptedProvider>) -> TurnDriver {
        TurnDriver::new(
            store,
            provider,
            Arc::new(NoTools),
            Arc::new("You are clawmini.".to_owned()),
        )
    }

    fn session() -> SessionId {
        SessionId::from_string("main_session")
    }

    fn final_log() -> Vec<Message> {
        vec![
            Message::user("What's the weather?"),
            Message::assistant_with_tool_calls(
                "Let me check",
                vec![ToolCall::new("c1", "fetch", serde_json::json!({}))],
            ),
            Message::tool_result("c1", "fetch", "sunny"),
            Message::assistant("Found it."),
        ]
    }

    #[tokio::test]
    async fn events_keep_provider_order_and_save_once() -> anyhow::Result<()> {
        let run = RunId::new_uuid();
        let provider = ScriptedProvider::new(vec![
            Ok(ExecutionEvent::token("Let me check")),
            Ok(ExecutionEvent::tool_started("fetch")),
            Ok(ExecutionEvent::tool_completed("fetch")),
            Ok(ExecutionEvent::token("Found it.")),
            Ok(ExecutionEvent::nested(vec![Message::assistant("Found it.")], run)),
            Ok(ExecutionEvent::top_level(final_log())),
        ]);
        let store = Arc::new(MemoryStore::default());

        let events: Vec<TurnEvent> = driver(store.clone(), provider.clone())
            .run_turn(session(), "What's the weather?")
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                TurnEvent::TokenDelta("Let me check".into()),
                TurnEvent::ToolInvoked("fetch".into()),
                TurnEvent::ToolCompleted("fetch".into()),
                TurnEvent::TokenDelta("Found it.".into()),
            ]
        );
        let saves = store.saves.lock();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1, final_log());

        let requests = provider.requests.lock();
        assert_eq!(requests[0].system_prompt, "You are clawmini.");
        assert_eq!(requests[0].messages, vec![Message::user("What's the weather?")]);
        Ok(())
    }

    #[tokio::test]
    async fn tokens_between_tool_markers_keep_their_position() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new(vec![
            Ok(ExecutionEvent::tool_started("fetch")),
            Ok(ExecutionEvent::token("Look")),
            Ok(ExecutionEvent::token("ing up...")),
            Ok(ExecutionEvent::tool_completed("fetch")),
            Ok(ExecutionEvent::token("Found it.")),
            Ok(ExecutionEvent::top_level(final_log())),
        ]);
        let store = Arc::new(MemoryStore::default());

        let events: Vec<TurnEvent> = driver(store.clone(), provider)
            .run_turn(session(), "What's the weather?")
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                TurnEvent::ToolInvoked("fetch".into()),
                TurnEvent::TokenDelta("Look".into()),
                TurnEvent::TokenDelta("ing up...".into()),
                TurnEvent::ToolCompleted("fetch".into()),
                TurnEvent::TokenDelta("Found it.".into()),
            ]
        );
        assert_eq!(store.saves.lock().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn only_first_top_level_completion_is_saved() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new(vec![
            Ok(ExecutionEvent::top_level(final_log())),
            Ok(ExecutionEvent::top_level(vec![Message::user("late")])),
        ]);
        let store = Arc::new(MemoryStore::default());

        let events: Vec<TurnEvent> = driver(store.clone(), provider)
            .run_turn(session(), "What's the weather?")
            .collect()
            .await;

        assert!(events.is_empty());
        let saves = store.saves.lock();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1, final_log());
        Ok(())
    }

    #[tokio::test]
    async fn mid_stream_error_ends_turn_without_saving() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new(vec![
            Ok(ExecutionEvent::token("Working")),
            Err(CoreError::Provider("stream reset".into())),
            Ok(ExecutionEvent::top_level(final_log())),
        ]);
        let store = Arc::new(MemoryStore::default());

        let events: Vec<TurnEvent> = driver(store.clone(), provider)
            .run_turn(session(), "hi")
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], TurnEvent::TokenDelta("Working".into()));
        assert!(events[1].is_terminal());
        assert_eq!(events[1].wire_text(), "Error: provider error: stream reset");
        assert!(store.saves.lock().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn refused_execution_yields_single_error() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::default());
        let events: Vec<TurnEvent> = driver(store.clone(), ScriptedProvider::refusing())
            .run_turn(session(), "hi")
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        assert!(store.saves.lock().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn no_top_level_completion_means_no_save() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new(vec![
            Ok(ExecutionEvent::token("partial")),
            Ok(ExecutionEvent::nested(
                vec![Message::assistant("partial")],
                RunId::new_uuid(),
            )),
        ]);
        let store = Arc::new(MemoryStore::default());

        let events: Vec<TurnEvent> = driver(store.clone(), provider)
            .run_turn(session(), "hi")
            .collect()
            .await;

        assert_eq!(events, vec![TurnEvent::TokenDelta("partial".into())]);
        assert!(store.saves.lock().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_history_starts_fresh() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new(vec![Ok(ExecutionEvent::top_level(vec![
            Message::user("hi"),
            Message::assistant("hello"),
        ]))]);
        let store = Arc::new(MemoryStore {
            corrupt: true,
            ..MemoryStore::default()
        });

        let events: Vec<TurnEvent> = driver(store.clone(), provider.clone())
            .run_turn(session(), "hi")
            .collect()
            .await;

        assert!(events.is_empty());
        assert_eq!(
            provider.requests.lock()[0].messages,
            vec![Message::user("hi")]
        );
        assert_eq!(store.saves.lock().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn dropped_stream_saves_nothing() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new(vec![
            Ok(ExecutionEvent::token("first")),
            Ok(ExecutionEvent::top_level(final_log())),
        ]);
        let store = Arc::new(MemoryStore::default());

        let mut events = driver(store.clone(), provider).run_turn(session(), "hi");
        assert_eq!(events.next().await, Some(TurnEvent::TokenDelta("first".into())));
        drop(events);

        assert!(store.saves.lock().is_empty());
        Ok(())
    }
}
