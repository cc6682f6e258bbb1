//! History compaction for session message logs.
//!
//! Only conversational messages (user, assistant, tool) count toward the
//! threshold. An older contiguous span is folded into a summary message; the
//! split point never separates a tool call from its result.

use std::collections::HashSet;
use std::sync::Arc;

use clawmini_protocol::{CoreError, CoreResult, GenerationProvider, Message};
use tracing::{debug, instrument, warn};

pub const DEFAULT_MAX_MESSAGES: usize = 40;
pub const TOOL_RESULT_PREVIEW_CHARS: usize = 200;

const SUMMARY_INSTRUCTION: &str = "Please summarize the following conversation history concisely. \
Preserve all key facts, constraints, user preferences, and important context. \
This summary will serve as memory for future interactions.";

/// What compaction did to a log.
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionOutcome {
    /// Below threshold; the input is returned verbatim.
    Unchanged(Vec<Message>),
    /// An older span was replaced by a summary message.
    Summarized {
        messages: Vec<Message>,
        compacted: usize,
    },
    /// Summarization failed; only the most recent entries were kept.
    Truncated {
        messages: Vec<Message>,
        reason: String,
    },
}

impl CompactionOutcome {
    pub fn messages(&self) -> &[Message] {
        match self {
            Self::Unchanged(messages)
            | Self::Summarized { messages, .. }
            | Self::Truncated { messages, .. } => messages,
        }
    }

    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Unchanged(messages)
            | Self::Summarized { messages, .. }
            | Self::Truncated { messages, .. } => messages,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged(_) => "unchanged",
            Self::Summarized { .. } => "summarized",
            Self::Truncated { .. } => "truncated",
        }
    }
}

/// Messages of a log split by kind, each group in original order.
#[derive(Debug, Default)]
struct PartitionedLog {
    system: Vec<Message>,
    summaries: Vec<Message>,
    conversational: Vec<Message>,
}

impl PartitionedLog {
    fn from_messages(messages: &[Message]) -> Self {
        let mut log = Self::default();
        for message in messages {
            if message.is_summary() {
                log.summaries.push(message.clone());
            } else if message.is_system() {
                log.system.push(message.clone());
            } else {
                log.conversational.push(message.clone());
            }
        }
        log
    }

    fn latest_summary(&self) -> Option<&str> {
        self.summaries.last().and_then(Message::summary_text)
    }
}

pub struct HistoryCompactor {
    summarizer: Arc<dyn GenerationProvider>,
    max_messages: usize,
}

impl HistoryCompactor {
    pub fn new(summarizer: Arc<dyn GenerationProvider>) -> Self {
        Self {
            summarizer,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Shrink `messages` if it holds more conversational entries than the
    /// threshold. Never fails: a summarizer error degrades to truncation.
    #[instrument(skip(self, messages), fields(total = messages.len(), max = self.max_messages))]
    pub async fn compact(&self, messages: Vec<Message>) -> CompactionOutcome {
        let log = PartitionedLog::from_messages(&messages);
        if log.conversational.len() <= self.max_messages {
            return CompactionOutcome::Unchanged(messages);
        }

        let split = find_split_index(&log.conversational);
        let (compacted, kept) = log.conversational.split_at(split);
        debug!(split, kept = kept.len(), "compacting older span");

        let transcript = format_transcript(log.latest_summary(), compacted);
        match self.summarize(&transcript).await {
            Ok(summary) => {
                let mut out = log.system.clone();
                out.push(Message::summary(summary));
                out.extend_from_slice(kept);
                CompactionOutcome::Summarized {
                    messages: out,
                    compacted: compacted.len(),
                }
            }
            Err(error) => {
                warn!(%error, "summarization failed, truncating history");
                CompactionOutcome::Truncated {
                    messages: truncate_tail(&messages, self.max_messages),
                    reason: error.to_string(),
                }
            }
        }
    }

    async fn summarize(&self, transcript: &str) -> CoreResult<String> {
        let prompt = format!("{SUMMARY_INSTRUCTION}\n\n{transcript}");
        let summary = self
            .summarizer
            .complete(&prompt)
            .await
            .map_err(|error| CoreError::CompactionFailure(error.to_string()))?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(CoreError::CompactionFailure(
                "summarizer returned empty text".to_owned(),
            ));
        }
        Ok(summary.to_owned())
    }
}

/// True when no tool result at or after `index` answers a call made before it.
fn is_clean_boundary(conversation: &[Message], index: usize) -> bool {
    let earlier_calls: HashSet<&str> = conversation[..index]
        .iter()
        .flat_map(|message| message.tool_calls().iter().map(|call| call.id.as_str()))
        .collect();
    if earlier_calls.is_empty() {
        return true;
    }
    conversation[index..]
        .iter()
        .filter_map(Message::tool_call_id)
        .all(|id| !earlier_calls.contains(id))
}

/// Pick where the kept tail starts.
///
/// Order of preference: the first clean user boundary at or after the
/// midpoint, the nearest clean user boundary before it, the first clean
/// boundary of any role after it, then the whole span.
fn find_split_index(conversation: &[Message]) -> usize {
    let len = conversation.len();
    let mid = (len / 2).max(1);

    let clean_user =
        |index: &usize| conversation[*index].is_user() && is_clean_boundary(conversation, *index);

    if let Some(index) = (mid..len).find(clean_user) {
        return index;
    }
    if let Some(index) = (1..mid).rev().find(clean_user) {
        return index;
    }
    (mid..len)
        .find(|index| is_clean_boundary(conversation, *index))
        .unwrap_or(len)
}

fn format_transcript(previous_summary: Option<&str>, messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len() + 1);
    if let Some(summary) = previous_summary {
        lines.push(format!("PREVIOUS SUMMARY: {summary}"));
    }
    for message in messages {
        match message {
            Message::User { content } => lines.push(format!("Human: {content}")),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                for call in tool_calls {
                    lines.push(format!("AI (tool call): {} {}", call.name, call.arguments));
                }
                if !content.is_empty() {
                    lines.push(format!("AI: {content}"));
                } else if tool_calls.is_empty() {
                    lines.push("AI: (Tool usage or complex content)".to_owned());
                }
            }
            Message::Tool { content, .. } => {
                let preview: String = content.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect();
                lines.push(format!("Tool Result: {preview}..."));
            }
            Message::System { .. } => {}
        }
    }
    lines.join("\n")
}

/// Keep the last `max_messages` entries, dropping tool results whose call
/// did not survive the cut.
fn truncate_tail(messages: &[Message], max_messages: usize) -> Vec<Message> {
    let start = messages.len().saturating_sub(max_messages);
    let tail = &messages[start..];
    let surviving_calls: HashSet<&str> = tail
        .iter()
        .flat_map(|message| message.tool_calls().iter().map(|call| call.id.as_str()))
        .collect();
    tail.iter()
        .filter(|message| {
            message
                .tool_call_id()
                .is_none_or(|id| surviving_calls.contains(id))
        })
        .cloned()
        .collect()
}
