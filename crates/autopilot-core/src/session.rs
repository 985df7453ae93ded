//! Per-call conversation state.

use crate::model::ToolCall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    Assistant,
    Tool,
}

/// One entry of the turn history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEntry {
    pub speaker: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Set on `Tool` entries: the call this entry is the result of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
}

impl TurnEntry {
    pub fn caller(content: impl Into<String>) -> Self {
        Self::new(Speaker::Caller, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, content)
    }

    pub fn tool(call: ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::new(Speaker::Tool, content)
        }
    }

    fn new(speaker: Speaker, content: impl Into<String>) -> Self {
        Self {
            speaker,
            content: content.into(),
            timestamp: Utc::now(),
            tool_call: None,
        }
    }
}

/// Where the turn controller is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Greeting,
    Listening,
    IdleWarning,
    Thinking,
    Speaking,
    Terminated,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        self == Phase::Terminated
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Greeting => "GREETING",
            Phase::Listening => "LISTENING",
            Phase::IdleWarning => "IDLE_WARNING",
            Phase::Thinking => "THINKING",
            Phase::Speaking => "SPEAKING",
            Phase::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// State owned by one call. Mutated only by the turn controller.
#[derive(Debug)]
pub struct ConversationSession {
    pub id: Uuid,
    pub history: Vec<TurnEntry>,
    pub phase: Phase,
    pub idle_count: u32,
    current_op: Option<CancellationToken>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            history: Vec::new(),
            phase: Phase::Greeting,
            idle_count: 0,
            current_op: None,
        }
    }

    /// Install a fresh token for the operation about to start, cancelling
    /// whatever the previous one guarded. Exactly one token is live at a time.
    pub fn arm_operation(&mut self) -> CancellationToken {
        self.cancel_operation();
        let token = CancellationToken::new();
        self.current_op = Some(token.clone());
        token
    }

    /// Cancel the outstanding operation, if any. Safe to call repeatedly.
    pub fn cancel_operation(&mut self) {
        if let Some(token) = self.current_op.take() {
            token.cancel();
        }
    }

    /// Forget the token of an operation that finished on its own.
    pub fn clear_operation(&mut self) {
        self.current_op = None;
    }

    pub fn has_operation(&self) -> bool {
        self.current_op.is_some()
    }

    pub fn push(&mut self, entry: TurnEntry) {
        self.history.push(entry);
    }

    /// Latest thing the caller said.
    pub fn last_caller_utterance(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|e| e.speaker == Speaker::Caller)
            .map(|e| e.content.as_str())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    /// The caller stayed silent through every idle warning
    IdleExhausted,
    /// A tool ended the call
    ToolRequested { tool: String },
    /// The media channel failed
    Fatal { message: String },
    /// The host called `stop`
    Stopped { reason: String },
    /// The caller or the channel went away first
    ChannelClosed,
}

/// Final state of a session, returned once the channel is released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub reason: TerminationReason,
    pub idle_count: u32,
    pub history: Vec<TurnEntry>,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}
