//! Language-model backend contract.
//!
//! A backend turns one request into a lazy, finite stream of generation
//! events. The dialogue engine may drop the stream at any point; backends
//! must release their connection when that happens.

use crate::error::ModelError;
use crate::tools::ToolSpec;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A model-requested action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    pub call_id: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value, call_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments,
            call_id: call_id.into(),
        }
    }
}

/// One step of a generation.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    TextDelta(String),
    ToolCall(ToolCall),
    Done,
}

/// A message in the model's context window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ContextMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

impl ContextMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ContextMessage::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ContextMessage::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub messages: Vec<ContextMessage>,
    pub tools: Vec<ToolSpec>,
}

pub type GenerationStream = BoxStream<'static, Result<GenerationEvent, ModelError>>;

/// Language-model backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Start a generation. Errors that occur before the first event (bad
    /// status, unreachable host) are returned here; later ones arrive on the
    /// stream, which ends after the first error.
    async fn stream(&self, request: ModelRequest) -> Result<GenerationStream, ModelError>;
}
