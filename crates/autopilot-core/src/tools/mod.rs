//! Tools the model can call during a turn.
//!
//! A tool is a named handler behind one invoke contract. The registry looks
//! handlers up by name, turns every failure (including an unknown name) into
//! an error result the model can read, and remembers results per session and
//! call id so a replayed call never runs twice.

mod hangup;

use crate::error::ToolError;
use crate::model::ToolCall;
use async_trait::async_trait;
use autopilot_voice::VoiceIo;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use hangup::HangupTool;

/// Declaration of a tool as the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Request to end the call after this tool ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnd {
    /// Spoken before the channel is released
    pub closing_message: Option<String>,
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub end_session: Option<SessionEnd>,
}

impl ToolOutcome {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            end_session: None,
        }
    }

    pub fn end_session(content: impl Into<String>, closing_message: Option<String>) -> Self {
        Self {
            content: content.into(),
            end_session: Some(SessionEnd { closing_message }),
        }
    }
}

/// Live call handles a handler may act on.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: Uuid,
    pub voice: Arc<dyn VoiceIo>,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Run the tool. Must tolerate being called again with the same
    /// arguments; the registry normally absorbs repeats by call id.
    async fn invoke(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolOutcome, ToolError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Content(String),
    Error(String),
}

/// Result correlated with the call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub output: ToolOutput,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        matches!(self.output, ToolOutput::Error(_))
    }

    /// Text appended to the model context.
    pub fn context_text(&self) -> String {
        match &self.output {
            ToolOutput::Content(c) => c.clone(),
            ToolOutput::Error(e) => format!("error: {}", e),
        }
    }
}

/// Everything the engine needs back from one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub result: ToolResult,
    pub end_session: Option<SessionEnd>,
}

impl ToolInvocation {
    pub(crate) fn failed(call_id: &str, err: ToolError) -> Self {
        Self {
            result: ToolResult {
                call_id: call_id.to_string(),
                output: ToolOutput::Error(err.to_string()),
            },
            end_session: None,
        }
    }
}

/// Identity of one completed call. Backends reuse ids like `call_0` across
/// conversations, so the id alone is not enough.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey {
    session_id: Uuid,
    tool: String,
    call_id: String,
}

impl CallKey {
    fn new(ctx: &ToolContext, call: &ToolCall) -> Self {
        Self {
            session_id: ctx.session_id,
            tool: call.name.clone(),
            call_id: call.call_id.clone(),
        }
    }
}

/// Name-keyed handler table with a per-session result cache.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    completed: DashMap<CallKey, ToolInvocation>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        let name = name.into();
        debug!(target: "autopilot::tools", %name, "tool registered");
        self.handlers.insert(name, handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Declarations for the named tools, in the given order. Unknown names
    /// are skipped.
    pub fn specs_for(&self, names: &[String]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|n| {
                self.handlers.get(n).map(|h| ToolSpec {
                    name: n.clone(),
                    ..h.spec()
                })
            })
            .collect()
    }

    /// Drop every cached result of a finished session.
    pub fn forget_session(&self, session_id: Uuid) {
        self.completed.retain(|key, _| key.session_id != session_id);
    }

    /// Run a tool call. Never fails: unknown tools and handler errors come
    /// back as error results. A call id seen before in the same session, for
    /// the same tool, returns its first result.
    pub async fn invoke(&self, call: &ToolCall, ctx: &ToolContext) -> ToolInvocation {
        let key = (!call.call_id.is_empty()).then(|| CallKey::new(ctx, call));
        if let Some(key) = &key {
            if let Some(done) = self.completed.get(key) {
                debug!(target: "autopilot::tools", call_id = %call.call_id, "replaying cached result");
                return done.clone();
            }
        }

        let invocation = match self.handlers.get(&call.name) {
            None => {
                warn!(target: "autopilot::tools", tool = %call.name, "unknown tool requested");
                ToolInvocation::failed(&call.call_id, ToolError::UnknownTool(call.name.clone()))
            }
            Some(handler) => match handler.invoke(ctx, call.arguments.clone()).await {
                Ok(outcome) => {
                    info!(
                        target: "autopilot::tools",
                        tool = %call.name,
                        call_id = %call.call_id,
                        ends_session = outcome.end_session.is_some(),
                        "tool completed"
                    );
                    ToolInvocation {
                        result: ToolResult {
                            call_id: call.call_id.clone(),
                            output: ToolOutput::Content(outcome.content),
                        },
                        end_session: outcome.end_session,
                    }
                }
                Err(e) => {
                    warn!(target: "autopilot::tools", tool = %call.name, "tool failed: {}", e);
                    ToolInvocation::failed(&call.call_id, e)
                }
            },
        };

        if let Some(key) = key {
            self.completed.insert(key, invocation.clone());
        }
        invocation
    }
}
