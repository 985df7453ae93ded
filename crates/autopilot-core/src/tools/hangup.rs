//! Built-in tool that ends the call.

use super::{ToolContext, ToolHandler, ToolOutcome, ToolSpec};
use crate::error::ToolError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// Ends the session. The channel itself is released by the orchestrator
/// after the closing message plays, never by the tool.
pub struct HangupTool {
    closing_message: Option<String>,
}

impl HangupTool {
    pub fn new(closing_message: Option<String>) -> Self {
        Self { closing_message }
    }
}

#[async_trait]
impl ToolHandler for HangupTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "hangup",
            "End the phone call. Use when the caller says goodbye or the conversation is complete.",
            json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string", "description": "Why the call is ending" }
                }
            }),
        )
    }

    async fn invoke(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolOutcome, ToolError> {
        if !arguments.is_object() && !arguments.is_null() {
            return Err(ToolError::InvalidArguments(format!(
                "expected an object, got {}",
                arguments
            )));
        }
        let reason = arguments
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unspecified");
        info!(target: "autopilot::tools", session = %ctx.session_id, reason, "hangup requested");
        Ok(ToolOutcome::end_session("call ending", self.closing_message.clone()))
    }
}
