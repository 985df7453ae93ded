//! Assembles the model's view of the conversation.

use crate::knowledge::Snippet;
use crate::model::ContextMessage;
use crate::session::{Speaker, TurnEntry};

/// System template followed by the retrieved reference material, if any.
pub fn system_prompt(template: &str, snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return template.to_string();
    }
    let mut prompt = String::from(template.trim_end());
    prompt.push_str("\n\nUse the following reference material when it is relevant:\n");
    for snippet in snippets {
        prompt.push_str("\n- ");
        prompt.push_str(&snippet.content);
    }
    prompt
}

/// Map the turn history onto model messages. A tool entry becomes the
/// assistant's call followed by its result.
pub fn history_messages(history: &[TurnEntry]) -> Vec<ContextMessage> {
    let mut messages = Vec::with_capacity(history.len());
    for entry in history {
        match (entry.speaker, &entry.tool_call) {
            (Speaker::Caller, _) => messages.push(ContextMessage::user(&entry.content)),
            (Speaker::Assistant, _) => messages.push(ContextMessage::assistant(&entry.content)),
            (Speaker::Tool, Some(call)) => {
                messages.push(ContextMessage::Assistant {
                    content: String::new(),
                    tool_calls: vec![call.clone()],
                });
                messages.push(ContextMessage::Tool {
                    call_id: call.call_id.clone(),
                    content: entry.content.clone(),
                });
            }
            // A tool entry without its call cannot be correlated; skip it.
            (Speaker::Tool, None) => {}
        }
    }
    messages
}
