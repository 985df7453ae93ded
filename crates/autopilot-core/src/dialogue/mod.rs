//! Turn generation: context assembly, model streaming, tool-call loop.

mod context;
mod engine;
mod sentence;

pub use context::{history_messages, system_prompt};
pub use engine::{DialogueEngine, EngineEvent, TurnRequest};
pub use sentence::SentenceBuffer;
