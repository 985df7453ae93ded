//! Language-model backends.

mod openai;
mod traits;

pub use openai::OpenAiModel;
pub use traits::{
    ContextMessage, GenerationEvent, GenerationStream, LanguageModel, ModelRequest, ToolCall,
};
