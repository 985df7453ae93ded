//! # Autopilot Core - conversational autopilot for programmable calls
//!
//! Answers a call, greets the caller, and carries the conversation: listens
//! for speech, grounds each reply in a knowledge base, streams the model's
//! answer back sentence by sentence, runs tools the model asks for, and ends
//! the call when the caller goes quiet, a tool hangs up, or the channel dies.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      SessionOrchestrator                         │
//! │   start / stop / phase_watch / wait                              │
//! │                                                                  │
//! │  VadEvent ──►┌─────────────────┐  TurnRequest  ┌──────────────┐  │
//! │  capture  ──►│ TurnController  │──────────────►│DialogueEngine│  │
//! │  idle     ──►│ (state machine) │◄──────────────│ model+tools  │  │
//! │              └────────┬────────┘  EngineEvent  └──────┬───────┘  │
//! │                       │ play / cancel / hangup        │          │
//! │                       ▼                               ▼          │
//! │                    VoiceIo                 KnowledgeBase         │
//! │                                            ToolRegistry          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use autopilot_core::{
//!     Collaborators, ConversationSession, DialogueEngine, HangupTool, OpenAiModel,
//!     SessionConfig, SessionOrchestrator, ToolRegistry,
//! };
//! use std::sync::Arc;
//!
//! # async fn run(voice: Arc<dyn autopilot_voice::VoiceIo>) -> anyhow::Result<()> {
//! let config = SessionConfig::load()?;
//! let mut tools = ToolRegistry::new();
//! tools.register(
//!     "hangup",
//!     Arc::new(HangupTool::new(Some(config.assistant.goodbye_message.clone()))),
//! );
//! let engine = DialogueEngine::new(
//!     Arc::new(OpenAiModel::from_env()?),
//!     None,
//!     Arc::new(tools),
//!     config.engine.clone(),
//! );
//!
//! let (_vad_tx, vad_rx) = tokio::sync::mpsc::unbounded_channel();
//! let mut autopilot = SessionOrchestrator::new(config, Collaborators { voice, engine })?;
//! autopilot.start(ConversationSession::new(), vad_rx)?;
//! let summary = autopilot.wait().await?;
//! println!("call ended: {:?}", summary.reason);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialogue;
pub mod error;
pub mod knowledge;
pub mod model;
pub mod orchestrator;
pub mod session;
pub mod tools;
pub mod turn;

pub use config::{AssistantConfig, EngineSettings, ModelSettings, SessionConfig};
pub use dialogue::{DialogueEngine, EngineEvent, SentenceBuffer, TurnRequest};
pub use error::{
    AutopilotError, AutopilotResult, ConfigError, KnowledgeError, ModelError, ToolError,
    TurnError,
};
pub use knowledge::{KnowledgeBase, Snippet, StaticKnowledgeBase};
pub use model::{
    ContextMessage, GenerationEvent, GenerationStream, LanguageModel, ModelRequest, OpenAiModel,
    ToolCall,
};
pub use orchestrator::{Collaborators, SessionOrchestrator, StopHandle};
pub use session::{
    ConversationSession, Phase, SessionSummary, Speaker, TerminationReason, TurnEntry,
};
pub use tools::{
    HangupTool, SessionEnd, ToolContext, ToolHandler, ToolInvocation, ToolOutcome, ToolOutput,
    ToolRegistry, ToolResult, ToolSpec,
};
pub use turn::TurnController;
