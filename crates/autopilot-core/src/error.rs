//! Error taxonomy for the autopilot.
//!
//! Turn-level failures (`TurnError`) never leave the turn controller: they are
//! spoken as the system error message and the call goes back to listening.
//! Media failures (`VoiceError`) end the session.

use autopilot_voice::VoiceError;
use thiserror::Error;

pub type AutopilotResult<T> = Result<T, AutopilotError>;

/// Top-level error for session setup and lifecycle.
#[derive(Error, Debug)]
pub enum AutopilotError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("voice error: {0}")]
    Voice(#[from] VoiceError),

    #[error("session already started")]
    AlreadyStarted,

    #[error("session not started")]
    NotStarted,

    #[error("session task failed: {0}")]
    Join(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("tool `{0}` is not registered")]
    UnknownTool(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures of the language-model backend.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode model stream: {0}")]
    Decode(String),

    #[error("model not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Transport(err.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum KnowledgeError {
    #[error("knowledge base unavailable: {0}")]
    Unavailable(String),

    #[error("knowledge base I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for KnowledgeError {
    fn from(err: std::io::Error) -> Self {
        KnowledgeError::Io(err.to_string())
    }
}

/// A tool call that could not produce a result. Surfaced to the model as an
/// error result so it can recover in conversation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// Why a single turn could not produce a reply.
#[derive(Error, Debug, Clone)]
pub enum TurnError {
    #[error("knowledge lookup failed: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("generation failed: {0}")]
    Model(#[from] ModelError),

    #[error("tool-call loop exceeded {0} iterations")]
    ToolLoopExceeded(usize),

    #[error("turn ended without a result")]
    Incomplete,
}
