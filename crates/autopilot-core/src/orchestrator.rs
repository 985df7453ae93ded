//! **SessionOrchestrator** - lifecycle of one autopilot call.
//!
//! Receives its collaborators up front, validates the session against them,
//! and runs the turn controller on its own task. `stop` may be called from
//! anywhere, any number of times; the session still ends exactly once.

use crate::config::SessionConfig;
use crate::dialogue::DialogueEngine;
use crate::error::{AutopilotError, AutopilotResult, ConfigError};
use crate::session::{ConversationSession, Phase, SessionSummary};
use crate::turn::TurnController;
use autopilot_voice::{VadEvent, VoiceIo};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Everything a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub voice: Arc<dyn VoiceIo>,
    pub engine: DialogueEngine,
}

/// Cloneable handle that stops a session from another task.
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl StopHandle {
    /// Request termination. Only the first reason is kept.
    pub fn stop(&self, reason: impl Into<String>) {
        if self.reason.set(reason.into()).is_ok() {
            debug!(target: "autopilot::session", reason = ?self.reason.get(), "stop requested");
        }
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct SessionOrchestrator {
    config: SessionConfig,
    collaborators: Collaborators,
    stop: StopHandle,
    phase_tx: Option<watch::Sender<Phase>>,
    phase_rx: watch::Receiver<Phase>,
    task: Option<JoinHandle<SessionSummary>>,
    started: bool,
}

impl SessionOrchestrator {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> AutopilotResult<Self> {
        config.validate()?;
        let registry = collaborators.engine.tools();
        if let Some(missing) = config.tools.iter().find(|t| !registry.contains(t)) {
            return Err(ConfigError::UnknownTool(missing.clone()).into());
        }

        let (phase_tx, phase_rx) = watch::channel(Phase::Greeting);
        Ok(Self {
            config,
            collaborators,
            stop: StopHandle {
                token: CancellationToken::new(),
                reason: Arc::new(OnceLock::new()),
            },
            phase_tx: Some(phase_tx),
            phase_rx,
            task: None,
            started: false,
        })
    }

    /// Begin the call: greet, then listen. `vad_events` is the detector's
    /// event stream for this call; when it closes the caller is gone.
    pub fn start(
        &mut self,
        session: ConversationSession,
        vad_events: mpsc::UnboundedReceiver<VadEvent>,
    ) -> AutopilotResult<()> {
        if self.started {
            return Err(AutopilotError::AlreadyStarted);
        }
        let phase_tx = self.phase_tx.take().ok_or(AutopilotError::AlreadyStarted)?;
        self.started = true;

        info!(
            target: "autopilot::session",
            session = %session.id,
            tools = ?self.config.tools,
            "🚀 starting autopilot session"
        );
        let controller = TurnController::new(
            session,
            self.config.clone(),
            self.collaborators.voice.clone(),
            self.collaborators.engine.clone(),
            vad_events,
            self.stop.token.clone(),
            self.stop.reason.clone(),
            phase_tx,
        );
        self.task = Some(tokio::spawn(controller.run()));
        Ok(())
    }

    /// Tear the session down. Idempotent and safe from any phase.
    pub fn stop(&self, reason: impl Into<String>) {
        self.stop.stop(reason);
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase_rx.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn phase_watch(&self) -> watch::Receiver<Phase> {
        self.phase_rx.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Wait for the session to end and the channel to be released.
    pub async fn wait(&mut self) -> AutopilotResult<SessionSummary> {
        let task = self.task.take().ok_or(AutopilotError::NotStarted)?;
        task.await.map_err(|e| AutopilotError::Join(e.to_string()))
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.stop.token.cancel();
    }
}
