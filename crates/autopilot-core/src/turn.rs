//! **TurnController** - the per-call state machine.
//!
//! One task owns the session and reacts to whichever of its event sources
//! fires first:
//!
//! ```text
//!   stop token ─┐
//!   VAD events ─┤
//!   playback   ─┼─► select! (biased, in this order) ─► phase transition
//!   turn events ┤
//!   capture    ─┤
//!   idle timer ─┘
//! ```
//!
//! VAD is polled before playback and turn completion, so a speech-start that
//! lands in the same tick as the assistant finishing always wins. A source
//! with nothing in flight is parked on a pending future, so every suspension
//! point stays cancellable from the loop.

use crate::config::SessionConfig;
use crate::dialogue::{DialogueEngine, EngineEvent, TurnRequest};
use crate::error::TurnError;
use crate::session::{
    ConversationSession, Phase, SessionSummary, TerminationReason, TurnEntry,
};
use crate::tools::ToolContext;
use autopilot_voice::{
    PlaybackHandle, PlaybackOutcome, Playable, Utterance, VadEvent, VoiceError, VoiceIo,
    VoiceResult,
};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a playback was for; decides where the controller goes when it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpeechKind {
    Greeting,
    Reply,
    /// A reply sentence already written to the history
    RecordedReply,
    IdleWarning,
    SystemError,
}

struct ActivePlayback {
    handle: PlaybackHandle,
    kind: SpeechKind,
}

/// How the session is going to end.
#[derive(Debug)]
struct Ending {
    reason: TerminationReason,
    /// Spoken in order before the channel is released
    closings: Vec<String>,
}

/// `Err` ends the session.
type Step = Result<(), Ending>;

pub struct TurnController {
    session: ConversationSession,
    config: SessionConfig,
    voice: Arc<dyn VoiceIo>,
    engine: DialogueEngine,
    vad: Option<mpsc::UnboundedReceiver<VadEvent>>,
    stop: CancellationToken,
    stop_reason: Arc<OnceLock<String>>,
    phase_tx: watch::Sender<Phase>,

    capture: Option<BoxFuture<'static, VoiceResult<Utterance>>>,
    idle_deadline: Option<Instant>,
    caller_speaking: bool,
    turn: Option<mpsc::Receiver<EngineEvent>>,
    playback: Option<ActivePlayback>,
    speech_queue: VecDeque<(String, SpeechKind)>,
    pending_end: Option<Ending>,
    /// History index of the reply being spoken this turn
    reply_entry: Option<usize>,
}

impl TurnController {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: ConversationSession,
        config: SessionConfig,
        voice: Arc<dyn VoiceIo>,
        engine: DialogueEngine,
        vad: mpsc::UnboundedReceiver<VadEvent>,
        stop: CancellationToken,
        stop_reason: Arc<OnceLock<String>>,
        phase_tx: watch::Sender<Phase>,
    ) -> Self {
        Self {
            session,
            config,
            voice,
            engine,
            vad: Some(vad),
            stop,
            stop_reason,
            phase_tx,
            capture: None,
            idle_deadline: None,
            caller_speaking: false,
            turn: None,
            playback: None,
            speech_queue: VecDeque::new(),
            pending_end: None,
            reply_entry: None,
        }
    }

    /// Drive the call until it terminates, then release the channel.
    pub async fn run(mut self) -> SessionSummary {
        info!(target: "autopilot::session", session = %self.session.id, "📞 session started");
        let ending = match self.drive().await {
            Ok(()) => Ending {
                reason: TerminationReason::ChannelClosed,
                closings: Vec::new(),
            },
            Err(ending) => ending,
        };
        self.finish(ending).await
    }

    async fn drive(&mut self) -> Step {
        self.set_phase(Phase::Greeting);
        let greeting = self.config.assistant.first_message.clone();
        self.session.push(TurnEntry::assistant(&greeting));
        self.start_playback(greeting, SpeechKind::Greeting).await?;
        self.capture = Some(self.new_capture());

        loop {
            self.step().await?;
        }
    }

    /// One pass of the event loop: handle whichever source is ready first.
    async fn step(&mut self) -> Step {
        if self.pending_end.is_some() && self.playback.is_none() && self.speech_queue.is_empty() {
            if let Some(ending) = self.pending_end.take() {
                return Err(ending);
            }
        }

        tokio::select! {
            biased;
            _ = self.stop.cancelled() => {
                let reason = self.stop_reason.get().cloned().unwrap_or_default();
                return Err(Ending {
                    reason: TerminationReason::Stopped { reason },
                    closings: Vec::new(),
                });
            }
            event = recv_vad(&mut self.vad) => match event {
                Some(event) => self.on_vad(event).await?,
                None => {
                    info!(target: "autopilot::session", "VAD stream closed; caller is gone");
                    self.vad = None;
                    return Err(Ending {
                        reason: TerminationReason::ChannelClosed,
                        closings: Vec::new(),
                    });
                }
            },
            outcome = wait_playback(&mut self.playback) => self.on_playback_done(outcome).await?,
            event = recv_turn(&mut self.turn) => self.on_turn_event(event).await?,
            utterance = poll_capture(&mut self.capture) => self.on_utterance(utterance).await?,
            _ = sleep_until(self.idle_deadline) => self.on_idle().await?,
        }
        Ok(())
    }

    async fn on_vad(&mut self, event: VadEvent) -> Step {
        match event {
            VadEvent::SpeechStart { .. } => {
                self.caller_speaking = true;
                self.idle_deadline = None;
                if self.pending_end.is_some() {
                    return Err(self.interrupt_pending_end());
                }
                self.barge_in();
            }
            VadEvent::SpeechEnd { speech, .. } => {
                debug!(target: "autopilot::turn", speech_ms = speech.as_millis() as u64, "speech ended");
                self.caller_speaking = false;
                if self.session.phase == Phase::Listening && self.turn.is_none() && self.playback.is_none() {
                    self.arm_idle();
                }
            }
        }
        Ok(())
    }

    /// Stop whatever the assistant is doing and hand the floor to the caller.
    fn barge_in(&mut self) {
        let interrupted = self.session.phase;
        if let Some(playback) = self.playback.take() {
            playback.handle.cancel();
        }
        self.speech_queue.clear();
        if self.turn.take().is_some() {
            self.session.cancel_operation();
        }
        if interrupted != Phase::Listening {
            info!(target: "autopilot::turn", phase = %interrupted, "✋ barge-in");
            self.set_phase(Phase::Listening);
        }
    }

    fn interrupt_pending_end(&mut self) -> Ending {
        if let Some(playback) = self.playback.take() {
            playback.handle.cancel();
        }
        self.speech_queue.clear();
        info!(target: "autopilot::turn", "caller spoke while the call was ending; closing now");
        self.pending_end.take().unwrap_or(Ending {
            reason: TerminationReason::ChannelClosed,
            closings: Vec::new(),
        })
    }

    async fn on_utterance(&mut self, result: VoiceResult<Utterance>) -> Step {
        self.capture = None;
        let utterance = result.map_err(|e| self.fatal(e))?;
        self.capture = Some(self.new_capture());
        self.caller_speaking = false;

        if utterance.is_blank() {
            debug!(target: "autopilot::turn", "blank utterance ignored");
            if self.session.phase == Phase::Listening && self.turn.is_none() && self.playback.is_none() {
                self.arm_idle();
            }
            return Ok(());
        }

        if self.pending_end.is_some() {
            return Err(self.interrupt_pending_end());
        }
        // The detector can miss an onset; a finished utterance still takes the floor.
        self.barge_in();

        info!(target: "autopilot::turn", chars = utterance.transcript.len(), "🗣️ utterance received");
        self.session.push(TurnEntry {
            timestamp: utterance.ended_at,
            ..TurnEntry::caller(utterance.transcript)
        });
        self.session.idle_count = 0;
        self.idle_deadline = None;
        self.start_turn();
        Ok(())
    }

    fn start_turn(&mut self) {
        let cancel = self.session.arm_operation();
        let request = TurnRequest {
            history: self.session.history.clone(),
            system_template: self.config.assistant.system_template.clone(),
            tools: self.config.tools.clone(),
            tool_ctx: ToolContext {
                session_id: self.session.id,
                voice: self.voice.clone(),
            },
            cancel,
        };
        self.turn = Some(self.engine.generate(request));
        self.reply_entry = None;
        self.set_phase(Phase::Thinking);
    }

    async fn on_turn_event(&mut self, event: Option<EngineEvent>) -> Step {
        let event = event.unwrap_or(EngineEvent::Failed(TurnError::Incomplete));
        if event.is_terminal() {
            self.turn = None;
            self.session.clear_operation();
        }

        match event {
            EngineEvent::Sentence(text) => {
                self.speech_queue.push_back((text, SpeechKind::Reply));
                if self.playback.is_none() {
                    self.play_next().await?;
                }
            }
            EngineEvent::ToolInvoked { call, result } => {
                // Text generated before the call belongs before it in the history.
                self.record_queued_replies();
                self.session.push(TurnEntry::tool(call, result.context_text()));
                self.reply_entry = None;
            }
            EngineEvent::EndSession {
                tool,
                closing_message,
            } => {
                info!(target: "autopilot::turn", %tool, "tool requested the end of the call");
                self.pending_end = Some(Ending {
                    reason: TerminationReason::ToolRequested { tool },
                    closings: closing_message.into_iter().collect(),
                });
            }
            EngineEvent::Completed => {
                if self.playback.is_none() && self.speech_queue.is_empty() {
                    self.enter_listening();
                }
            }
            EngineEvent::Failed(err) => {
                warn!(target: "autopilot::turn", "turn failed: {}", err);
                self.speech_queue.clear();
                self.speech_queue.push_back((
                    self.config.assistant.system_error_message.clone(),
                    SpeechKind::SystemError,
                ));
                if self.playback.is_none() {
                    self.play_next().await?;
                }
            }
        }
        Ok(())
    }

    async fn on_playback_done(&mut self, outcome: VoiceResult<PlaybackOutcome>) -> Step {
        let finished = self.playback.take();
        let outcome = outcome.map_err(|e| self.fatal(e))?;
        let Some(finished) = finished else {
            return Ok(());
        };
        if outcome == PlaybackOutcome::Cancelled {
            return Ok(());
        }

        match finished.kind {
            SpeechKind::Greeting | SpeechKind::IdleWarning => self.enter_listening(),
            SpeechKind::Reply | SpeechKind::RecordedReply | SpeechKind::SystemError => {
                if !self.speech_queue.is_empty() {
                    self.play_next().await?;
                } else if self.turn.is_some() {
                    self.set_phase(Phase::Thinking);
                } else if self.pending_end.is_none() {
                    self.enter_listening();
                }
            }
        }
        Ok(())
    }

    async fn on_idle(&mut self) -> Step {
        self.idle_deadline = None;
        if self.session.phase != Phase::Listening {
            return Ok(());
        }

        self.session.idle_count += 1;
        let count = self.session.idle_count;
        let max = self.config.assistant.max_idle_timeout_count;
        info!(target: "autopilot::turn", count, max, "⏱️ caller idle");

        let idle_message = self.config.assistant.idle_message.clone();
        if max > 0 && count >= max {
            return Err(Ending {
                reason: TerminationReason::IdleExhausted,
                closings: vec![idle_message, self.config.assistant.goodbye_message.clone()],
            });
        }
        self.set_phase(Phase::IdleWarning);
        self.start_playback(idle_message, SpeechKind::IdleWarning).await
    }

    async fn play_next(&mut self) -> Step {
        match self.speech_queue.pop_front() {
            Some((text, kind)) => {
                self.set_phase(Phase::Speaking);
                self.start_playback(text, kind).await
            }
            None => Ok(()),
        }
    }

    async fn start_playback(&mut self, text: String, kind: SpeechKind) -> Step {
        let handle = self
            .voice
            .play(Playable::Text(text.clone()))
            .await
            .map_err(|e| self.fatal(e))?;
        if kind == SpeechKind::Reply {
            self.record_reply(text);
        }
        self.playback = Some(ActivePlayback { handle, kind });
        Ok(())
    }

    /// Sentences of one reply share a history entry, in the order they
    /// started playing.
    fn record_reply(&mut self, text: String) {
        if let Some(i) = self.reply_entry {
            if let Some(entry) = self.session.history.get_mut(i) {
                entry.content.push(' ');
                entry.content.push_str(&text);
                return;
            }
        }
        self.reply_entry = Some(self.session.history.len());
        self.session.push(TurnEntry::assistant(text));
    }

    fn record_queued_replies(&mut self) {
        let pending: Vec<String> = self
            .speech_queue
            .iter_mut()
            .filter(|(_, kind)| *kind == SpeechKind::Reply)
            .map(|(text, kind)| {
                *kind = SpeechKind::RecordedReply;
                text.clone()
            })
            .collect();
        for text in pending {
            self.record_reply(text);
        }
    }

    fn enter_listening(&mut self) {
        self.set_phase(Phase::Listening);
        if !self.caller_speaking {
            self.arm_idle();
        }
    }

    fn arm_idle(&mut self) {
        self.idle_deadline = Some(Instant::now() + self.config.assistant.idle_timeout);
    }

    fn fatal(&self, err: VoiceError) -> Ending {
        if err.is_channel_gone() {
            info!(target: "autopilot::session", "channel closed: {}", err);
            return Ending {
                reason: TerminationReason::ChannelClosed,
                closings: Vec::new(),
            };
        }
        error!(target: "autopilot::session", "media failure: {}", err);
        Ending {
            reason: TerminationReason::Fatal {
                message: err.to_string(),
            },
            closings: vec![self.config.assistant.system_error_message.clone()],
        }
    }

    fn new_capture(&self) -> BoxFuture<'static, VoiceResult<Utterance>> {
        let voice = self.voice.clone();
        Box::pin(async move { voice.capture().await })
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.session.phase != phase {
            debug!(target: "autopilot::turn", from = %self.session.phase, to = %phase, "phase");
            self.session.phase = phase;
        }
        self.phase_tx.send_replace(phase);
    }

    /// Tear down in-flight work, speak the closings, release the channel.
    async fn finish(mut self, ending: Ending) -> SessionSummary {
        if let Some(playback) = self.playback.take() {
            playback.handle.cancel();
        }
        self.speech_queue.clear();
        self.turn = None;
        self.session.cancel_operation();
        self.capture = None;
        self.idle_deadline = None;

        for text in ending.closings {
            if self.stop.is_cancelled() {
                break;
            }
            let mut handle = match self.voice.play(Playable::Text(text.clone())).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(target: "autopilot::session", "closing message not played: {}", e);
                    break;
                }
            };
            self.session.push(TurnEntry::assistant(text));
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    handle.cancel();
                    break;
                }
                outcome = handle.finished() => {
                    if let Err(e) = outcome {
                        warn!(target: "autopilot::session", "closing message failed: {}", e);
                        break;
                    }
                }
            }
        }

        if ending.reason != TerminationReason::ChannelClosed {
            if let Err(e) = self.voice.hangup().await {
                warn!(target: "autopilot::session", "hangup failed: {}", e);
            }
        }

        self.engine.tools().forget_session(self.session.id);
        self.set_phase(Phase::Terminated);
        info!(
            target: "autopilot::session",
            session = %self.session.id,
            reason = ?ending.reason,
            idle_count = self.session.idle_count,
            "🛑 session terminated"
        );

        SessionSummary {
            session_id: self.session.id,
            reason: ending.reason,
            idle_count: self.session.idle_count,
            history: std::mem::take(&mut self.session.history),
        }
    }
}

async fn recv_vad(rx: &mut Option<mpsc::UnboundedReceiver<VadEvent>>) -> Option<VadEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_playback(playback: &mut Option<ActivePlayback>) -> VoiceResult<PlaybackOutcome> {
    match playback {
        Some(p) => p.handle.finished().await,
        None => std::future::pending().await,
    }
}

async fn recv_turn(rx: &mut Option<mpsc::Receiver<EngineEvent>>) -> Option<EngineEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn poll_capture(
    capture: &mut Option<BoxFuture<'static, VoiceResult<Utterance>>>,
) -> VoiceResult<Utterance> {
    match capture {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
