//! **VoiceIo** - the call's media primitives as the turn controller sees them.
//!
//! A telephony channel implements `VoiceIo`: play synthesized speech or an
//! audio URI, capture the caller's next utterance, record, and hang up.
//! Playback is never fire-and-forget: `play` hands back a `PlaybackHandle`
//! whose cancellation is the barge-in kill-switch.

use crate::error::{VoiceError, VoiceResult};
use crate::recording::{RecordOptions, Recording};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// Something the channel can play to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Playable {
    /// Text to synthesize
    Text(String),
    /// Pre-recorded audio, addressed by URI
    Audio(String),
}

impl Playable {
    pub fn text(s: impl Into<String>) -> Self {
        Playable::Text(s.into())
    }

    /// Play back a finished recording. `None` while its URI is unavailable.
    pub fn from_recording(recording: &Recording) -> Option<Self> {
        recording.uri.clone().map(Playable::Audio)
    }
}

/// The caller's transcribed speech for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub transcript: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Utterance {
    pub fn new(transcript: impl Into<String>, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        Self {
            transcript: transcript.into(),
            started_at,
            ended_at,
        }
    }

    /// An utterance stamped with the current time at both ends.
    pub fn now(transcript: impl Into<String>) -> Self {
        let now = Utc::now();
        Self::new(transcript, now, now)
    }

    pub fn is_blank(&self) -> bool {
        self.transcript.trim().is_empty()
    }
}

/// How a playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// All audio reached the caller
    Completed,
    /// Stopped early; whatever already played stays played
    Cancelled,
}

/// Controller side of an in-flight playback.
///
/// `cancel` may be called any number of times, from any task, including while
/// another task is awaiting `finished`.
#[derive(Debug)]
pub struct PlaybackHandle {
    cancel: CancellationToken,
    done: oneshot::Receiver<VoiceResult<()>>,
}

/// Channel side of an in-flight playback. The implementation keeps it while
/// audio streams out, watches `cancelled()` to drop buffered audio, and calls
/// `complete` or `fail` when done.
#[derive(Debug)]
pub struct PlaybackCompleter {
    cancel: CancellationToken,
    done: oneshot::Sender<VoiceResult<()>>,
}

impl PlaybackHandle {
    pub fn new() -> (PlaybackHandle, PlaybackCompleter) {
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        (
            PlaybackHandle {
                cancel: cancel.clone(),
                done: rx,
            },
            PlaybackCompleter { cancel, done: tx },
        )
    }

    /// A playback that has nothing to play.
    pub fn finished_immediately() -> PlaybackHandle {
        let (handle, completer) = Self::new();
        completer.complete();
        handle
    }

    /// Stop playback and discard anything still buffered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when playback completes or is cancelled. Cancellation wins
    /// immediately even if the channel never acknowledges it.
    pub async fn finished(&mut self) -> VoiceResult<PlaybackOutcome> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(PlaybackOutcome::Cancelled),
            res = &mut self.done => match res {
                Ok(Ok(())) => Ok(PlaybackOutcome::Completed),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(VoiceError::Playback(
                    "playback abandoned by the channel".to_string(),
                )),
            },
        }
    }
}

impl PlaybackCompleter {
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn complete(self) {
        let _ = self.done.send(Ok(()));
    }

    pub fn fail(self, err: VoiceError) {
        debug!("playback failed: {}", err);
        let _ = self.done.send(Err(err));
    }
}

/// Media primitives for one live call.
#[async_trait]
pub trait VoiceIo: Send + Sync {
    /// Start playing to the caller. Returns once playback has started.
    async fn play(&self, content: Playable) -> VoiceResult<PlaybackHandle>;

    /// Wait for the caller's next complete utterance. Must be cancel-safe:
    /// dropping the future abandons the capture without losing the channel.
    async fn capture(&self) -> VoiceResult<Utterance>;

    /// Record the caller. The returned URI may be `None` if storage never
    /// caught up within its polling budget.
    async fn record(&self, options: RecordOptions) -> VoiceResult<Recording>;

    /// Release the channel. Called at most once per session by the orchestrator.
    async fn hangup(&self) -> VoiceResult<()>;
}
