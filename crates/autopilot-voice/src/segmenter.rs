//! Speech segmentation for conversational turn-taking
//!
//! Implements the "gap logic": per-frame speech/silence decisions become a
//! `SpeechStart` once enough speech has accumulated and a `SpeechEnd` once the
//! trailing silence exceeds the gap threshold. Time is measured in audio, not
//! wall clock, so the same frames always produce the same events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Voice-activity events delivered to the turn controller, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VadEvent {
    /// Caller started speaking
    SpeechStart { at: DateTime<Utc> },

    /// Caller stopped speaking (silence gap reached)
    SpeechEnd {
        at: DateTime<Utc>,
        /// Audio time between speech start and the last speech frame
        speech: Duration,
    },
}

impl VadEvent {
    pub fn speech_start() -> Self {
        VadEvent::SpeechStart { at: Utc::now() }
    }

    pub fn speech_end(speech: Duration) -> Self {
        VadEvent::SpeechEnd {
            at: Utc::now(),
            speech,
        }
    }

    pub fn is_speech_start(&self) -> bool {
        matches!(self, VadEvent::SpeechStart { .. })
    }
}

/// Configuration for speech segmentation
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Silence duration after speech before the segment ends (default: 800ms)
    pub silence_gap: Duration,

    /// Speech required before a segment is announced (default: 90ms)
    pub min_speech: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_gap: Duration::from_millis(800),
            min_speech: Duration::from_millis(90),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentState {
    /// No speech
    Idle,
    /// Speech seen but below `min_speech`; nothing announced yet
    Onset,
    /// Speech announced
    Speaking,
    /// Speech announced, counting silence toward the gap
    Trailing,
}

/// Turns per-frame classifications into speech start/end events.
pub struct SpeechSegmenter {
    config: SegmenterConfig,
    state: SegmentState,
    speech: Duration,
    silence: Duration,
}

impl SpeechSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: SegmentState::Idle,
            speech: Duration::ZERO,
            silence: Duration::ZERO,
        }
    }

    /// Feed one frame decision. `frame` is the audio duration of the frame.
    pub fn push(&mut self, is_speech: bool, frame: Duration) -> Option<VadEvent> {
        match (self.state, is_speech) {
            (SegmentState::Idle, true) | (SegmentState::Onset, true) => {
                self.speech += frame;
                if self.speech >= self.config.min_speech {
                    info!(target: "autopilot::vad", "🎤 Speech started");
                    self.state = SegmentState::Speaking;
                    return Some(VadEvent::speech_start());
                }
                self.state = SegmentState::Onset;
                None
            }

            // A click or breath that never reached min_speech
            (SegmentState::Onset, false) => {
                debug!(target: "autopilot::vad", onset = ?self.speech, "onset dropped");
                self.reset();
                None
            }

            (SegmentState::Speaking, true) => {
                self.speech += frame;
                None
            }

            (SegmentState::Speaking, false) => {
                self.state = SegmentState::Trailing;
                self.silence = frame;
                self.maybe_end()
            }

            // Speech resumed inside the gap
            (SegmentState::Trailing, true) => {
                self.state = SegmentState::Speaking;
                self.speech += self.silence + frame;
                self.silence = Duration::ZERO;
                None
            }

            (SegmentState::Trailing, false) => {
                self.silence += frame;
                self.maybe_end()
            }

            (SegmentState::Idle, false) => None,
        }
    }

    fn maybe_end(&mut self) -> Option<VadEvent> {
        if self.silence < self.config.silence_gap {
            return None;
        }
        let speech = self.speech;
        info!(target: "autopilot::vad", ?speech, "Speech ended");
        self.reset();
        Some(VadEvent::speech_end(speech))
    }

    fn reset(&mut self) {
        self.state = SegmentState::Idle;
        self.speech = Duration::ZERO;
        self.silence = Duration::ZERO;
    }

    /// True while a segment has been announced and not yet ended.
    pub fn in_speech(&self) -> bool {
        matches!(self.state, SegmentState::Speaking | SegmentState::Trailing)
    }
}
