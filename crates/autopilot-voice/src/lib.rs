//! # Autopilot Voice - the media edge of a programmable call
//!
//! This crate owns everything between the telephony channel and the
//! conversation logic: classifying audio frames, segmenting them into
//! speech-start / speech-end events, and the `VoiceIo` contract the turn
//! controller drives (cancellable playback, utterance capture, recording).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Call channel                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐    │
//! │  │ Audio frames │→ │  Classifier  │→ │ Speech segmenter │→ VadEvent
//! │  │  (mpsc)      │  │ (WebRTC/RMS) │  │   (800ms gap)    │    │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘    │
//! │                                                              │
//! │  ┌──────────────┐     cancel()      ┌──────────────────┐     │
//! │  │   VoiceIo    │←──────────────────│  PlaybackHandle  │     │
//! │  │ play/capture │                   │  (barge-in)      │     │
//! │  └──────────────┘                   └──────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod pump;
pub mod recording;
pub mod segmenter;
pub mod vad;
pub mod voice_io;

pub use error::{VoiceError, VoiceResult};
pub use pump::{spawn_vad_pump, PumpConfig, VadPump};
pub use recording::{
    finalize_recording, poll_until_available, Availability, RawRecording, RecordOptions,
    Recording, RecordingStorage, RetryBudget,
};
pub use segmenter::{SegmenterConfig, SpeechSegmenter, VadEvent};
pub use vad::{AudioFrame, EnergyClassifier, FrameClassifier, VadConfig, WebRtcClassifier};
pub use voice_io::{
    PlaybackCompleter, PlaybackHandle, PlaybackOutcome, Playable, Utterance, VoiceIo,
};
