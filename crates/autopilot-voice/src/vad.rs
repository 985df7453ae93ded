//! Frame classification: is this slice of call audio speech or silence?
//!
//! Two classifiers ship with the crate. `WebRtcClassifier` wraps the WebRTC
//! VAD and is what a live call should use. `EnergyClassifier` is a plain RMS
//! gate, useful for line-level audio and for tests where synthetic frames
//! stand in for a caller.

use crate::error::{VoiceError, VoiceResult};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// One fixed-size frame of mono audio pushed by the call's frame source.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples normalized to -1.0..1.0
    pub samples: Vec<f32>,

    /// When the frame was captured
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            captured_at: Instant::now(),
        }
    }

    /// Length of this frame in time at the given sample rate.
    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.samples.len() as u64 * 1_000_000_000 / sample_rate as u64;
        Duration::from_nanos(nanos)
    }
}

/// Classifies a single frame as speech (`true`) or silence (`false`).
///
/// Implementations may keep internal state across frames and need not be
/// `Send`; the VAD pump builds its classifier on the thread that uses it.
pub trait FrameClassifier {
    fn is_speech(&mut self, frame: &[f32]) -> VoiceResult<bool>;

    /// Number of samples the classifier expects per frame, if it is strict about it.
    fn frame_len(&self) -> Option<usize> {
        None
    }
}

/// Configuration for the WebRTC detector
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Sample rate (must be 8000, 16000, 32000, or 48000 Hz for WebRTC VAD)
    pub sample_rate: u32,

    /// Detection mode (0-3, where 3 is most aggressive)
    pub mode: u8,

    /// Frame length in milliseconds (10, 20 or 30)
    pub frame_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            mode: 2,
            frame_ms: 30,
        }
    }
}

impl VadConfig {
    fn vad_mode(&self) -> VoiceResult<VadMode> {
        match self.mode {
            0 => Ok(VadMode::Quality),
            1 => Ok(VadMode::LowBitrate),
            2 => Ok(VadMode::Aggressive),
            3 => Ok(VadMode::VeryAggressive),
            other => Err(VoiceError::Config(format!("VAD mode must be 0-3, got {}", other))),
        }
    }

    fn webrtc_rate(&self) -> VoiceResult<SampleRate> {
        match self.sample_rate {
            8000 => Ok(SampleRate::Rate8kHz),
            16000 => Ok(SampleRate::Rate16kHz),
            32000 => Ok(SampleRate::Rate32kHz),
            48000 => Ok(SampleRate::Rate48kHz),
            other => Err(VoiceError::Config(format!(
                "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
                other
            ))),
        }
    }

    /// Samples per frame for this rate and frame length.
    pub fn frame_len(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

/// Voice activity detector backed by WebRTC VAD
pub struct WebRtcClassifier {
    vad: Vad,
    frame_len: usize,
}

impl WebRtcClassifier {
    pub fn new(config: VadConfig) -> VoiceResult<Self> {
        info!(
            target: "autopilot::vad",
            "Initializing WebRTC VAD (sample_rate: {}Hz, mode: {}, frame: {}ms)",
            config.sample_rate, config.mode, config.frame_ms
        );

        if !matches!(config.frame_ms, 10 | 20 | 30) {
            return Err(VoiceError::Config(format!(
                "WebRTC VAD frames must be 10, 20 or 30ms, got {}ms",
                config.frame_ms
            )));
        }
        let mode = config.vad_mode()?;
        let rate = config.webrtc_rate()?;

        let mut vad = Vad::new();
        vad.set_mode(mode);
        vad.set_sample_rate(rate);

        Ok(Self {
            vad,
            frame_len: config.frame_len(),
        })
    }
}

impl FrameClassifier for WebRtcClassifier {
    fn is_speech(&mut self, frame: &[f32]) -> VoiceResult<bool> {
        if frame.len() != self.frame_len {
            return Err(VoiceError::VadProcessing(format!(
                "Expected {} samples, got {}",
                self.frame_len,
                frame.len()
            )));
        }

        let pcm: Vec<i16> = frame
            .iter()
            .map(|&sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();

        self.vad
            .is_voice_segment(&pcm)
            .map_err(|e| VoiceError::VadProcessing(format!("VAD processing failed: {:?}", e)))
    }

    fn frame_len(&self) -> Option<usize> {
        Some(self.frame_len)
    }
}

/// RMS gate: a frame is speech when its root-mean-square level exceeds the threshold.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    /// `threshold` is an RMS level in 0.0..=1.0.
    pub fn new(threshold: f32) -> VoiceResult<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(VoiceError::Config(format!(
                "energy threshold must be within 0.0..=1.0, got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn rms(frame: &[f32]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let sum: f32 = frame.iter().map(|s| s * s).sum();
        (sum / frame.len() as f32).sqrt()
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self { threshold: 0.02 }
    }
}

impl FrameClassifier for EnergyClassifier {
    fn is_speech(&mut self, frame: &[f32]) -> VoiceResult<bool> {
        let level = Self::rms(frame);
        debug!(target: "autopilot::vad", level, "energy frame");
        Ok(level > self.threshold)
    }
}
