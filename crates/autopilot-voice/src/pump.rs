//! **VAD pump** - the always-on producer between the frame source and the turn controller.
//!
//! Reads frames from the call, classifies each one, runs the speech segmenter,
//! and pushes `VadEvent`s onto an unbounded channel. Everything happens on one
//! dedicated thread, so events leave in exactly the order their frames arrived.
//! The pump ends when the frame source closes or the event receiver is dropped.

use crate::error::VoiceResult;
use crate::segmenter::{SegmenterConfig, SpeechSegmenter, VadEvent};
use crate::vad::{AudioFrame, FrameClassifier};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration for the pump
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Sample rate of incoming frames (default 8000, narrowband telephony)
    pub sample_rate: u32,
    pub segmenter: SegmenterConfig,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            segmenter: SegmenterConfig::default(),
        }
    }
}

/// Handle to a running pump. Dropping it does not stop the pump; close the
/// frame source for that.
pub struct VadPump {
    events: mpsc::UnboundedReceiver<VadEvent>,
    thread: thread::JoinHandle<()>,
}

impl VadPump {
    /// Take the event receiver to hand it to the orchestrator.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<VadEvent>, thread::JoinHandle<()>) {
        (self.events, self.thread)
    }

    pub async fn recv(&mut self) -> Option<VadEvent> {
        self.events.recv().await
    }
}

/// Start the pump. The classifier is built on the pump thread because VAD
/// engines such as WebRTC's are not `Send`.
pub fn spawn_vad_pump<F, C>(
    mut frames: mpsc::Receiver<AudioFrame>,
    make_classifier: F,
    config: PumpConfig,
) -> VadPump
where
    F: FnOnce() -> VoiceResult<C> + Send + 'static,
    C: FrameClassifier,
{
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let handle = thread::spawn(move || {
        let mut classifier = match make_classifier() {
            Ok(c) => c,
            Err(e) => {
                error!(target: "autopilot::vad", "VAD init failed: {}", e);
                return;
            }
        };
        let mut segmenter = SpeechSegmenter::new(config.segmenter.clone());
        info!(
            target: "autopilot::vad",
            sample_rate = config.sample_rate,
            gap_ms = config.segmenter.silence_gap.as_millis() as u64,
            "VAD pump started"
        );

        while let Some(frame) = frames.blocking_recv() {
            if let Some(expected) = classifier.frame_len() {
                if frame.samples.len() != expected {
                    debug!(
                        target: "autopilot::vad",
                        expected,
                        got = frame.samples.len(),
                        "skipping misshapen frame"
                    );
                    continue;
                }
            }
            let is_speech = match classifier.is_speech(&frame.samples) {
                Ok(s) => s,
                Err(e) => {
                    debug!(target: "autopilot::vad", "classification failed: {}", e);
                    continue;
                }
            };
            if let Some(event) = segmenter.push(is_speech, frame.duration(config.sample_rate)) {
                if event_tx.send(event).is_err() {
                    warn!(target: "autopilot::vad", "event receiver dropped; stopping pump");
                    break;
                }
            }
        }

        info!(target: "autopilot::vad", "🛑 VAD pump ended");
    });

    VadPump {
        events: event_rx,
        thread: handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::EnergyClassifier;
    use std::time::Duration;

    #[test]
    fn pump_emits_events_in_order_and_ends_with_source() {
        let (tx, rx) = mpsc::channel(64);
        let config = PumpConfig {
            sample_rate: 8000,
            segmenter: SegmenterConfig {
                silence_gap: Duration::from_millis(60),
                min_speech: Duration::from_millis(30),
            },
        };
        let pump = spawn_vad_pump(rx, || EnergyClassifier::new(0.1), config);

        for level in [0.5f32, 0.5, 0.0, 0.0, 0.5, 0.0, 0.0] {
            tx.blocking_send(AudioFrame::new(vec![level; 240])).unwrap();
        }
        drop(tx);

        let (mut events, thread) = pump.into_parts();
        thread.join().unwrap();

        let mut kinds = Vec::new();
        while let Ok(ev) = events.try_recv() {
            kinds.push(ev.is_speech_start());
        }
        assert_eq!(kinds, vec![true, false, true, false]);
    }
}
