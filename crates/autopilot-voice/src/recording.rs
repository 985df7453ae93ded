//! Call recording and the eventually-consistent storage poll.
//!
//! A freshly written recording is not immediately readable from object
//! storage. `finalize_recording` polls for its URL on a fixed interval with a
//! fixed attempt budget; running out of budget yields a recording without a
//! URI, which callers treat as "unavailable" and keep the call going.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Options for a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOptions {
    /// Play a beep before recording starts
    pub beep: bool,
    /// Upper bound on recording length (default 1 hour)
    pub max_duration: Duration,
    /// DTMF keys that stop the recording
    pub finish_on_key: String,
    /// Offset into the recording, in samples
    pub offset: u64,
    /// Container format, e.g. "wav"
    pub format: String,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            beep: true,
            max_duration: Duration::from_secs(3600),
            finish_on_key: "1234567890#*".to_string(),
            offset: 0,
            format: "wav".to_string(),
        }
    }
}

impl RecordOptions {
    pub fn validate(&self) -> VoiceResult<()> {
        if self.max_duration < Duration::from_secs(1) {
            return Err(VoiceError::Config(format!(
                "{:?} is not an acceptable max_duration; must be at least one second",
                self.max_duration
            )));
        }
        if self.format.trim().is_empty() {
            return Err(VoiceError::Config("recording format must not be empty".to_string()));
        }
        Ok(())
    }
}

/// What the channel knows right after it stops recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecording {
    /// Object name without extension
    pub filename: String,
    pub format: String,
    /// Key that stopped the recording, if any
    pub key_pressed: Option<String>,
}

impl RawRecording {
    /// Name of the stored object, e.g. `abc123.wav`.
    pub fn object_name(&self) -> String {
        format!("{}.{}", self.filename, self.format)
    }
}

/// A finished recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    /// `None` when storage did not expose the object within the poll budget
    pub uri: Option<String>,
    pub filename: String,
    pub format: String,
    pub key_pressed: Option<String>,
}

/// Object storage that recordings land in.
#[async_trait]
pub trait RecordingStorage: Send + Sync {
    /// URL of a stored object. Fails while the object is not yet visible.
    async fn object_url(&self, name: &str, bucket: &str) -> VoiceResult<String>;
}

/// Fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for RetryBudget {
    /// 40 attempts, 100ms apart: about four seconds.
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            attempts: 40,
        }
    }
}

/// Outcome of a bounded poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability<T> {
    Ready(T),
    Unavailable { attempts: u32 },
}

impl<T> Availability<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Availability::Ready(v) => Some(v),
            Availability::Unavailable { .. } => None,
        }
    }
}

/// Call `probe` until it succeeds or the budget runs out, sleeping `interval`
/// between attempts. Never sleeps after the last attempt.
pub async fn poll_until_available<T, E, F, Fut>(budget: RetryBudget, mut probe: F) -> Availability<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    for attempt in 1..=budget.attempts {
        match probe().await {
            Ok(value) => return Availability::Ready(value),
            Err(e) => {
                debug!(target: "autopilot::recording", attempt, "not available yet: {}", e);
                if attempt < budget.attempts {
                    tokio::time::sleep(budget.interval).await;
                }
            }
        }
    }
    Availability::Unavailable {
        attempts: budget.attempts,
    }
}

/// Resolve the storage URL of a raw recording within the budget.
pub async fn finalize_recording(
    storage: &dyn RecordingStorage,
    bucket: &str,
    raw: RawRecording,
    budget: RetryBudget,
) -> Recording {
    let name = raw.object_name();
    let uri = match poll_until_available(budget, || storage.object_url(&name, bucket)).await {
        Availability::Ready(uri) => {
            info!(target: "autopilot::recording", %name, "recording available");
            Some(uri)
        }
        Availability::Unavailable { attempts } => {
            warn!(
                target: "autopilot::recording",
                %name,
                attempts,
                "recording URI still unavailable; continuing without it"
            );
            None
        }
    };

    Recording {
        uri,
        filename: raw.filename,
        format: raw.format,
        key_pressed: raw.key_pressed,
    }
}
