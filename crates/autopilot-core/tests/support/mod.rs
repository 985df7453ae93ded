//! Scripted collaborators for driving whole sessions under a paused clock.

#![allow(dead_code)]

use async_trait::async_trait;
use autopilot_core::{
    AssistantConfig, Collaborators, ConversationSession, DialogueEngine, EngineSettings,
    GenerationEvent, GenerationStream, HangupTool, KnowledgeBase, KnowledgeError, LanguageModel,
    ModelError, ModelRequest, SessionConfig, SessionOrchestrator, Snippet, ToolCall,
    ToolRegistry,
};
use autopilot_voice::{
    PlaybackHandle, Playable, RecordOptions, Recording, Utterance, VadEvent, VoiceError,
    VoiceIo, VoiceResult,
};
use futures::{stream, StreamExt};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const GREETING: &str = "Hi! This is Olivia, your assistant. How can I help you?";
pub const GOODBYE: &str = "It was a pleasure to help you. Goodbye!";
pub const SYSTEM_ERROR: &str = "I'm sorry, I'm having trouble processing your request.";
pub const IDLE: &str = "Are you still there?";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> SessionConfig {
    SessionConfig {
        assistant: AssistantConfig {
            first_message: GREETING.into(),
            goodbye_message: GOODBYE.into(),
            system_template: "You are a useful assistant of Olive Garden Restaurant.".into(),
            system_error_message: SYSTEM_ERROR.into(),
            idle_message: IDLE.into(),
            idle_timeout: Duration::from_millis(10_000),
            max_idle_timeout_count: 3,
        },
        tools: vec!["hangup".into()],
        engine: EngineSettings::default(),
    }
}

/// What happened on the fake channel, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Started(String),
    Completed(String),
    Cancelled(String),
    Hangup,
}

/// A channel where every playback takes `play_duration` of (virtual) time.
pub struct FakeVoice {
    play_duration: Duration,
    log: Arc<Mutex<Vec<ChannelEvent>>>,
    utterances: tokio::sync::Mutex<mpsc::Receiver<Utterance>>,
    fail_play_at: Option<usize>,
    plays: AtomicUsize,
    hangups: AtomicUsize,
}

impl FakeVoice {
    pub fn new(play_duration: Duration) -> (Arc<Self>, mpsc::Sender<Utterance>) {
        Self::build(play_duration, None)
    }

    /// The `n`th call to `play` (1-based) fails as if the channel broke.
    pub fn failing_at(play_duration: Duration, n: usize) -> (Arc<Self>, mpsc::Sender<Utterance>) {
        Self::build(play_duration, Some(n))
    }

    fn build(play_duration: Duration, fail_play_at: Option<usize>) -> (Arc<Self>, mpsc::Sender<Utterance>) {
        let (tx, rx) = mpsc::channel(8);
        let voice = Arc::new(Self {
            play_duration,
            log: Arc::new(Mutex::new(Vec::new())),
            utterances: tokio::sync::Mutex::new(rx),
            fail_play_at,
            plays: AtomicUsize::new(0),
            hangups: AtomicUsize::new(0),
        });
        (voice, tx)
    }

    pub fn log(&self) -> Vec<ChannelEvent> {
        self.log.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.filter(|e| match e {
            ChannelEvent::Started(t) => Some(t.clone()),
            _ => None,
        })
    }

    pub fn completed(&self) -> Vec<String> {
        self.filter(|e| match e {
            ChannelEvent::Completed(t) => Some(t.clone()),
            _ => None,
        })
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.filter(|e| match e {
            ChannelEvent::Cancelled(t) => Some(t.clone()),
            _ => None,
        })
    }

    pub fn hangups(&self) -> usize {
        self.hangups.load(Ordering::SeqCst)
    }

    fn filter(&self, f: impl Fn(&ChannelEvent) -> Option<String>) -> Vec<String> {
        self.log.lock().unwrap().iter().filter_map(f).collect()
    }
}

#[async_trait]
impl VoiceIo for FakeVoice {
    async fn play(&self, content: Playable) -> VoiceResult<PlaybackHandle> {
        let n = self.plays.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_play_at == Some(n) {
            return Err(VoiceError::Playback("media server unreachable".into()));
        }
        let text = match content {
            Playable::Text(t) | Playable::Audio(t) => t,
        };
        self.log.lock().unwrap().push(ChannelEvent::Started(text.clone()));

        let (handle, completer) = PlaybackHandle::new();
        let log = self.log.clone();
        let duration = self.play_duration;
        tokio::spawn(async move {
            let cancelled = tokio::select! {
                _ = completer.cancelled() => true,
                _ = tokio::time::sleep(duration) => false,
            };
            if cancelled {
                log.lock().unwrap().push(ChannelEvent::Cancelled(text));
            } else {
                log.lock().unwrap().push(ChannelEvent::Completed(text));
                completer.complete();
            }
        });
        Ok(handle)
    }

    async fn capture(&self) -> VoiceResult<Utterance> {
        let mut rx = self.utterances.lock().await;
        match rx.recv().await {
            Some(utterance) => Ok(utterance),
            None => std::future::pending().await,
        }
    }

    async fn record(&self, _options: RecordOptions) -> VoiceResult<Recording> {
        Err(VoiceError::Recording("not supported by the fake channel".into()))
    }

    async fn hangup(&self) -> VoiceResult<()> {
        self.hangups.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(ChannelEvent::Hangup);
        Ok(())
    }
}

/// One step of a scripted generation: wait, then yield.
pub type Step = (Duration, Result<GenerationEvent, ModelError>);

pub fn say(text: &str) -> Step {
    (Duration::ZERO, Ok(GenerationEvent::TextDelta(text.into())))
}

pub fn say_after(delay: Duration, text: &str) -> Step {
    (delay, Ok(GenerationEvent::TextDelta(text.into())))
}

pub fn call_tool(name: &str, call_id: &str) -> Step {
    (
        Duration::ZERO,
        Ok(GenerationEvent::ToolCall(ToolCall::new(name, json!({}), call_id))),
    )
}

pub fn done() -> Step {
    (Duration::ZERO, Ok(GenerationEvent::Done))
}

/// Replays one script per model call. Once the scripts run out, every call
/// asks for the `lookup` tool again.
pub struct ScriptedModel {
    rounds: Mutex<VecDeque<Vec<Step>>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(rounds: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ModelRequest) -> Result<GenerationStream, ModelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let script = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![call_tool("lookup", &format!("loop-{}", n)), done()]);

        Ok(stream::iter(script)
            .then(|(delay, event)| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                event
            })
            .boxed())
    }
}

pub struct FailingKnowledge;

#[async_trait]
impl KnowledgeBase for FailingKnowledge {
    async fn query(&self, _text: &str, _k: usize) -> Result<Vec<Snippet>, KnowledgeError> {
        Err(KnowledgeError::Unavailable("vector store timed out".into()))
    }
}

/// A started session plus the handles a test uses to play the caller.
pub struct Call {
    pub orchestrator: SessionOrchestrator,
    pub voice: Arc<FakeVoice>,
    pub model: Arc<ScriptedModel>,
    pub vad: mpsc::UnboundedSender<VadEvent>,
    pub utterances: mpsc::Sender<Utterance>,
}

pub struct CallBuilder {
    config: SessionConfig,
    model: Arc<ScriptedModel>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    voice: Option<(Arc<FakeVoice>, mpsc::Sender<Utterance>)>,
    play_duration: Duration,
    extra_tools: Vec<(String, Arc<dyn autopilot_core::ToolHandler>)>,
}

impl CallBuilder {
    pub fn new(model: Arc<ScriptedModel>) -> Self {
        Self {
            config: config(),
            model,
            knowledge: None,
            voice: None,
            play_duration: Duration::from_secs(1),
            extra_tools: Vec::new(),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn knowledge(mut self, kb: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = Some(kb);
        self
    }

    pub fn voice(mut self, voice: (Arc<FakeVoice>, mpsc::Sender<Utterance>)) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn tool(mut self, name: &str, handler: Arc<dyn autopilot_core::ToolHandler>) -> Self {
        self.extra_tools.push((name.to_string(), handler));
        self
    }

    pub fn registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(
            "hangup",
            Arc::new(HangupTool::new(Some(self.config.assistant.goodbye_message.clone()))),
        );
        for (name, handler) in &self.extra_tools {
            tools.register(name.clone(), handler.clone());
        }
        tools
    }

    pub fn start(self) -> Call {
        init_tracing();
        let (voice, utterances) = match self.voice.clone() {
            Some(v) => v,
            None => FakeVoice::new(self.play_duration),
        };
        let engine = DialogueEngine::new(
            self.model.clone(),
            self.knowledge.clone(),
            Arc::new(self.registry()),
            self.config.engine.clone(),
        );
        let collaborators = Collaborators {
            voice: voice.clone(),
            engine,
        };
        let mut orchestrator =
            SessionOrchestrator::new(self.config, collaborators).expect("valid session");
        let (vad, vad_rx) = mpsc::unbounded_channel();
        orchestrator
            .start(ConversationSession::new(), vad_rx)
            .expect("first start");

        Call {
            orchestrator,
            voice,
            model: self.model,
            vad,
            utterances,
        }
    }
}

impl Call {
    /// Caller starts talking, finishes, and the channel transcribes it.
    pub async fn caller_says(&self, text: &str) {
        self.vad.send(VadEvent::speech_start()).expect("session alive");
        self.vad
            .send(VadEvent::speech_end(Duration::from_millis(900)))
            .expect("session alive");
        self.utterances
            .send(Utterance::now(text))
            .await
            .expect("capture alive");
    }
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
