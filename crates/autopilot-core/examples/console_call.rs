//! Talk to the autopilot from a terminal.
//!
//! Every line typed on stdin is one caller utterance; assistant speech is
//! printed and "plays" for a time proportional to its length, so typing while
//! it plays is a barge-in. EOF hangs up from the caller side, CTRL-C stops the
//! session from the host side.
//!
//! ```text
//! OPENAI_API_KEY=... cargo run -p autopilot-core --example console_call
//! AUTOPILOT_KNOWLEDGE_DIR=./kb RUST_LOG=autopilot=debug cargo run ...
//! ```

use async_trait::async_trait;
use autopilot_core::{
    Collaborators, ConversationSession, DialogueEngine, HangupTool, KnowledgeBase, OpenAiModel,
    SessionConfig, SessionOrchestrator, StaticKnowledgeBase, ToolRegistry,
};
use autopilot_voice::{
    PlaybackHandle, Playable, RecordOptions, Recording, Utterance, VadEvent, VoiceError, VoiceIo,
    VoiceResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Per-character speaking time.
const CHAR_TIME: Duration = Duration::from_millis(40);

struct ConsoleVoice {
    utterances: Mutex<mpsc::Receiver<Utterance>>,
}

#[async_trait]
impl VoiceIo for ConsoleVoice {
    async fn play(&self, content: Playable) -> VoiceResult<PlaybackHandle> {
        let text = match content {
            Playable::Text(text) => text,
            Playable::Audio(uri) => format!("<audio {}>", uri),
        };
        println!("🤖 {}", text);

        let (handle, completer) = PlaybackHandle::new();
        let length = CHAR_TIME * text.chars().count() as u32;
        tokio::spawn(async move {
            let interrupted = tokio::select! {
                _ = completer.cancelled() => true,
                _ = tokio::time::sleep(length) => false,
            };
            if interrupted {
                println!("   …(interrupted)");
            } else {
                completer.complete();
            }
        });
        Ok(handle)
    }

    async fn capture(&self) -> VoiceResult<Utterance> {
        self.utterances
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| VoiceError::ChannelClosed("stdin closed".into()))
    }

    async fn record(&self, _options: RecordOptions) -> VoiceResult<Recording> {
        Err(VoiceError::Recording("the console cannot record".into()))
    }

    async fn hangup(&self) -> VoiceResult<()> {
        println!("📴 call released");
        Ok(())
    }
}

/// Feed stdin lines in as speech: a start/end pair for the detector, then the
/// transcript for capture.
fn spawn_stdin_caller(vad: mpsc::UnboundedSender<VadEvent>, utterances: mpsc::Sender<Utterance>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let speech = CHAR_TIME * line.chars().count() as u32;
            if vad.send(VadEvent::speech_start()).is_err()
                || vad.send(VadEvent::speech_end(speech)).is_err()
                || utterances.send(Utterance::now(line)).await.is_err()
            {
                break;
            }
        }
        tracing::debug!("stdin closed");
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[console_call] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "autopilot=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = SessionConfig::load()?;

    let mut tools = ToolRegistry::new();
    tools.register(
        "hangup",
        Arc::new(HangupTool::new(Some(config.assistant.goodbye_message.clone()))),
    );

    let knowledge: Option<Arc<dyn KnowledgeBase>> = match std::env::var("AUTOPILOT_KNOWLEDGE_DIR") {
        Ok(dir) => {
            let kb = StaticKnowledgeBase::load_dir(&dir)?;
            tracing::info!(dir = %dir, paragraphs = kb.len(), "knowledge loaded");
            Some(Arc::new(kb))
        }
        Err(_) => None,
    };

    let engine = DialogueEngine::new(
        Arc::new(OpenAiModel::from_env()?),
        knowledge,
        Arc::new(tools),
        config.engine.clone(),
    );

    let (utterance_tx, utterance_rx) = mpsc::channel(8);
    let (vad_tx, vad_rx) = mpsc::unbounded_channel();
    let voice = Arc::new(ConsoleVoice {
        utterances: Mutex::new(utterance_rx),
    });

    let mut autopilot = SessionOrchestrator::new(config, Collaborators { voice, engine })?;
    autopilot.start(ConversationSession::new(), vad_rx)?;
    spawn_stdin_caller(vad_tx, utterance_tx);

    let stop = autopilot.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop("CTRL-C");
        }
    });

    let summary = autopilot.wait().await?;
    println!();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
