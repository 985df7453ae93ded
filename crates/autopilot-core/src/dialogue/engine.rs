//! **DialogueEngine** - one caller turn in, a stream of speakable output out.
//!
//! Each turn runs as its own task. It grounds the prompt with knowledge
//! snippets, streams the model, and cuts text into sentences the controller
//! can start playing immediately. Tool calls are executed as they arrive, one
//! at a time, and their results fed back to the model until it answers in
//! plain text. Cancelling the turn's token drops the model stream at its next
//! suspension point.

use super::context::{history_messages, system_prompt};
use super::sentence::SentenceBuffer;
use crate::config::EngineSettings;
use crate::error::{KnowledgeError, ModelError, ToolError, TurnError};
use crate::knowledge::KnowledgeBase;
use crate::model::{ContextMessage, GenerationEvent, LanguageModel, ModelRequest, ToolCall};
use crate::session::{Speaker, TurnEntry};
use crate::tools::{ToolContext, ToolInvocation, ToolRegistry, ToolResult};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a turn produces, in order. Every turn that is not cancelled ends
/// with exactly one of `Completed`, `EndSession` or `Failed`.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Ready to speak
    Sentence(String),
    /// A tool ran; the controller records it in the history
    ToolInvoked { call: ToolCall, result: ToolResult },
    /// A tool asked to end the call. Nothing follows.
    EndSession {
        tool: String,
        closing_message: Option<String>,
    },
    Completed,
    Failed(TurnError),
}

impl EngineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineEvent::Completed | EngineEvent::EndSession { .. } | EngineEvent::Failed(_)
        )
    }
}

/// Input for one turn.
pub struct TurnRequest {
    pub history: Vec<TurnEntry>,
    pub system_template: String,
    /// Tools the model may call this turn
    pub tools: Vec<String>,
    pub tool_ctx: ToolContext,
    pub cancel: CancellationToken,
}

#[derive(Clone)]
pub struct DialogueEngine {
    model: Arc<dyn LanguageModel>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    tools: Arc<ToolRegistry>,
    settings: EngineSettings,
}

impl DialogueEngine {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        knowledge: Option<Arc<dyn KnowledgeBase>>,
        tools: Arc<ToolRegistry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            model,
            knowledge,
            tools,
            settings,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Start a turn. Events arrive on the returned channel; dropping the
    /// receiver or cancelling `request.cancel` abandons the turn.
    pub fn generate(&self, request: TurnRequest) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(32);
        let engine = self.clone();

        tokio::spawn(async move {
            let cancel = request.cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(target: "autopilot::dialogue", "turn cancelled");
                }
                _ = engine.run(request, tx) => {}
            }
        });

        rx
    }

    async fn run(&self, request: TurnRequest, tx: mpsc::Sender<EngineEvent>) {
        let out = Emitter { tx };
        match self.run_turn(&request, &out).await {
            Ok(()) => {}
            Err(Stop::Detached) => {
                debug!(target: "autopilot::dialogue", "turn receiver dropped");
            }
            Err(Stop::Failed(e)) => {
                warn!(target: "autopilot::dialogue", "turn failed: {}", e);
                let _ = out.emit(EngineEvent::Failed(e)).await;
            }
        }
    }

    async fn run_turn(&self, request: &TurnRequest, out: &Emitter) -> Result<(), Stop> {
        let snippets = match (&self.knowledge, last_caller(&request.history)) {
            (Some(kb), Some(text)) => kb.query(text, self.settings.knowledge_top_k).await?,
            _ => Vec::new(),
        };
        debug!(target: "autopilot::dialogue", snippets = snippets.len(), "context assembled");

        let mut model_request = ModelRequest {
            system_prompt: system_prompt(&request.system_template, &snippets),
            messages: history_messages(&request.history),
            tools: self.tools.specs_for(&request.tools),
        };

        let max_rounds = self.settings.max_tool_iterations;
        let mut tool_rounds = 0usize;

        loop {
            let mut stream = self.model.stream(model_request.clone()).await?;
            let mut sentences = SentenceBuffer::new(self.settings.min_sentence_chars);
            let mut text = String::new();
            let mut calls: Vec<(ToolCall, ToolResult)> = Vec::new();

            while let Some(event) = stream.next().await {
                match event? {
                    GenerationEvent::TextDelta(delta) => {
                        text.push_str(&delta);
                        for sentence in sentences.push(&delta) {
                            out.emit(EngineEvent::Sentence(sentence)).await?;
                        }
                    }
                    GenerationEvent::ToolCall(call) => {
                        if calls.is_empty() {
                            tool_rounds += 1;
                            if tool_rounds > max_rounds {
                                return Err(TurnError::ToolLoopExceeded(max_rounds).into());
                            }
                        }
                        // Speak what came before the call while the tool runs.
                        if let Some(rest) = sentences.finish() {
                            out.emit(EngineEvent::Sentence(rest)).await?;
                        }

                        let invocation = self.invoke_tool(&call, request).await;
                        out.emit(EngineEvent::ToolInvoked {
                            call: call.clone(),
                            result: invocation.result.clone(),
                        })
                        .await?;

                        if let Some(end) = invocation.end_session {
                            info!(target: "autopilot::dialogue", tool = %call.name, "tool ended the session");
                            out.emit(EngineEvent::EndSession {
                                tool: call.name,
                                closing_message: end.closing_message,
                            })
                            .await?;
                            return Ok(());
                        }
                        calls.push((call, invocation.result));
                    }
                    GenerationEvent::Done => break,
                }
            }
            drop(stream);

            if let Some(rest) = sentences.finish() {
                out.emit(EngineEvent::Sentence(rest)).await?;
            }
            if calls.is_empty() {
                out.emit(EngineEvent::Completed).await?;
                return Ok(());
            }

            debug!(
                target: "autopilot::dialogue",
                round = tool_rounds,
                calls = calls.len(),
                "re-issuing model call with tool results"
            );
            model_request.messages.push(ContextMessage::Assistant {
                content: text,
                tool_calls: calls.iter().map(|(c, _)| c.clone()).collect(),
            });
            for (call, result) in calls {
                model_request.messages.push(ContextMessage::Tool {
                    call_id: call.call_id,
                    content: result.context_text(),
                });
            }
        }
    }

    async fn invoke_tool(&self, call: &ToolCall, request: &TurnRequest) -> ToolInvocation {
        if !request.tools.iter().any(|t| t == &call.name) {
            warn!(target: "autopilot::dialogue", tool = %call.name, "model called a tool outside this session");
            return ToolInvocation::failed(&call.call_id, ToolError::UnknownTool(call.name.clone()));
        }
        self.tools.invoke(call, &request.tool_ctx).await
    }
}

fn last_caller(history: &[TurnEntry]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|e| e.speaker == Speaker::Caller)
        .map(|e| e.content.as_str())
}

enum Stop {
    Failed(TurnError),
    /// Nobody is listening anymore
    Detached,
}

impl From<TurnError> for Stop {
    fn from(e: TurnError) -> Self {
        Stop::Failed(e)
    }
}

impl From<ModelError> for Stop {
    fn from(e: ModelError) -> Self {
        Stop::Failed(e.into())
    }
}

impl From<KnowledgeError> for Stop {
    fn from(e: KnowledgeError) -> Self {
        Stop::Failed(e.into())
    }
}

struct Emitter {
    tx: mpsc::Sender<EngineEvent>,
}

impl Emitter {
    async fn emit(&self, event: EngineEvent) -> Result<(), Stop> {
        self.tx.send(event).await.map_err(|_| Stop::Detached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GenerationStream;
    use crate::tools::{HangupTool, ToolHandler, ToolOutcome, ToolOutput, ToolSpec};
    use async_trait::async_trait;
    use autopilot_voice::{
        PlaybackHandle, Playable, RecordOptions, Recording, Utterance, VoiceError, VoiceIo,
        VoiceResult,
    };
    use futures::stream;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_stream::wrappers::ReceiverStream;
    use uuid::Uuid;

    /// Replays one scripted event list per model call.
    struct Scripted {
        rounds: Mutex<VecDeque<Vec<GenerationEvent>>>,
        calls: AtomicUsize,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl Scripted {
        fn new(rounds: Vec<Vec<GenerationEvent>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, request: ModelRequest) -> Result<GenerationStream, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let round = self.rounds.lock().unwrap().pop_front().unwrap_or_else(|| {
                vec![GenerationEvent::ToolCall(ToolCall::new("echo", json!({}), "again"))]
            });
            Ok(stream::iter(round.into_iter().map(Ok)).boxed())
        }
    }

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("echo", "Echo arguments", json!({"type": "object"}))
        }

        async fn invoke(&self, _ctx: &ToolContext, arguments: Value) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::content(arguments.to_string()))
        }
    }

    struct Silent;

    #[async_trait]
    impl VoiceIo for Silent {
        async fn play(&self, _content: Playable) -> VoiceResult<PlaybackHandle> {
            Ok(PlaybackHandle::finished_immediately())
        }
        async fn capture(&self) -> VoiceResult<Utterance> {
            std::future::pending().await
        }
        async fn record(&self, _options: RecordOptions) -> VoiceResult<Recording> {
            Err(VoiceError::Recording("unsupported".into()))
        }
        async fn hangup(&self) -> VoiceResult<()> {
            Ok(())
        }
    }

    fn engine(model: Arc<Scripted>, max_tool_iterations: usize) -> DialogueEngine {
        let mut tools = ToolRegistry::new();
        tools.register("echo", Arc::new(Echo));
        tools.register("hangup", Arc::new(HangupTool::new(Some("Bye now!".into()))));
        DialogueEngine::new(
            model,
            None,
            Arc::new(tools),
            EngineSettings {
                max_tool_iterations,
                ..EngineSettings::default()
            },
        )
    }

    fn request(cancel: CancellationToken) -> TurnRequest {
        TurnRequest {
            history: vec![TurnEntry::caller("hello")],
            system_template: "Be brief.".into(),
            tools: vec!["echo".into(), "hangup".into()],
            tool_ctx: ToolContext {
                session_id: Uuid::new_v4(),
                voice: Arc::new(Silent),
            },
            cancel,
        }
    }

    async fn drain(rx: mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        ReceiverStream::new(rx).collect().await
    }

    fn text(s: &str) -> GenerationEvent {
        GenerationEvent::TextDelta(s.into())
    }

    #[tokio::test]
    async fn streams_sentences_then_completes() {
        let model = Scripted::new(vec![vec![
            text("Hi there. "),
            text("What can I"),
            text(" do for you?"),
            GenerationEvent::Done,
        ]]);
        let events = drain(engine(model, 5).generate(request(CancellationToken::new()))).await;

        let sentences: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Sentence(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(sentences, vec!["Hi there.", "What can I do for you?"]);
        assert!(matches!(events.last(), Some(EngineEvent::Completed)));
    }

    #[tokio::test]
    async fn tool_result_is_fed_back_to_the_model() {
        let model = Scripted::new(vec![
            vec![
                GenerationEvent::ToolCall(ToolCall::new("echo", json!({"x": 1}), "c1")),
                GenerationEvent::Done,
            ],
            vec![text("Done."), GenerationEvent::Done],
        ]);
        let events = drain(engine(model.clone(), 5).generate(request(CancellationToken::new()))).await;

        assert!(matches!(&events[0], EngineEvent::ToolInvoked { call, .. } if call.call_id == "c1"));
        assert!(matches!(events.last(), Some(EngineEvent::Completed)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        let requests = model.requests.lock().unwrap();
        let second = &requests[1].messages;
        assert_eq!(
            second.last(),
            Some(&ContextMessage::Tool {
                call_id: "c1".into(),
                content: "{\"x\":1}".into()
            })
        );
    }

    #[tokio::test]
    async fn hangup_short_circuits_without_another_round() {
        let model = Scripted::new(vec![vec![
            GenerationEvent::ToolCall(ToolCall::new("hangup", json!({}), "h1")),
            text("this is never spoken"),
            GenerationEvent::Done,
        ]]);
        let events = drain(engine(model.clone(), 5).generate(request(CancellationToken::new()))).await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.len(), 2);
        match &events[1] {
            EngineEvent::EndSession {
                tool,
                closing_message,
            } => {
                assert_eq!(tool, "hangup");
                assert_eq!(closing_message.as_deref(), Some("Bye now!"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn runaway_tool_loop_fails_the_turn() {
        // Every round asks for another tool call.
        let model = Scripted::new(vec![]);
        let events = drain(engine(model.clone(), 3).generate(request(CancellationToken::new()))).await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 4);
        let invoked = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::ToolInvoked { .. }))
            .count();
        assert_eq!(invoked, 3);
        assert!(matches!(
            events.last(),
            Some(EngineEvent::Failed(TurnError::ToolLoopExceeded(3)))
        ));
    }

    #[tokio::test]
    async fn tool_outside_session_is_an_error_result() {
        let model = Scripted::new(vec![
            vec![GenerationEvent::ToolCall(ToolCall::new("teleport", json!({}), "t1"))],
            vec![text("Sorry, I can't."), GenerationEvent::Done],
        ]);
        let events = drain(engine(model, 5).generate(request(CancellationToken::new()))).await;
        match &events[0] {
            EngineEvent::ToolInvoked { result, .. } => {
                assert!(matches!(result.output, ToolOutput::Error(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(events.last(), Some(EngineEvent::Completed)));
    }

    #[tokio::test]
    async fn cancelled_turn_emits_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let model = Scripted::new(vec![vec![text("Hello. "), GenerationEvent::Done]]);
        let events = drain(engine(model, 5).generate(request(cancel))).await;
        assert!(events.is_empty());
    }
}
