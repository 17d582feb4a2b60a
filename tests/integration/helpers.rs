//! Shared helpers for integration tests.
//!
//! Deterministic stand-ins for the microphone, engines and speaker, plus a
//! harness that runs the whole pipeline against them.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voice_assist::audio::capture::AudioSource;
use voice_assist::audio::playback::AudioSink;
use voice_assist::config::AssistantConfig;
use voice_assist::dialogue::DialogueAgent;
use voice_assist::history::ConversationStore;
use voice_assist::llm::{ChatMessage, ConversationEngine, ReplyStream, Role, ToolReply};
use voice_assist::pipeline::messages::AudioBlock;
use voice_assist::stt::{SpeechToText, SttSegment};
use voice_assist::tools::ToolDefinition;
use voice_assist::tts::{SpeechSynthesizer, Synthesized};
use voice_assist::{AssistantError, Command, PipelineCoordinator, PipelineEvent, Result};

pub(crate) const SAMPLE_RATE: u32 = 16_000;
/// 100 ms blocks at 16 kHz, the default segmenter geometry.
pub(crate) const BLOCK_SIZE: usize = 1_600;
const USER_ID: &str = "tester";
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Three loud blocks followed by the eleven silent blocks that end a segment.
pub(crate) fn utterance() -> Vec<AudioBlock> {
    let block = |level: f32| AudioBlock {
        samples: vec![level; BLOCK_SIZE],
        sample_rate: SAMPLE_RATE,
        captured_at: Instant::now(),
    };
    let mut blocks: Vec<AudioBlock> = (0..3).map(|_| block(0.5)).collect();
    blocks.extend((0..11).map(|_| block(0.0)));
    blocks
}

/// Microphone fed one utterance at a time by the test.
struct ScriptedMic {
    rx: mpsc::UnboundedReceiver<Vec<AudioBlock>>,
    pending: VecDeque<AudioBlock>,
}

#[async_trait]
impl AudioSource for ScriptedMic {
    async fn next_block(&mut self) -> Result<Option<AudioBlock>> {
        loop {
            if let Some(block) = self.pending.pop_front() {
                return Ok(Some(block));
            }
            match self.rx.recv().await {
                Some(blocks) => self.pending.extend(blocks),
                None => return Ok(None),
            }
        }
    }
}

/// Returns scripted transcripts in order; silence once the script runs out.
struct ScriptedStt {
    transcripts: VecDeque<Result<String>>,
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn transcribe(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<Vec<SttSegment>> {
        match self.transcripts.pop_front() {
            Some(Ok(text)) if text.is_empty() => Ok(Vec::new()),
            Some(Ok(text)) => Ok(vec![SttSegment { text }]),
            Some(Err(e)) => Err(e),
            None => Ok(Vec::new()),
        }
    }
}

/// Streams scripted reply fragments and records every history it is shown.
struct ScriptedLlm {
    replies: VecDeque<Result<Vec<String>>>,
    seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

#[async_trait]
impl ConversationEngine for ScriptedLlm {
    async fn stream_reply(&mut self, history: &[ChatMessage]) -> Result<ReplyStream> {
        self.seen.lock().unwrap().push(history.to_vec());
        let fragments = self
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(AssistantError::Llm("no scripted reply".into())))?;
        Ok(futures_util::stream::iter(fragments.into_iter().map(Ok)).boxed())
    }

    async fn request_tool_call(
        &mut self,
        _history: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ToolReply> {
        Ok(ToolReply::Text(String::new()))
    }
}

/// Logs every sentence it is asked to speak and encodes the 1-based log
/// position in the samples, so the sink can tell sentences apart.
struct TaggingTts {
    spoken: Arc<Mutex<Vec<String>>>,
    failing: Vec<String>,
}

#[async_trait]
impl SpeechSynthesizer for TaggingTts {
    async fn synthesize(&mut self, text: &str) -> Result<Synthesized> {
        if self.failing.iter().any(|f| f == text) {
            return Err(AssistantError::Tts(format!("cannot say {text:?}")));
        }
        let mut spoken = self.spoken.lock().unwrap();
        spoken.push(text.to_owned());
        Ok((vec![spoken.len() as f32; 160], SAMPLE_RATE))
    }

    fn name(&self) -> String {
        "tagging".into()
    }
}

/// Records the tag of every response played; optionally holds the first
/// playback until released.
struct RecordingSink {
    played: Arc<Mutex<Vec<usize>>>,
    hold_first: Option<Arc<Notify>>,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&mut self, samples: &[f32], _sample_rate: u32) -> Result<()> {
        if let Some(gate) = self.hold_first.take() {
            gate.notified().await;
        }
        let tag = samples.first().copied().unwrap_or_default() as usize;
        self.played.lock().unwrap().push(tag);
        Ok(())
    }
}

/// What the fake engines will do, in order.
#[derive(Default)]
pub(crate) struct Script {
    pub transcripts: Vec<Result<String>>,
    pub replies: Vec<Result<Vec<String>>>,
    pub failing_sentences: Vec<String>,
    pub hold_first_playback: bool,
}

/// A running pipeline wired to fakes.
pub(crate) struct Harness {
    mic: mpsc::UnboundedSender<Vec<AudioBlock>>,
    events: broadcast::Receiver<PipelineEvent>,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
    seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    spoken: Arc<Mutex<Vec<String>>>,
    played: Arc<Mutex<Vec<usize>>>,
    playback_gate: Arc<Notify>,
    history_path: PathBuf,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub(crate) fn start(script: Script) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let history_path = dir.path().join("context.json");
        let mut config = AssistantConfig::default();
        config.history.path = history_path.clone();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let played = Arc::new(Mutex::new(Vec::new()));
        let playback_gate = Arc::new(Notify::new());

        let (mic, mic_rx) = mpsc::unbounded_channel();
        let source = ScriptedMic {
            rx: mic_rx,
            pending: VecDeque::new(),
        };
        let stt = ScriptedStt {
            transcripts: script.transcripts.into(),
        };
        let llm = ScriptedLlm {
            replies: script.replies.into(),
            seen: Arc::clone(&seen),
        };
        let store = ConversationStore::open(&history_path).expect("open history");
        let agent = DialogueAgent::new(Box::new(llm), store, USER_ID, "You are a test assistant.")
            .expect("create agent");
        let tts = TaggingTts {
            spoken: Arc::clone(&spoken),
            failing: script.failing_sentences,
        };
        let sink = RecordingSink {
            played: Arc::clone(&played),
            hold_first: script
                .hold_first_playback
                .then(|| Arc::clone(&playback_gate)),
        };

        let (events_tx, events) = broadcast::channel(256);
        let (commands, command_rx) = mpsc::channel(8);
        let pipeline = PipelineCoordinator::new(config)
            .with_audio_source(Box::new(source))
            .with_stt(Box::new(stt))
            .with_agent(agent)
            .with_synthesizer(Box::new(tts))
            .with_sink(Box::new(sink))
            .with_command_source(command_rx)
            .with_events(events_tx)
            .with_console_output(false);
        let cancel = pipeline.cancel_token();
        let handle = tokio::spawn(pipeline.run());

        Self {
            mic,
            events,
            commands,
            cancel,
            handle,
            seen,
            spoken,
            played,
            playback_gate,
            history_path,
            _dir: dir,
        }
    }

    /// Feed one utterance to the microphone.
    pub(crate) fn speak(&self) {
        self.mic.send(utterance()).expect("mic closed");
    }

    /// Type a command as if on stdin.
    pub(crate) async fn type_command(&self, command: Command) {
        self.commands.send(command).await.expect("controller gone");
    }

    /// Let the held first playback finish.
    pub(crate) fn release_playback(&self) {
        self.playback_gate.notify_one();
    }

    /// Receive events until one matches `pred`; returns everything received.
    pub(crate) async fn wait_for(
        &mut self,
        pred: impl Fn(&PipelineEvent) -> bool,
    ) -> Vec<PipelineEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for event; saw {seen:?}"))
                .expect("event channel closed");
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Poll `cond` until it holds.
    pub(crate) async fn wait_until(&self, what: &str, cond: impl Fn(&Self) -> bool) {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        while !cond(self) {
            assert!(Instant::now() < deadline, "timed out waiting until {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Sentences handed to the synthesizer, in order.
    pub(crate) fn synthesized(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    /// Sentences that reached the speaker, in order.
    pub(crate) fn played(&self) -> Vec<String> {
        let spoken = self.spoken.lock().unwrap();
        self.played
            .lock()
            .unwrap()
            .iter()
            .map(|tag| spoken[tag - 1].clone())
            .collect()
    }

    /// Number of dialogue turns the engine was asked for.
    pub(crate) fn engine_calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// History the engine was shown on its most recent call.
    pub(crate) fn last_history_seen(&self) -> Vec<ChatMessage> {
        self.seen.lock().unwrap().last().cloned().unwrap_or_default()
    }

    /// Persisted history as `(role, content)` pairs.
    pub(crate) fn persisted(&self) -> Vec<(Role, String)> {
        let store = ConversationStore::open(&self.history_path).expect("reopen history");
        store
            .history(USER_ID)
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    /// Cancel the pipeline and wait for it to stop.
    pub(crate) async fn join(self) {
        self.cancel.cancel();
        tokio::time::timeout(EVENT_TIMEOUT, self.handle)
            .await
            .expect("pipeline did not stop")
            .expect("pipeline task panicked")
            .expect("pipeline returned an error");
    }
}

pub(crate) fn is_turn_complete(e: &PipelineEvent) -> bool {
    matches!(e, PipelineEvent::TurnComplete)
}

pub(crate) fn texts(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| (*s).to_owned()).collect()
}
