//! Pipeline orchestrator: wires the stages together and runs one task per stage.
//!
//! ```text
//! source → segmenter → transcription ─┬─ command → controller
//!              ▲                      └─ dialogue → synthesis → playback → sink
//!              └──────────────── echo reference ◄──────────────────┘
//! ```
//!
//! Dialogue, synthesis and playback are gated on the run state: they check
//! it before taking each item and drop items stamped with an older epoch.
//! Segmenter and transcription always run, so spoken commands are heard
//! while paused and while a reply is playing. Speech completed during a
//! reply is otherwise dropped.

use crate::audio::capture::AudioSource;
use crate::audio::playback::AudioSink;
use crate::audio::wav::DebugRecorder;
use crate::config::AssistantConfig;
use crate::dialogue::DialogueAgent;
use crate::error::{AssistantError, Result};
use crate::pipeline::controller::{Command, PipelineController};
use crate::pipeline::messages::{
    AudioResponse, EchoFrame, Envelope, PipelineEvent, SentenceUnit, SpeechSegment, StreamItem,
    Transcript,
};
use crate::pipeline::queue::StageQueue;
use crate::pipeline::state::{RunMode, RunState, SpeakingSignal, TurnLatch, run_state};
use crate::stt::{SpeechToText, Transcriber};
use crate::tts::{SpeechSynthesizer, sanitize_for_speech};
use crate::vad::SpeechSegmenter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffer between the dialogue agent and its queue forwarder.
const SENTENCE_FORWARD_SIZE: usize = 8;

/// Pipeline operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// Full conversation: capture → segment → transcribe → dialogue → synthesis → playback.
    #[default]
    Conversation,
    /// Transcription only: capture → segment → transcribe → print.
    TranscribeOnly,
}

/// Orchestrates the full speech-to-speech pipeline.
pub struct PipelineCoordinator {
    config: AssistantConfig,
    cancel: CancellationToken,
    mode: PipelineMode,
    source: Option<Box<dyn AudioSource>>,
    stt: Option<Box<dyn SpeechToText>>,
    agent: Option<DialogueAgent>,
    synthesizer: Option<Box<dyn SpeechSynthesizer>>,
    sink: Option<Box<dyn AudioSink>>,
    recorder: Option<Arc<DebugRecorder>>,
    command_rx: Option<mpsc::Receiver<Command>>,
    events: Option<broadcast::Sender<PipelineEvent>>,
    console_output: bool,
}

impl PipelineCoordinator {
    /// Create a coordinator. Engines are attached with the `with_*` methods.
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            mode: PipelineMode::Conversation,
            source: None,
            stt: None,
            agent: None,
            synthesizer: None,
            sink: None,
            recorder: None,
            command_rx: None,
            events: None,
            console_output: true,
        }
    }

    /// Set the pipeline operating mode.
    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Microphone (or any other block source).
    pub fn with_audio_source(mut self, source: Box<dyn AudioSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Speech-to-text engine.
    pub fn with_stt(mut self, stt: Box<dyn SpeechToText>) -> Self {
        self.stt = Some(stt);
        self
    }

    /// Dialogue agent. Required in [`PipelineMode::Conversation`].
    pub fn with_agent(mut self, agent: DialogueAgent) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Speech synthesiser. Required in [`PipelineMode::Conversation`].
    pub fn with_synthesizer(mut self, synthesizer: Box<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Speaker output. Required in [`PipelineMode::Conversation`].
    pub fn with_sink(mut self, sink: Box<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Write debug artifacts for every segment, transcript and response.
    pub fn with_debug_recorder(mut self, recorder: DebugRecorder) -> Self {
        self.recorder = Some(Arc::new(recorder));
        self
    }

    /// External command source (typically stdin), served alongside spoken commands.
    pub fn with_command_source(mut self, rx: mpsc::Receiver<Command>) -> Self {
        self.command_rx = Some(rx);
        self
    }

    /// Attach an event broadcaster for front ends and tests.
    pub fn with_events(mut self, tx: broadcast::Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Enable or disable printing transcripts to stdout in transcribe-only mode.
    pub fn with_console_output(mut self, enabled: bool) -> Self {
        self.console_output = enabled;
        self
    }

    /// Get a clone of the cancellation token for external use.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request graceful shutdown of the pipeline.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the pipeline until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Pipeline`] if a component the mode needs
    /// was not attached.
    pub async fn run(mut self) -> Result<()> {
        info!("starting voice pipeline (mode: {:?})", self.mode);

        let source = take_component(&mut self.source, "audio source")?;
        let stt = take_component(&mut self.stt, "speech-to-text engine")?;

        let caps = self.config.pipeline.clone();
        let segment_q: StageQueue<SpeechSegment> =
            StageQueue::new("segment", caps.segment_capacity);
        let speaking = SpeakingSignal::new();
        let turn = TurnLatch::new();
        let cancel = self.cancel.clone();
        let ctx = StageContext {
            cancel: cancel.clone(),
            events: self.events.clone(),
            recorder: self.recorder.clone(),
        };
        let segmenter = SpeechSegmenter::new(&self.config.segmenter)
            .with_signals(speaking.clone(), turn.clone());

        match self.mode {
            PipelineMode::Conversation => {
                let agent = take_component(&mut self.agent, "dialogue agent")?;
                let synthesizer = take_component(&mut self.synthesizer, "speech synthesizer")?;
                let sink = take_component(&mut self.sink, "audio sink")?;

                let transcript_q: StageQueue<Envelope<Transcript>> =
                    StageQueue::new("transcript", caps.transcript_capacity);
                let sentence_q: StageQueue<Envelope<SentenceUnit>> =
                    StageQueue::new("sentence", caps.sentence_capacity);
                let audio_q: StageQueue<Envelope<AudioResponse>> =
                    StageQueue::new("audio", caps.audio_capacity);
                let echo_q: StageQueue<EchoFrame> = StageQueue::new("echo", caps.echo_capacity);
                let segmenter = segmenter.with_echo(echo_q.clone());

                let (writer, run) = run_state();
                let mut controller = PipelineController::new(writer, turn.clone())
                    .with_queue(transcript_q.clone())
                    .with_queue(sentence_q.clone())
                    .with_queue(audio_q.clone())
                    .with_queue(echo_q.clone());
                if let Some(tx) = &self.events {
                    controller = controller.with_events(tx.clone());
                }
                let (spoken_tx, spoken_rx) = mpsc::unbounded_channel::<Command>();

                // Controller
                let controller_handle = {
                    let external = self.command_rx.take();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        controller.run(spoken_rx, external, cancel).await;
                    })
                };

                // Stage 1: segmenter (always)
                let segmenter_handle = {
                    let ctx = ctx.clone();
                    let tx = segment_q.clone();
                    tokio::spawn(async move {
                        run_segmenter_stage(segmenter, source, tx, ctx).await;
                    })
                };

                // Stage 2: transcription (always)
                let transcription_handle = {
                    let stage = TranscriptionStage {
                        transcriber: Transcriber::new(stt),
                        output: TranscriptOutput::Dialogue {
                            tx: transcript_q.clone(),
                            spoken_tx,
                            run: run.clone(),
                        },
                        turn: turn.clone(),
                        ctx: ctx.clone(),
                    };
                    let rx = segment_q.clone();
                    tokio::spawn(async move {
                        run_transcription_stage(stage, rx).await;
                    })
                };

                // Stage 3: dialogue (gated)
                let dialogue_handle = {
                    let ctx = ctx.clone();
                    let run = run.clone();
                    let rx = transcript_q.clone();
                    let tx = sentence_q.clone();
                    tokio::spawn(async move {
                        run_dialogue_stage(agent, rx, tx, run, ctx).await;
                    })
                };

                // Stage 4: synthesis (gated)
                let synthesis_handle = {
                    let ctx = ctx.clone();
                    let run = run.clone();
                    let rx = sentence_q.clone();
                    let tx = audio_q.clone();
                    tokio::spawn(async move {
                        run_synthesis_stage(synthesizer, rx, tx, run, ctx).await;
                    })
                };

                // Stage 5: playback (gated)
                let playback_handle = {
                    let ctl = PlaybackStageControl {
                        echo: echo_q.clone(),
                        speaking: speaking.clone(),
                        turn: turn.clone(),
                        run: run.clone(),
                        ctx: ctx.clone(),
                    };
                    let rx = audio_q.clone();
                    tokio::spawn(async move {
                        run_playback_stage(sink, rx, ctl).await;
                    })
                };

                cancel.cancelled().await;
                info!("pipeline shutting down");
                let _ = tokio::join!(
                    controller_handle,
                    segmenter_handle,
                    transcription_handle,
                    dialogue_handle,
                    synthesis_handle,
                    playback_handle,
                );
                speaking.set(false);
            }
            PipelineMode::TranscribeOnly => {
                if self.command_rx.take().is_some() {
                    debug!("command source ignored in transcribe-only mode");
                }

                let segmenter_handle = {
                    let ctx = ctx.clone();
                    let tx = segment_q.clone();
                    tokio::spawn(async move {
                        run_segmenter_stage(segmenter, source, tx, ctx).await;
                    })
                };

                let transcription_handle = {
                    let stage = TranscriptionStage {
                        transcriber: Transcriber::new(stt),
                        output: TranscriptOutput::Console {
                            enabled: self.console_output,
                        },
                        turn: turn.clone(),
                        ctx: ctx.clone(),
                    };
                    let rx = segment_q.clone();
                    tokio::spawn(async move {
                        run_transcription_stage(stage, rx).await;
                    })
                };

                cancel.cancelled().await;
                info!("pipeline shutting down");
                let _ = tokio::join!(segmenter_handle, transcription_handle);
            }
        }

        info!("pipeline shutdown complete");
        Ok(())
    }
}

fn take_component<T>(slot: &mut Option<T>, what: &str) -> Result<T> {
    slot.take()
        .ok_or_else(|| AssistantError::Pipeline(format!("no {what} configured")))
}

/// Shared handles every stage task carries.
#[derive(Clone)]
struct StageContext {
    cancel: CancellationToken,
    events: Option<broadcast::Sender<PipelineEvent>>,
    recorder: Option<Arc<DebugRecorder>>,
}

impl StageContext {
    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Write a debug artifact if recording is enabled. Failures are logged only.
    fn record(&self, what: &str, write: impl FnOnce(&DebugRecorder) -> Result<PathBuf>) {
        if let Some(recorder) = &self.recorder {
            match write(recorder) {
                Ok(path) => debug!(path = %path.display(), "saved {what}"),
                Err(e) => warn!("failed to save {what}: {e}"),
            }
        }
    }
}

/// Wait until the pipeline is running, then take the next item from `queue`.
///
/// A pause while waiting sends the stage back to waiting for resume, so the
/// run state is checked before every item. Returns `None` on cancellation.
async fn next_gated<T>(
    queue: &StageQueue<T>,
    run: &mut RunState,
    cancel: &CancellationToken,
) -> Option<T> {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return None,
            () = run.wait_running() => {}
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            () = run.wait_paused() => continue,
            item = queue.recv() => return Some(item),
        }
    }
}

// -- Stage runner functions --

async fn run_segmenter_stage(
    mut segmenter: SpeechSegmenter,
    mut source: Box<dyn AudioSource>,
    tx: StageQueue<SpeechSegment>,
    ctx: StageContext,
) {
    loop {
        let next = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            next = segmenter.next_segment(source.as_mut()) => next,
        };
        let segment = match next {
            Ok(Some(segment)) => segment,
            Ok(None) => {
                info!("audio source ended");
                break;
            }
            Err(e) => {
                error!("audio capture failed: {e}");
                break;
            }
        };

        info!(
            blocks = segment.block_count,
            duration_s = segment.duration_secs(),
            "speech segment captured"
        );
        if segment.overlapped_playback {
            warn!(
                echo_samples = segment.echo_reference.len(),
                "segment overlapped assistant playback and may contain its voice"
            );
        }
        ctx.record("segment audio", |r| {
            r.record_segment(segment.captured_wall, &segment.samples, segment.sample_rate)
        });
        if !segment.echo_reference.is_empty() {
            ctx.record("echo reference", |r| {
                r.record_echo(
                    segment.captured_wall,
                    &segment.echo_reference,
                    segment.sample_rate,
                )
            });
        }
        ctx.emit(PipelineEvent::SegmentCaptured {
            blocks: segment.block_count,
            overlapped_playback: segment.overlapped_playback,
            echo_samples: segment.echo_reference.len(),
        });

        tokio::select! {
            () = ctx.cancel.cancelled() => break,
            () = tx.send(segment) => {}
        }
    }
}

/// Where transcripts go after command recognition.
enum TranscriptOutput {
    /// Conversation mode: commands to the controller, the rest to dialogue.
    Dialogue {
        tx: StageQueue<Envelope<Transcript>>,
        spoken_tx: mpsc::UnboundedSender<Command>,
        run: RunState,
    },
    /// Transcribe-only mode: print.
    Console { enabled: bool },
}

struct TranscriptionStage {
    transcriber: Transcriber,
    output: TranscriptOutput,
    turn: TurnLatch,
    ctx: StageContext,
}

async fn run_transcription_stage(stage: TranscriptionStage, rx: StageQueue<SpeechSegment>) {
    let TranscriptionStage {
        mut transcriber,
        output,
        turn,
        ctx,
    } = stage;
    // Only the segment that opened the turn may close it.
    let release = |segment: &SpeechSegment| {
        if !segment.within_turn {
            turn.end();
        }
    };
    let discard = |segment: &SpeechSegment, reason: &'static str| {
        release(segment);
        ctx.emit(PipelineEvent::SegmentDiscarded { reason });
    };

    loop {
        let segment = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            segment = rx.recv() => segment,
        };
        let result = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            result = transcriber.transcribe(&segment) => result,
        };
        let transcript = match result {
            Ok(t) => t,
            Err(e) => {
                error!("transcription failed, segment dropped: {e}");
                discard(&segment, "transcription failed");
                continue;
            }
        };

        let text = transcript.text.trim().to_owned();
        if text.is_empty() {
            debug!("empty transcript dropped");
            discard(&segment, "empty transcript");
            continue;
        }
        ctx.record("transcript", |r| {
            r.record_transcript(segment.captured_wall, &text)
        });

        match &output {
            TranscriptOutput::Console { enabled } => {
                if *enabled {
                    let latency = transcript
                        .transcribed_at
                        .duration_since(transcript.captured_at);
                    println!("[{:.0}ms] {text}", latency.as_millis());
                }
                ctx.emit(PipelineEvent::Transcribed { text });
                release(&segment);
            }
            TranscriptOutput::Dialogue { tx, spoken_tx, run } => {
                if let Some(command) = Command::parse(&text) {
                    info!(?command, "control command heard");
                    release(&segment);
                    let _ = spoken_tx.send(command);
                    ctx.emit(PipelineEvent::CommandHeard { text });
                    continue;
                }

                if segment.within_turn {
                    info!("reply in progress, transcript dropped: {text:?}");
                    discard(&segment, "turn in progress");
                    continue;
                }
                let snap = run.snapshot();
                if snap.mode == RunMode::Paused {
                    info!("paused, transcript dropped: {text:?}");
                    discard(&segment, "paused");
                    continue;
                }
                ctx.emit(PipelineEvent::Transcribed { text });
                let envelope = Envelope::data(snap.epoch, transcript);
                let mut paused = run.clone();
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => break,
                    () = paused.wait_paused() => {
                        info!("paused while queueing, transcript dropped");
                        discard(&segment, "paused");
                    }
                    () = tx.send(envelope) => {}
                }
            }
        }
    }
}

async fn run_dialogue_stage(
    mut agent: DialogueAgent,
    rx: StageQueue<Envelope<Transcript>>,
    tx: StageQueue<Envelope<SentenceUnit>>,
    mut run: RunState,
    ctx: StageContext,
) {
    while let Some(envelope) = next_gated(&rx, &mut run, &ctx.cancel).await {
        let epoch = envelope.epoch;
        if epoch != run.epoch() {
            debug!("stale transcript dropped");
            continue;
        }
        let StreamItem::Data(transcript) = envelope.item else {
            continue;
        };
        info!("user: {}", transcript.text);

        let (unit_tx, mut unit_rx) = mpsc::channel::<SentenceUnit>(SENTENCE_FORWARD_SIZE);
        let state = run.clone();
        let forward = async {
            let mut forwarded = 0usize;
            while let Some(unit) = unit_rx.recv().await {
                // Keep reading after a pause so the agent can finish its turn.
                if state.epoch() != epoch {
                    continue;
                }
                ctx.emit(PipelineEvent::SentenceQueued {
                    text: unit.text.clone(),
                });
                tx.send(Envelope::data(epoch, unit)).await;
                forwarded += 1;
            }
            forwarded
        };

        let (reply, forwarded) = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            pair = async { tokio::join!(agent.respond(&transcript.text, unit_tx), forward) } => pair,
        };
        match reply {
            Ok(reply) => debug!(forwarded, chars = reply.len(), "dialogue turn finished"),
            Err(e) => error!("dialogue failed, no reply this turn: {e}"),
        }

        if run.epoch() == epoch {
            tokio::select! {
                () = ctx.cancel.cancelled() => break,
                () = tx.send(Envelope::end(epoch)) => {}
            }
        } else {
            debug!("paused during dialogue, end of stream not sent");
        }
    }
}

async fn run_synthesis_stage(
    mut synthesizer: Box<dyn SpeechSynthesizer>,
    rx: StageQueue<Envelope<SentenceUnit>>,
    tx: StageQueue<Envelope<AudioResponse>>,
    mut run: RunState,
    ctx: StageContext,
) {
    info!("synthesis stage ready: {}", synthesizer.name());
    while let Some(envelope) = next_gated(&rx, &mut run, &ctx.cancel).await {
        let epoch = envelope.epoch;
        if epoch != run.epoch() {
            debug!("stale sentence dropped");
            continue;
        }
        let unit = match envelope.item {
            StreamItem::EndOfStream => {
                tokio::select! {
                    () = ctx.cancel.cancelled() => break,
                    () = tx.send(Envelope::end(epoch)) => {}
                }
                continue;
            }
            StreamItem::Data(unit) => unit,
        };

        let text = sanitize_for_speech(&unit.text);
        if text.is_empty() {
            debug!("nothing speakable in {:?}", unit.text);
            continue;
        }

        let started = Instant::now();
        let result = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            result = synthesizer.synthesize(&text) => result,
        };
        let (samples, sample_rate) = match result {
            Ok(audio) => audio,
            Err(e) => {
                error!("synthesis failed, sentence dropped: {e}");
                continue;
            }
        };
        if samples.is_empty() {
            warn!("synthesizer returned no audio for {text:?}");
            continue;
        }
        let synthesized_at = Instant::now();
        info!(
            synthesis_ms = (synthesized_at - started).as_millis() as u64,
            audio_s = samples.len() as f32 / sample_rate.max(1) as f32,
            "synthesized {text:?}"
        );
        ctx.record("response audio", |r| r.record_response(&samples, sample_rate));

        if epoch != run.epoch() {
            debug!("paused during synthesis, audio dropped");
            continue;
        }
        let response = AudioResponse {
            text: unit.text,
            samples,
            sample_rate,
            enqueued_at: unit.enqueued_at,
            synthesized_at,
        };
        tokio::select! {
            () = ctx.cancel.cancelled() => break,
            () = tx.send(Envelope::data(epoch, response)) => {}
        }
    }
}

/// Bundled control state for the playback stage.
struct PlaybackStageControl {
    echo: StageQueue<EchoFrame>,
    speaking: SpeakingSignal,
    turn: TurnLatch,
    run: RunState,
    ctx: StageContext,
}

async fn run_playback_stage(
    mut sink: Box<dyn AudioSink>,
    rx: StageQueue<Envelope<AudioResponse>>,
    ctl: PlaybackStageControl,
) {
    let PlaybackStageControl {
        echo,
        speaking,
        turn,
        mut run,
        ctx,
    } = ctl;
    let mut last_finished: Option<Instant> = None;

    while let Some(envelope) = next_gated(&rx, &mut run, &ctx.cancel).await {
        if envelope.epoch != run.epoch() {
            debug!("stale audio dropped");
            continue;
        }
        let response = match envelope.item {
            StreamItem::EndOfStream => {
                speaking.set(false);
                turn.end();
                info!("turn complete");
                ctx.emit(PipelineEvent::TurnComplete);
                continue;
            }
            StreamItem::Data(response) => response,
        };

        if echo
            .push_evicting(EchoFrame {
                samples: response.samples.clone(),
                sample_rate: response.sample_rate,
            })
            .is_some()
        {
            debug!("echo queue full, oldest reference dropped");
        }

        speaking.set(true);
        let started = Instant::now();
        let idle_ms = last_finished.map(|t| (started - t).as_millis() as u64);
        info!(
            end_to_end_ms = (started - response.enqueued_at).as_millis() as u64,
            queued_ms = (started - response.synthesized_at).as_millis() as u64,
            idle_ms = ?idle_ms,
            duration_s = response.duration_secs(),
            "assistant: {}",
            response.text
        );
        ctx.emit(PipelineEvent::PlaybackStarted {
            text: response.text.clone(),
        });

        let result = tokio::select! {
            () = ctx.cancel.cancelled() => {
                speaking.set(false);
                break;
            }
            result = sink.play(&response.samples, response.sample_rate) => result,
        };
        speaking.set(false);
        let finished = Instant::now();
        last_finished = Some(finished);
        match result {
            Ok(()) => debug!(
                playback_ms = (finished - started).as_millis() as u64,
                "playback finished"
            ),
            Err(e) => error!("playback failed: {e}"),
        }
    }
}
