//! Speech segmentation using energy-based voice activity detection.
//!
//! A block whose mean absolute amplitude exceeds the configured threshold
//! starts a recording. Every following block is buffered until the run of
//! quiet blocks exceeds `silence_duration / block_duration`; the segment is
//! then emitted and the segmenter returns to idle.

use crate::audio::capture::AudioSource;
use crate::audio::resample_linear;
use crate::config::{EchoPolicy, SegmenterConfig};
use crate::error::Result;
use crate::pipeline::messages::{AudioBlock, EchoFrame, SpeechSegment};
use crate::pipeline::queue::StageQueue;
use crate::pipeline::state::{SpeakingSignal, TurnLatch};
use chrono::Local;
use std::time::Instant;
use tracing::{debug, info};

/// Segmenter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for a loud block.
    Idle,
    /// Buffering an utterance.
    Recording,
}

/// Energy-threshold speech segmenter.
pub struct SpeechSegmenter {
    threshold: f32,
    silence_limit: u32,
    sample_rate: u32,
    hold_during_turn: bool,
    echo_policy: EchoPolicy,

    state: SegmenterState,
    buffer: Vec<f32>,
    block_count: usize,
    silence_count: u32,
    started_at: Option<Instant>,
    overlapped: bool,
    echo_reference: Vec<f32>,
    /// Latest playback frame seen while idle; seeds the echo reference of a
    /// segment that starts during playback.
    recent_echo: Vec<f32>,

    echo: Option<StageQueue<EchoFrame>>,
    speaking: SpeakingSignal,
    turn: TurnLatch,
}

impl SpeechSegmenter {
    /// Create a segmenter with detached speaking/turn signals and no echo input.
    pub fn new(config: &SegmenterConfig) -> Self {
        let silence_limit = config.silence_limit_blocks();
        info!(
            "segmenter initialized: threshold={}, silence_limit={} blocks of {}ms",
            config.silence_threshold, silence_limit, config.block_duration_ms
        );
        Self {
            threshold: config.silence_threshold,
            silence_limit,
            sample_rate: config.sample_rate,
            hold_during_turn: config.hold_during_turn,
            echo_policy: config.echo_policy,
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            block_count: 0,
            silence_count: 0,
            started_at: None,
            overlapped: false,
            echo_reference: Vec::new(),
            recent_echo: Vec::new(),
            echo: None,
            speaking: SpeakingSignal::new(),
            turn: TurnLatch::new(),
        }
    }

    /// Attach the playback echo-reference queue.
    pub fn with_echo(mut self, echo: StageQueue<EchoFrame>) -> Self {
        self.echo = Some(echo);
        self
    }

    /// Attach the shared speaking signal and turn latch.
    pub fn with_signals(mut self, speaking: SpeakingSignal, turn: TurnLatch) -> Self {
        self.speaking = speaking;
        self.turn = turn;
        self
    }

    /// Current state.
    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Consecutive silent blocks tolerated inside a segment.
    pub fn silence_limit(&self) -> u32 {
        self.silence_limit
    }

    /// Read blocks from `source` until a complete segment is available.
    ///
    /// Returns `Ok(None)` when the source is exhausted. A partial recording
    /// at that point is discarded.
    ///
    /// With `hold_during_turn`, the first segment of a turn raises the turn
    /// latch. Segments completed while the latch is already raised are still
    /// returned, marked `within_turn`, so spoken commands reach the
    /// controller during a reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails.
    pub async fn next_segment<S: AudioSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<Option<SpeechSegment>> {
        loop {
            let Some(block) = source.next_block().await? else {
                self.reset();
                return Ok(None);
            };
            self.drain_echo();

            let speaking = self.speaking.is_speaking();
            if let Some(mut segment) = self.process_block(&block, speaking) {
                if self.hold_during_turn && !self.turn.try_begin() {
                    debug!("segment completed during a turn");
                    segment.within_turn = true;
                }
                return Ok(Some(segment));
            }
        }
    }

    /// Advance the state machine by one block.
    ///
    /// `speaking` is the assistant-speaking signal sampled for this block.
    pub fn process_block(&mut self, block: &AudioBlock, speaking: bool) -> Option<SpeechSegment> {
        let amplitude = mean_abs_amplitude(&block.samples);
        let loud = amplitude > self.threshold;

        match self.state {
            SegmenterState::Idle => {
                if !speaking {
                    self.recent_echo.clear();
                }
                if !loud {
                    return None;
                }
                self.state = SegmenterState::Recording;
                self.started_at = Some(block.captured_at);
                self.silence_count = 0;
                self.overlapped = speaking;
                if speaking {
                    self.echo_reference = std::mem::take(&mut self.recent_echo);
                }
                self.push_block(block);
                debug!(amplitude, "speech started");
                None
            }
            SegmenterState::Recording => {
                self.overlapped |= speaking;
                if loud {
                    self.silence_count = 0;
                } else {
                    self.silence_count += 1;
                    if self.silence_count > self.silence_limit {
                        return Some(self.emit());
                    }
                }
                self.push_block(block);
                None
            }
        }
    }

    /// Drop any partial recording and return to idle.
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.block_count = 0;
        self.silence_count = 0;
        self.started_at = None;
        self.overlapped = false;
        self.echo_reference.clear();
    }

    fn push_block(&mut self, block: &AudioBlock) {
        self.buffer.extend_from_slice(&block.samples);
        self.block_count += 1;
    }

    fn drain_echo(&mut self) {
        let Some(echo) = &self.echo else {
            return;
        };
        for frame in echo.take_all() {
            if self.echo_policy == EchoPolicy::Ignore {
                continue;
            }
            let samples = resample_linear(&frame.samples, frame.sample_rate, self.sample_rate);
            match self.state {
                SegmenterState::Recording => {
                    self.overlapped = true;
                    self.echo_reference.extend(samples);
                }
                SegmenterState::Idle => self.recent_echo = samples,
            }
        }
    }

    fn emit(&mut self) -> SpeechSegment {
        let segment = SpeechSegment {
            samples: std::mem::take(&mut self.buffer),
            block_count: self.block_count,
            sample_rate: self.sample_rate,
            captured_at: self.started_at.unwrap_or_else(Instant::now),
            captured_wall: Local::now(),
            overlapped_playback: self.overlapped && self.echo_policy == EchoPolicy::Hint,
            echo_reference: std::mem::take(&mut self.echo_reference),
            within_turn: false,
        };
        info!(
            blocks = segment.block_count,
            duration_s = segment.duration_secs(),
            "speech segment complete"
        );
        if segment.overlapped_playback {
            info!("segment overlapped assistant playback; it may contain echo");
        }
        self.reset();
        segment
    }
}

/// Mean absolute amplitude of a block. Empty input yields 0.
pub fn mean_abs_amplitude(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}
