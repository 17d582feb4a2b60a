//! Message types passed between pipeline stages.

use chrono::{DateTime, Local};
use std::time::Instant;

/// A fixed-size block of raw audio samples from the microphone.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Mono f32 samples at the configured capture sample rate.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Timestamp when this block was captured.
    pub captured_at: Instant,
}

/// A complete utterance detected by the segmenter, ready for transcription.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Concatenated samples of every block in the segment.
    pub samples: Vec<f32>,
    /// Number of blocks concatenated into `samples`.
    pub block_count: usize,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// When the segment's first loud block was captured.
    pub captured_at: Instant,
    /// Wall-clock capture time, used to name debug artifacts.
    pub captured_wall: DateTime<Local>,
    /// Whether any block of the segment overlapped assistant playback.
    pub overlapped_playback: bool,
    /// Playback audio that overlapped the segment, at the segment's sample rate.
    pub echo_reference: Vec<f32>,
    /// Captured while an earlier turn was still in flight. Such a segment
    /// may only carry a control command.
    pub within_turn: bool,
}

impl SpeechSegment {
    /// Segment length in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// A transcription result from the STT engine.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// The transcribed text, engine segments joined by single spaces.
    pub text: String,
    /// Time the original audio was captured.
    pub captured_at: Instant,
    /// Time the transcription completed.
    pub transcribed_at: Instant,
}

/// One sentence of an assistant reply, ready for synthesis.
#[derive(Debug, Clone)]
pub struct SentenceUnit {
    /// Trimmed sentence text including its terminal punctuation.
    pub text: String,
    /// Time the sentence was placed on the synthesis queue.
    pub enqueued_at: Instant,
}

/// Synthesised audio for one sentence, ready for playback.
#[derive(Debug, Clone)]
pub struct AudioResponse {
    /// Sentence the audio speaks.
    pub text: String,
    /// Mono f32 samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Time the source sentence was enqueued for synthesis.
    pub enqueued_at: Instant,
    /// Time synthesis completed.
    pub synthesized_at: Instant,
}

impl AudioResponse {
    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Audio just handed to the speaker, fed back to the segmenter.
#[derive(Debug, Clone)]
pub struct EchoFrame {
    /// Mono f32 samples as played.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Item carried on a stage queue: either data or the end of a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<T> {
    /// A payload for the downstream stage.
    Data(T),
    /// Marks the end of one reply. Exactly one follows each reply's data.
    EndOfStream,
}

/// A stream item stamped with the pause epoch it was produced in.
///
/// The controller bumps the epoch on every pause, so stages can discard
/// output that an in-flight engine call produced before the flush.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    /// Epoch current when the item was produced.
    pub epoch: u64,
    /// The carried item.
    pub item: StreamItem<T>,
}

impl<T> Envelope<T> {
    /// Wrap a data payload.
    pub fn data(epoch: u64, value: T) -> Self {
        Self {
            epoch,
            item: StreamItem::Data(value),
        }
    }

    /// Build an end-of-stream marker.
    pub fn end(epoch: u64) -> Self {
        Self {
            epoch,
            item: StreamItem::EndOfStream,
        }
    }
}

/// Observable pipeline progress, broadcast to front ends and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The segmenter emitted a segment.
    SegmentCaptured {
        /// Blocks in the segment.
        blocks: usize,
        /// Whether it overlapped assistant playback.
        overlapped_playback: bool,
        /// Echo-reference samples retained with it.
        echo_samples: usize,
    },
    /// A segment was transcribed to non-empty text.
    Transcribed {
        /// Transcript text.
        text: String,
    },
    /// A segment yielded nothing for the dialogue stage.
    SegmentDiscarded {
        /// Why it was dropped.
        reason: &'static str,
    },
    /// A control phrase was recognised in a transcript.
    CommandHeard {
        /// The phrase as transcribed.
        text: String,
    },
    /// A sentence of the assistant's reply was queued for synthesis.
    SentenceQueued {
        /// Sentence text.
        text: String,
    },
    /// Playback of one sentence started.
    PlaybackStarted {
        /// Sentence text.
        text: String,
    },
    /// The reply for the current turn has finished playing.
    TurnComplete,
    /// The controller paused the pipeline.
    Paused {
        /// Items discarded from the stage queues.
        drained: usize,
    },
    /// The controller resumed the pipeline.
    Resumed,
}
