//! Speech-to-text boundary.
//!
//! [`SpeechToText`] engines return ordered text segments; [`Transcriber`]
//! joins them into one [`Transcript`] per speech segment.

pub mod whisper_api;

pub use whisper_api::WhisperApiStt;

use crate::error::Result;
use crate::pipeline::messages::{SpeechSegment, Transcript};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

/// One piece of recognised text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SttSegment {
    /// Recognised text.
    pub text: String,
}

/// An opaque speech recogniser.
#[async_trait]
pub trait SpeechToText: Send {
    /// Recognise mono `samples` captured at `sample_rate`.
    ///
    /// # Errors
    ///
    /// Returns an error if recognition fails.
    async fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<SttSegment>>;
}

/// Wraps an engine and produces [`Transcript`]s from speech segments.
pub struct Transcriber {
    engine: Box<dyn SpeechToText>,
}

impl Transcriber {
    /// Wrap `engine`.
    pub fn new(engine: Box<dyn SpeechToText>) -> Self {
        Self { engine }
    }

    /// Transcribe one segment. Empty text means nothing was recognised.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn transcribe(&mut self, segment: &SpeechSegment) -> Result<Transcript> {
        let started = Instant::now();
        let segments = self
            .engine
            .transcribe(&segment.samples, segment.sample_rate)
            .await?;
        let text = join_segments(&segments);
        let transcribed_at = Instant::now();

        info!(
            duration_s = segment.duration_secs(),
            transcribe_ms = (transcribed_at - started).as_millis() as u64,
            "transcribed: {text:?}"
        );
        debug!(segments = segments.len(), "engine segments");

        Ok(Transcript {
            text,
            captured_at: segment.captured_at,
            transcribed_at,
        })
    }
}

/// Join segment texts with single spaces, trimming each piece.
pub fn join_segments(segments: &[SttSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
