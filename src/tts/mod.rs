//! Text-to-speech synthesis.
//!
//! Every backend is reached through [`SpeechSynthesizer::synthesize`]:
//! - [`PiperTts`] runs the local `piper` executable (blocking; wrapped in
//!   [`Blocking`] so it runs on the blocking thread pool)
//! - [`OpenAiTts`] calls an OpenAI-compatible `/v1/audio/speech` endpoint

pub mod openai;
pub mod piper;

pub use openai::OpenAiTts;
pub use piper::PiperTts;

use crate::config::{TtsBackend, TtsConfig};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

/// Mono samples plus their sample rate.
pub type Synthesized = (Vec<f32>, u32);

/// Uniform synthesis call shared by every backend.
#[async_trait]
pub trait SpeechSynthesizer: Send {
    /// Synthesise `text`.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Tts`] if the backend fails.
    async fn synthesize(&mut self, text: &str) -> Result<Synthesized>;

    /// Display name for logs.
    fn name(&self) -> String;
}

/// A backend whose synthesis call blocks the calling thread.
pub trait BlockingSynthesizer: Send + 'static {
    /// Synthesise `text` on the current thread.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Tts`] if the backend fails.
    fn synthesize_blocking(&mut self, text: &str) -> Result<Synthesized>;

    /// Display name for logs.
    fn name(&self) -> String;
}

/// Adapts a [`BlockingSynthesizer`] to the async interface.
pub struct Blocking<T> {
    inner: Arc<Mutex<T>>,
}

impl<T: BlockingSynthesizer> Blocking<T> {
    /// Wrap a blocking backend.
    pub fn new(inner: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }
}

#[async_trait]
impl<T: BlockingSynthesizer> SpeechSynthesizer for Blocking<T> {
    async fn synthesize(&mut self, text: &str) -> Result<Synthesized> {
        let inner = Arc::clone(&self.inner);
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || {
            inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .synthesize_blocking(&text)
        })
        .await
        .map_err(|e| AssistantError::Tts(format!("synthesis task failed: {e}")))?
    }

    fn name(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .name()
    }
}

/// Build the configured backend.
///
/// # Errors
///
/// Returns an error if the backend cannot be initialised (e.g. the Piper
/// executable or voice model is missing). This is fatal at startup.
pub fn create_synthesizer(config: &TtsConfig) -> Result<Box<dyn SpeechSynthesizer>> {
    match config.backend {
        TtsBackend::Piper => Ok(Box::new(Blocking::new(PiperTts::new(config)?))),
        TtsBackend::OpenAi => Ok(Box::new(OpenAiTts::new(config)?)),
    }
}

/// Keep only characters a synthesiser can pronounce: alphanumerics,
/// whitespace, and `.,!?;:'"-`. Whitespace runs collapse to one space.
pub fn sanitize_for_speech(text: &str) -> String {
    let kept: String = text
        .chars()
        .filter(|c| {
            c.is_alphanumeric()
                || c.is_whitespace()
                || matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '\'' | '"' | '-')
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    struct Tone;

    impl BlockingSynthesizer for Tone {
        fn synthesize_blocking(&mut self, text: &str) -> Result<Synthesized> {
            Ok((vec![0.25; text.len()], 22_050))
        }
        fn name(&self) -> String {
            "tone".into()
        }
    }

    #[tokio::test]
    async fn blocking_backend_is_uniformly_async() {
        let mut synth: Box<dyn SpeechSynthesizer> = Box::new(Blocking::new(Tone));
        let (samples, rate) = synth.synthesize("hello").await.unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(rate, 22_050);
        assert_eq!(synth.name(), "tone");
    }

    #[test]
    fn sanitize_strips_markup_and_emoji() {
        assert_eq!(
            sanitize_for_speech("**Hello**, world! \u{1F600} It's `code` #1 -- ok?"),
            "Hello, world! It's code 1 -- ok?"
        );
    }

    #[test]
    fn sanitize_can_produce_empty() {
        assert!(sanitize_for_speech("*** ### ```").is_empty());
    }

    #[test]
    fn openai_backend_builds_without_network() {
        let config = TtsConfig {
            backend: TtsBackend::OpenAi,
            ..TtsConfig::default()
        };
        let synth = create_synthesizer(&config).unwrap();
        assert!(synth.name().contains("kokoro"));
    }
}
