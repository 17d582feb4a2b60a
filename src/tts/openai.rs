//! Synthesis through an OpenAI-compatible `/v1/audio/speech` endpoint
//! (Kokoro-FastAPI, openedai-speech, OpenAI, ...).

use super::{SpeechSynthesizer, Synthesized};
use crate::audio::wav::decode_wav;
use crate::config::TtsConfig;
use crate::error::{AssistantError, Result};
use crate::llm::openai::api_base;
use async_trait::async_trait;
use tracing::info;

/// HTTP speech synthesis backend.
pub struct OpenAiTts {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    voice: String,
    speed: f32,
    api_key: String,
}

impl OpenAiTts {
    /// Create a client for the configured server.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AssistantError::Tts(format!("cannot build HTTP client: {e}")))?;
        let endpoint = format!("{}/v1/audio/speech", api_base(&config.api_url));
        info!("TTS configured: {endpoint} voice={}", config.voice);
        Ok(Self {
            client,
            endpoint,
            model: config.api_model.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiTts {
    async fn synthesize(&mut self, text: &str) -> Result<Synthesized> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "speed": self.speed,
            "response_format": "wav",
        });
        let mut req = self.client.post(&self.endpoint).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AssistantError::Tts(format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AssistantError::Tts(format!("HTTP {status}: {text}")));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AssistantError::Tts(format!("failed to read audio: {e}")))?;
        decode_wav(&bytes).map_err(|e| AssistantError::Tts(format!("speech response: {e}")))
    }

    fn name(&self) -> String {
        format!("{} ({})", self.model, self.voice)
    }
}
