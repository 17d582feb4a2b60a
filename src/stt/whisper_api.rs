//! Transcription via an OpenAI-compatible `/v1/audio/transcriptions` server
//! (faster-whisper-server, speaches, whisper.cpp server, ...).

use super::{SpeechToText, SttSegment};
use crate::audio::wav::encode_wav;
use crate::config::SttConfig;
use crate::error::{AssistantError, Result};
use crate::llm::openai::api_base;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

/// Whisper-style HTTP transcription backend.
pub struct WhisperApiStt {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    language: Option<String>,
    chunk_length_s: u32,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<ResponseSegment>,
}

#[derive(Debug, Deserialize)]
struct ResponseSegment {
    text: String,
}

impl WhisperApiStt {
    /// Create a client for the configured server.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &SttConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AssistantError::Stt(format!("cannot build HTTP client: {e}")))?;
        let endpoint = format!("{}/v1/audio/transcriptions", api_base(&config.api_url));
        info!("STT configured: {endpoint} model={}", config.model);
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            chunk_length_s: config.chunk_length_s,
        })
    }
}

#[async_trait]
impl SpeechToText for WhisperApiStt {
    async fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<SttSegment>> {
        let wav = encode_wav(samples, sample_rate)?;
        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("segment.wav")
            .mime_str("audio/wav")
            .map_err(|e| AssistantError::Stt(format!("invalid mime type: {e}")))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("chunk_length", self.chunk_length_s.to_string());
        if let Some(lang) = &self.language {
            form = form.text("language", lang.clone());
        }

        let mut req = self.client.post(&self.endpoint).multipart(form);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AssistantError::Stt(format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AssistantError::Stt(format!("HTTP {status}: {text}")));
        }
        let body: TranscriptionResponse = resp
            .json()
            .await
            .map_err(|e| AssistantError::Stt(format!("invalid response body: {e}")))?;

        if body.segments.is_empty() {
            return Ok(if body.text.trim().is_empty() {
                Vec::new()
            } else {
                vec![SttSegment { text: body.text }]
            });
        }
        Ok(body
            .segments
            .into_iter()
            .map(|s| SttSegment { text: s.text })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> SttConfig {
        SttConfig {
            api_url: url.to_owned(),
            ..SttConfig::default()
        }
    }

    #[tokio::test]
    async fn returns_verbose_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "Hello world. How are you?",
                "segments": [{"text": " Hello world."}, {"text": " How are you?"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut stt = WhisperApiStt::new(&config(&server.uri())).unwrap();
        let segs = stt.transcribe(&[0.0; 1600], 16_000).await.unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(super::super::join_segments(&segs), "Hello world. How are you?");
    }

    #[tokio::test]
    async fn falls_back_to_plain_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "stop."})))
            .mount(&server)
            .await;

        let mut stt = WhisperApiStt::new(&config(&server.uri())).unwrap();
        let segs = stt.transcribe(&[0.0; 160], 16_000).await.unwrap();
        assert_eq!(segs, vec![SttSegment { text: "stop.".into() }]);
    }

    #[tokio::test]
    async fn empty_text_yields_no_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "  "})))
            .mount(&server)
            .await;

        let mut stt = WhisperApiStt::new(&config(&server.uri())).unwrap();
        assert!(stt.transcribe(&[0.0; 160], 16_000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_is_stt_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut stt = WhisperApiStt::new(&config(&server.uri())).unwrap();
        let err = stt.transcribe(&[0.0; 160], 16_000).await.unwrap_err();
        assert!(matches!(err, AssistantError::Stt(_)));
    }
}
