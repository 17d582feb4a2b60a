//! Configuration types for the voice assistant pipeline.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the voice assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Audio device selection.
    pub audio: AudioConfig,
    /// Speech segmentation (voice activity boundary) settings.
    pub segmenter: SegmenterConfig,
    /// Speech-to-text settings.
    pub stt: SttConfig,
    /// Conversation engine settings.
    pub llm: LlmConfig,
    /// Text-to-speech settings.
    pub tts: TtsConfig,
    /// Conversation history persistence.
    pub history: HistoryConfig,
    /// Stage queue capacities.
    pub pipeline: PipelineConfig,
    /// Debug artifact capture.
    pub debug: DebugConfig,
}

/// Audio I/O device selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

/// How the segmenter treats audio captured while the assistant is speaking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoPolicy {
    /// Flag overlapping segments and keep the echo reference for debug capture.
    #[default]
    Hint,
    /// Drain the echo reference and take no action on it.
    Ignore,
}

/// Energy-based speech segmentation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Duration of one audio block in milliseconds.
    pub block_duration_ms: u32,
    /// Mean absolute amplitude above which a block counts as speech.
    ///
    /// Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.01: normal sensitivity (default)
    ///   - 0.02: noisy rooms
    pub silence_threshold: f32,
    /// Silence in milliseconds that ends a speech segment.
    pub silence_duration_ms: u32,
    /// While a reply is still being synthesised or played, act only on control
    /// commands heard in new speech.
    pub hold_during_turn: bool,
    /// Treatment of audio overlapping assistant playback.
    pub echo_policy: EchoPolicy,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            block_duration_ms: 100,
            silence_threshold: 0.01,
            silence_duration_ms: 1000,
            hold_during_turn: true,
            echo_policy: EchoPolicy::Hint,
        }
    }
}

impl SegmenterConfig {
    /// Number of samples in one audio block.
    pub fn block_size(&self) -> usize {
        (self.sample_rate as usize * self.block_duration_ms as usize) / 1000
    }

    /// Number of consecutive silent blocks tolerated before a segment ends.
    pub fn silence_limit_blocks(&self) -> u32 {
        self.silence_duration_ms / self.block_duration_ms.max(1)
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Base URL of an OpenAI-compatible transcription server.
    pub api_url: String,
    /// Model identifier (model size), e.g. `distil-small.en`.
    pub model: String,
    /// API key (empty = no auth header).
    pub api_key: String,
    /// Optional language hint.
    pub language: Option<String>,
    /// Chunking hint in seconds forwarded to the engine.
    pub chunk_length_s: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_owned(),
            model: "distil-small.en".to_owned(),
            api_key: String::new(),
            language: Some("en".to_owned()),
            chunk_length_s: 30,
        }
    }
}

/// Conversation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat server (Ollama, vLLM, ...).
    pub api_url: String,
    /// Model identifier.
    pub model: String,
    /// API key (empty = no auth header).
    pub api_key: String,
    /// System prompt seeded into a new conversation.
    pub system_prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per reply.
    pub max_tokens: u32,
    /// Words in a transcript that switch the dialogue stage into tool mode.
    pub tool_trigger_keywords: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:11434".to_owned(),
            model: "llama3.1:8b".to_owned(),
            api_key: String::new(),
            system_prompt: "You are a helpful voice assistant. Keep responses concise and \
                            conversational."
                .to_owned(),
            temperature: 0.7,
            max_tokens: 512,
            tool_trigger_keywords: vec!["open".to_owned(), "launch".to_owned(), "play".to_owned()],
        }
    }
}

/// Which TTS backend to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsBackend {
    /// Local Piper executable (synchronous subprocess).
    #[default]
    Piper,
    /// OpenAI-compatible `/v1/audio/speech` endpoint (asynchronous HTTP).
    OpenAi,
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Synthesis backend.
    pub backend: TtsBackend,
    /// Voice name (API backend) or speaker id (Piper).
    pub voice: String,
    /// Speech speed multiplier.
    pub speed: f32,
    /// Piper executable name or path.
    pub piper_binary: String,
    /// Piper `.onnx` voice model path.
    pub piper_model: Option<PathBuf>,
    /// Base URL of the speech API.
    pub api_url: String,
    /// Speech API model identifier.
    pub api_model: String,
    /// API key (empty = no auth header).
    pub api_key: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::Piper,
            voice: "af_bella".to_owned(),
            speed: 1.25,
            piper_binary: "piper".to_owned(),
            piper_model: None,
            api_url: "http://localhost:8880".to_owned(),
            api_model: "kokoro".to_owned(),
            api_key: String::new(),
        }
    }
}

/// Conversation history persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// JSON file holding every user's conversation.
    pub path: PathBuf,
    /// Identifier of the single active user.
    pub user_id: String,
    /// Reset the user's conversation when the pipeline starts.
    pub clear_on_start: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/context.json"),
            user_id: "user".to_owned(),
            clear_on_start: false,
        }
    }
}

/// Capacities of the bounded queues between stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Segmenter → transcription.
    pub segment_capacity: usize,
    /// Transcription → dialogue.
    pub transcript_capacity: usize,
    /// Dialogue → synthesis.
    pub sentence_capacity: usize,
    /// Synthesis → playback.
    pub audio_capacity: usize,
    /// Playback → segmenter echo reference (oldest entry dropped when full).
    pub echo_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment_capacity: 4,
            transcript_capacity: 8,
            sentence_capacity: 16,
            audio_capacity: 16,
            echo_capacity: 200,
        }
    }
}

/// Debug artifact capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Write WAV/TXT files for captured segments and synthesised responses.
    pub enabled: bool,
    /// Directory receiving the artifacts.
    pub output_dir: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: PathBuf::from("data/audio_input"),
        }
    }
}

impl AssistantConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| AssistantError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AssistantError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/voice-assist/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("voice-assist")
            .join("config.toml")
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segmenter;
        if seg.sample_rate == 0 {
            return Err(AssistantError::Config("segmenter.sample_rate must be > 0".into()));
        }
        if seg.block_duration_ms == 0 {
            return Err(AssistantError::Config(
                "segmenter.block_duration_ms must be > 0".into(),
            ));
        }
        if seg.block_size() == 0 {
            return Err(AssistantError::Config(
                "segmenter block is shorter than one sample".into(),
            ));
        }
        if !(0.0..=1.0).contains(&seg.silence_threshold) {
            return Err(AssistantError::Config(format!(
                "segmenter.silence_threshold must be within [0, 1], got {}",
                seg.silence_threshold
            )));
        }
        let p = &self.pipeline;
        for (name, cap) in [
            ("segment_capacity", p.segment_capacity),
            ("transcript_capacity", p.transcript_capacity),
            ("sentence_capacity", p.sentence_capacity),
            ("audio_capacity", p.audio_capacity),
            ("echo_capacity", p.echo_capacity),
        ] {
            if cap == 0 {
                return Err(AssistantError::Config(format!("pipeline.{name} must be > 0")));
            }
        }
        if self.tts.speed <= 0.0 {
            return Err(AssistantError::Config("tts.speed must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AssistantConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segmenter.block_size(), 1600);
        assert_eq!(config.segmenter.silence_limit_blocks(), 10);
        assert!(config.segmenter.hold_during_turn);
        assert_eq!(config.pipeline.echo_capacity, 200);
    }

    #[test]
    fn silence_limit_uses_integer_block_count() {
        let seg = SegmenterConfig {
            block_duration_ms: 100,
            silence_duration_ms: 2000,
            ..SegmenterConfig::default()
        };
        assert_eq!(seg.silence_limit_blocks(), 20);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AssistantConfig::default();
        config.segmenter.silence_threshold = 0.02;
        config.segmenter.silence_duration_ms = 2000;
        config.tts.backend = TtsBackend::OpenAi;
        config.llm.model = "qwen3:0.6b".to_owned();

        config.save_to_file(&path).unwrap();
        let loaded = AssistantConfig::from_file(&path).unwrap();

        assert!((loaded.segmenter.silence_threshold - 0.02).abs() < f32::EPSILON);
        assert_eq!(loaded.segmenter.silence_duration_ms, 2000);
        assert_eq!(loaded.tts.backend, TtsBackend::OpenAi);
        assert_eq!(loaded.llm.model, "qwen3:0.6b");
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
[segmenter]
silence_threshold = 0.02

[tts]
backend = "openai"
"#;
        let config: AssistantConfig = toml::from_str(toml_str).unwrap();
        assert!((config.segmenter.silence_threshold - 0.02).abs() < f32::EPSILON);
        assert_eq!(config.segmenter.sample_rate, 16_000);
        assert_eq!(config.tts.backend, TtsBackend::OpenAi);
        assert_eq!(config.history.user_id, "user");
    }

    #[test]
    fn pipeline_capacities_load_from_toml() {
        let toml_str = r#"
[pipeline]
segment_capacity = 2
echo_capacity = 5
"#;
        let config: AssistantConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pipeline.segment_capacity, 2);
        assert_eq!(config.pipeline.echo_capacity, 5);
        assert_eq!(config.pipeline.sentence_capacity, 16);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = AssistantConfig::from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            AssistantConfig::from_file(&path),
            Err(AssistantError::Config(_))
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut config = AssistantConfig::default();
        config.segmenter.silence_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("silence_threshold"));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut config = AssistantConfig::default();
        config.pipeline.sentence_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sentence_capacity"));
    }

    #[test]
    fn echo_policy_serializes_lowercase() {
        let seg = SegmenterConfig {
            echo_policy: EchoPolicy::Ignore,
            ..SegmenterConfig::default()
        };
        let text = toml::to_string(&seg).unwrap();
        assert!(text.contains("echo_policy = \"ignore\""));
    }
}
