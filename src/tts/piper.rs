//! Local synthesis with the Piper command-line tool.

use super::{BlockingSynthesizer, Synthesized};
use crate::audio::wav::decode_wav;
use crate::config::TtsConfig;
use crate::error::{AssistantError, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Runs `piper --model <voice.onnx> --output_file -` once per sentence.
pub struct PiperTts {
    binary: PathBuf,
    model: PathBuf,
    speaker: Option<u32>,
    length_scale: f32,
}

impl PiperTts {
    /// Locate the executable and voice model.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable is not found or no model is configured.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let binary = which::which(&config.piper_binary).map_err(|e| {
            AssistantError::Tts(format!("piper executable '{}' not found: {e}", config.piper_binary))
        })?;
        let model = config
            .piper_model
            .clone()
            .ok_or_else(|| AssistantError::Tts("tts.piper_model is not set".into()))?;
        if !model.exists() {
            return Err(AssistantError::Tts(format!(
                "piper model not found: {}",
                model.display()
            )));
        }
        info!(binary = %binary.display(), model = %model.display(), "piper TTS ready");
        Ok(Self {
            binary,
            model,
            speaker: config.voice.parse().ok(),
            // Piper's length scale is inverse speed.
            length_scale: 1.0 / config.speed.max(0.1),
        })
    }
}

impl BlockingSynthesizer for PiperTts {
    fn synthesize_blocking(&mut self, text: &str) -> Result<Synthesized> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--model")
            .arg(&self.model)
            .arg("--length_scale")
            .arg(format!("{:.3}", self.length_scale))
            .arg("--output_file")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(speaker) = self.speaker {
            cmd.arg("--speaker").arg(speaker.to_string());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AssistantError::Tts(format!("failed to start piper: {e}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| AssistantError::Tts(format!("failed to write to piper: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| AssistantError::Tts(format!("piper did not finish: {e}")))?;
        if !output.status.success() {
            return Err(AssistantError::Tts(format!(
                "piper exited with {}",
                output.status
            )));
        }

        let (samples, rate) = decode_wav(&output.stdout)
            .map_err(|e| AssistantError::Tts(format!("piper output: {e}")))?;
        debug!(samples = samples.len(), rate, "piper synthesis complete");
        Ok((samples, rate))
    }

    fn name(&self) -> String {
        let voice = self
            .model
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "piper".into());
        format!("Piper ({voice})")
    }
}
