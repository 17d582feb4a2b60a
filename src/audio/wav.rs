//! Debug artifact capture: WAV files for segments and responses.

use crate::error::{AssistantError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Timestamp format used in artifact file names.
const TS_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Writes debug artifacts under a fixed output directory.
#[derive(Debug)]
pub struct DebugRecorder {
    dir: PathBuf,
    response_index: AtomicU64,
}

impl DebugRecorder {
    /// Create the output directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            response_index: AtomicU64::new(0),
        })
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `input_<ts>.wav` for a captured segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn record_segment(
        &self,
        captured: DateTime<Local>,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("input_{}.wav", captured.format(TS_FORMAT)));
        write_wav(&path, samples, sample_rate)?;
        Ok(path)
    }

    /// Write `echo_<ts>.wav` holding playback audio that overlapped a segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn record_echo(
        &self,
        captured: DateTime<Local>,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("echo_{}.wav", captured.format(TS_FORMAT)));
        write_wav(&path, samples, sample_rate)?;
        Ok(path)
    }

    /// Write `text_<ts>.txt` holding the transcript of a segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn record_transcript(&self, captured: DateTime<Local>, text: &str) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("text_{}.txt", captured.format(TS_FORMAT)));
        std::fs::write(&path, text)?;
        debug!(path = %path.display(), "wrote transcript artifact");
        Ok(path)
    }

    /// Write `agent_output_<ts>_<i>.wav` for a synthesised response, where
    /// `i` counts responses since the recorder was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn record_response(&self, samples: &[f32], sample_rate: u32) -> Result<PathBuf> {
        let index = self.response_index.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!(
            "agent_output_{}_{index}.wav",
            Local::now().format(TS_FORMAT)
        ));
        write_wav(&path, samples, sample_rate)?;
        Ok(path)
    }
}

/// Write mono f32 samples as 16-bit PCM WAV.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(v).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    debug!(path = %path.display(), samples = samples.len(), "wrote wav artifact");
    Ok(())
}

/// Encode mono f32 samples as an in-memory 16-bit PCM WAV file.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(v).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(cursor.into_inner())
}

/// Decode a mono or multi-channel WAV byte buffer into mono f32 samples.
///
/// # Errors
///
/// Returns an error if the bytes are not a valid WAV stream.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).map_err(wav_err)?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(wav_err)?
        }
    };
    Ok((
        crate::audio::to_mono(&interleaved, spec.channels),
        spec.sample_rate,
    ))
}

fn wav_err(e: hound::Error) -> AssistantError {
    AssistantError::Audio(format!("wav error: {e}"))
}
