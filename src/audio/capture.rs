//! Microphone audio capture.
//!
//! [`AudioSource`] yields fixed-size [`AudioBlock`]s. [`CpalSource`] captures
//! at the device's native rate and downsamples to the segmenter rate.

use crate::audio::{resample_linear, to_mono};
use crate::config::AudioConfig;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::AudioBlock;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Raw callback chunks buffered between the audio thread and the segmenter.
const RAW_CHANNEL_SIZE: usize = 256;

/// A continuous stream of fixed-duration audio blocks.
#[async_trait]
pub trait AudioSource: Send {
    /// Wait for the next block. `Ok(None)` means the source is exhausted.
    async fn next_block(&mut self) -> Result<Option<AudioBlock>>;
}

/// Microphone capture via cpal.
///
/// The cpal stream lives on a dedicated thread because it is not `Send` on
/// every host. Dropping the source stops that thread.
pub struct CpalSource {
    raw_rx: mpsc::Receiver<Vec<f32>>,
    pending: Vec<f32>,
    block_size: usize,
    sample_rate: u32,
    _shutdown: std::sync::mpsc::Sender<()>,
}

impl CpalSource {
    /// Open the configured input device.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device is available or the stream
    /// cannot be started.
    pub fn open(config: &AudioConfig, sample_rate: u32, block_size: usize) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::channel::<Vec<f32>>(RAW_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let device_name = config.input_device.clone();

        std::thread::Builder::new()
            .name("voice-assist-capture".into())
            .spawn(move || {
                let stream = match build_input_stream(device_name.as_deref(), sample_rate, raw_tx)
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until the sender is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                info!("audio capture stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| AssistantError::Audio("capture thread exited during startup".into()))??;

        Ok(Self {
            raw_rx,
            pending: Vec::with_capacity(block_size * 2),
            block_size: block_size.max(1),
            sample_rate,
            _shutdown: shutdown_tx,
        })
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| AssistantError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl AudioSource for CpalSource {
    async fn next_block(&mut self) -> Result<Option<AudioBlock>> {
        while self.pending.len() < self.block_size {
            match self.raw_rx.recv().await {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }
        let rest = self.pending.split_off(self.block_size);
        let samples = std::mem::replace(&mut self.pending, rest);
        Ok(Some(AudioBlock {
            samples,
            sample_rate: self.sample_rate,
            captured_at: Instant::now(),
        }))
    }
}

fn build_input_stream(
    device_name: Option<&str>,
    target_rate: u32,
    tx: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| AssistantError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| AssistantError::Audio(format!("input device '{name}' not found")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| AssistantError::Audio("no default input device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_name}");

    let default_config = device
        .default_input_config()
        .map_err(|e| AssistantError::Audio(format!("no default input config: {e}")))?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();

    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, native_channels);
                let samples = resample_linear(&mono, native_rate, target_rate);
                // Never block the audio thread.
                if tx.try_send(samples).is_err() {
                    debug!("capture channel full, dropping chunk");
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| AssistantError::Audio(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| AssistantError::Audio(format!("failed to start input stream: {e}")))?;

    info!(
        "audio capture started: native {}Hz/{}ch -> {}Hz mono",
        native_rate, native_channels, target_rate
    );
    Ok(stream)
}

/// Audio source backed by a prepared list of blocks. Useful for replaying
/// recordings through the pipeline.
pub struct BlockListSource {
    blocks: std::collections::VecDeque<AudioBlock>,
}

impl BlockListSource {
    /// Build a source that yields `blocks` in order, then ends.
    pub fn new(blocks: Vec<AudioBlock>) -> Self {
        Self {
            blocks: blocks.into(),
        }
    }

    /// Split `samples` into blocks of `block_size`, dropping a short tail.
    pub fn from_samples(samples: &[f32], sample_rate: u32, block_size: usize) -> Self {
        let blocks = samples
            .chunks_exact(block_size.max(1))
            .map(|chunk| AudioBlock {
                samples: chunk.to_vec(),
                sample_rate,
                captured_at: Instant::now(),
            })
            .collect();
        Self::new(blocks)
    }
}

#[async_trait]
impl AudioSource for BlockListSource {
    async fn next_block(&mut self) -> Result<Option<AudioBlock>> {
        Ok(self.blocks.pop_front())
    }
}
