//! Real-time voice assistant pipeline.
//!
//! This crate provides a cascaded pipeline for spoken conversations:
//! Microphone → Segmenter → STT → Dialogue → TTS → Speaker
//!
//! # Architecture
//!
//! The pipeline is built from independent stages connected by bounded queues:
//! - **Audio capture**: Records from the microphone via `cpal`
//! - **Segmenter**: Cuts speech segments using energy-based detection
//! - **STT**: Transcribes segments through an OpenAI-compatible Whisper server
//! - **Dialogue**: Streams replies from an OpenAI-compatible chat server and
//!   splits them into sentences, or dispatches tool calls
//! - **TTS**: Synthesizes each sentence with Piper or an HTTP speech server
//! - **Audio playback**: Plays synthesized audio via `cpal` and feeds an echo
//!   reference back to the segmenter
//!
//! Saying or typing `stop.` pauses the reply stages and flushes queued work;
//! `start.` resumes them.

pub mod audio;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod history;
pub mod llm;
pub mod pipeline;
pub mod stt;
pub mod tools;
pub mod tts;
pub mod vad;

pub use config::AssistantConfig;
pub use error::{AssistantError, Result};
pub use pipeline::controller::Command;
pub use pipeline::coordinator::{PipelineCoordinator, PipelineMode};
pub use pipeline::messages::PipelineEvent;
