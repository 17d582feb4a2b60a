//! CLI binary for the voice assistant.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use voice_assist::audio::capture::CpalSource;
use voice_assist::audio::playback::CpalSink;
use voice_assist::audio::wav::DebugRecorder;
use voice_assist::dialogue::DialogueAgent;
use voice_assist::history::ConversationStore;
use voice_assist::llm::OpenAiChat;
use voice_assist::pipeline::controller::spawn_stdin_commands;
use voice_assist::stt::WhisperApiStt;
use voice_assist::tools::ToolRegistry;
use voice_assist::tts::create_synthesizer;
use voice_assist::{AssistantConfig, PipelineCoordinator, PipelineEvent, PipelineMode};

/// Real-time voice assistant: speak, and hear the reply.
#[derive(Parser)]
#[command(name = "voice-assist", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write logs to daily-rotated files in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Start a voice conversation.
    Chat,

    /// List available audio devices.
    Devices,

    /// Run in transcription-only mode (no dialogue or speech output).
    Transcribe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(config).await,
        Commands::Devices => list_devices(),
        Commands::Transcribe => run_transcribe(config).await,
    }
}

/// Logs go to stderr so stdout carries only the conversation.
fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("voice_assist=info,reqwest=warn,hyper=warn"));
    let console = fmt::layer().with_writer(std::io::stderr).compact();

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "voice-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(guard)
}

/// An explicit path must exist; otherwise the default location is used if present.
fn load_config(path: Option<&Path>) -> anyhow::Result<AssistantConfig> {
    if let Some(path) = path {
        return Ok(AssistantConfig::from_file(path)?);
    }
    let default_path = AssistantConfig::default_config_path();
    if default_path.exists() {
        info!("loading config from {}", default_path.display());
        return Ok(AssistantConfig::from_file(&default_path)?);
    }
    let config = AssistantConfig::default();
    config.validate()?;
    Ok(config)
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    });
}

fn open_recorder(config: &AssistantConfig) -> anyhow::Result<Option<DebugRecorder>> {
    if !config.debug.enabled {
        return Ok(None);
    }
    let recorder = DebugRecorder::new(&config.debug.output_dir)?;
    info!("writing debug audio to {}", recorder.dir().display());
    Ok(Some(recorder))
}

async fn run_chat(config: AssistantConfig) -> anyhow::Result<()> {
    println!("voice-assist v{}", env!("CARGO_PKG_VERSION"));

    let source = CpalSource::open(
        &config.audio,
        config.segmenter.sample_rate,
        config.segmenter.block_size(),
    )?;
    let stt = WhisperApiStt::new(&config.stt)?;
    let chat = OpenAiChat::new(&config.llm)?;

    let mut store = ConversationStore::open(&config.history.path)?;
    if config.history.clear_on_start {
        store.clear_user(&config.history.user_id)?;
        info!(user = %config.history.user_id, "conversation history cleared");
    }
    let agent = DialogueAgent::new(
        Box::new(chat),
        store,
        config.history.user_id.clone(),
        &config.llm.system_prompt,
    )?
    .with_tools(
        ToolRegistry::with_builtins(),
        config.llm.tool_trigger_keywords.clone(),
    );
    let synthesizer = create_synthesizer(&config.tts)?;
    let sink = CpalSink::open(&config.audio)?;
    let recorder = open_recorder(&config)?;

    let (events_tx, events_rx) = broadcast::channel(64);
    let (command_tx, command_rx) = mpsc::channel(8);

    let mut pipeline = PipelineCoordinator::new(config)
        .with_mode(PipelineMode::Conversation)
        .with_audio_source(Box::new(source))
        .with_stt(Box::new(stt))
        .with_agent(agent)
        .with_synthesizer(synthesizer)
        .with_sink(Box::new(sink))
        .with_command_source(command_rx)
        .with_events(events_tx);
    if let Some(recorder) = recorder {
        pipeline = pipeline.with_debug_recorder(recorder);
    }
    let cancel = pipeline.cancel_token();

    spawn_ctrl_c(cancel.clone());
    spawn_stdin_commands(command_tx, cancel.clone());
    tokio::spawn(print_conversation(events_rx, cancel));

    println!("\nReady! Speak into your microphone.");
    println!("Say or type \"stop.\" to pause and \"start.\" to resume. Press Ctrl+C to quit.\n");

    pipeline.run().await?;
    Ok(())
}

/// Echo the conversation to stdout.
async fn print_conversation(
    mut rx: broadcast::Receiver<PipelineEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(PipelineEvent::Transcribed { text }) => println!("You: {text}"),
            Ok(PipelineEvent::PlaybackStarted { text }) => println!("Assistant: {text}"),
            Ok(PipelineEvent::Paused { .. }) => println!("[paused, say \"start.\" to resume]"),
            Ok(PipelineEvent::Resumed) => println!("[resumed]"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "conversation printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalSource::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalSink::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

async fn run_transcribe(config: AssistantConfig) -> anyhow::Result<()> {
    println!(
        "voice-assist v{} - Transcription Mode",
        env!("CARGO_PKG_VERSION")
    );

    let source = CpalSource::open(
        &config.audio,
        config.segmenter.sample_rate,
        config.segmenter.block_size(),
    )?;
    let stt = WhisperApiStt::new(&config.stt)?;
    let recorder = open_recorder(&config)?;

    let mut pipeline = PipelineCoordinator::new(config)
        .with_mode(PipelineMode::TranscribeOnly)
        .with_audio_source(Box::new(source))
        .with_stt(Box::new(stt));
    if let Some(recorder) = recorder {
        pipeline = pipeline.with_debug_recorder(recorder);
    }
    spawn_ctrl_c(pipeline.cancel_token());

    println!("\nReady! Speak into your microphone. Press Ctrl+C to stop.\n");

    pipeline.run().await?;
    Ok(())
}
