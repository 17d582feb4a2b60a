//! Pause/resume control: spoken and typed commands, queue flushing.

use crate::pipeline::messages::PipelineEvent;
use crate::pipeline::queue::Drainable;
use crate::pipeline::state::{RunState, RunStateWriter, TurnLatch};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A control command, spoken or typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Pause gated stages and flush queued work.
    Stop,
    /// Resume gated stages.
    Start,
}

impl Command {
    /// Recognise `"stop."` / `"start."` after trimming, ignoring case.
    ///
    /// Anything else, including the words without the full stop, is not a
    /// command.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "stop." => Some(Self::Stop),
            "start." => Some(Self::Start),
            _ => None,
        }
    }
}

/// Sole writer of the run state.
pub struct PipelineController {
    writer: RunStateWriter,
    queues: Vec<Box<dyn Drainable>>,
    turn: TurnLatch,
    events: Option<broadcast::Sender<PipelineEvent>>,
}

impl PipelineController {
    /// Create a controller owning `writer`. `turn` is released on every pause.
    pub fn new(writer: RunStateWriter, turn: TurnLatch) -> Self {
        Self {
            writer,
            queues: Vec::new(),
            turn,
            events: None,
        }
    }

    /// Flush `queue` on every pause.
    pub fn with_queue(mut self, queue: impl Drainable + 'static) -> Self {
        self.queues.push(Box::new(queue));
        self
    }

    /// Report pause/resume on `tx`.
    pub fn with_events(mut self, tx: broadcast::Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// A reader of the state this controller writes.
    pub fn state(&self) -> RunState {
        self.writer.subscribe()
    }

    /// Pause and discard everything queued downstream.
    ///
    /// Returns the number of discarded items, or `None` if already paused.
    /// Engine calls already in progress run to completion; their output
    /// carries the old epoch and is dropped by the next gated stage.
    pub fn pause(&self) -> Option<usize> {
        let epoch = self.writer.pause()?;
        let mut drained = 0;
        for queue in &self.queues {
            let n = queue.drain();
            if n > 0 {
                debug!(queue = queue.name(), n, "drained");
            }
            drained += n;
        }
        self.turn.end();
        info!(epoch, drained, "pipeline paused");
        self.emit(PipelineEvent::Paused { drained });
        Some(drained)
    }

    /// Resume gated stages. Returns `false` if already running.
    pub fn resume(&self) -> bool {
        if !self.writer.resume() {
            return false;
        }
        info!(epoch = self.writer.snapshot().epoch, "pipeline resumed");
        self.emit(PipelineEvent::Resumed);
        true
    }

    /// Apply one command.
    pub fn apply(&self, command: Command) {
        match command {
            Command::Stop => {
                if self.pause().is_none() {
                    debug!("stop ignored, already paused");
                }
            }
            Command::Start => {
                if !self.resume() {
                    debug!("start ignored, already running");
                }
            }
        }
    }

    /// Serve commands from the transcription stage and an optional external
    /// source until cancelled.
    ///
    /// Neither source blocks the other. When several commands are waiting at
    /// once only the most recently read one is applied.
    pub async fn run(
        self,
        mut spoken: mpsc::UnboundedReceiver<Command>,
        mut external: Option<mpsc::Receiver<Command>>,
        cancel: CancellationToken,
    ) {
        let mut spoken_open = true;
        loop {
            let first = tokio::select! {
                () = cancel.cancelled() => break,
                cmd = spoken.recv(), if spoken_open => match cmd {
                    Some(cmd) => cmd,
                    None => {
                        spoken_open = false;
                        continue;
                    }
                },
                cmd = recv_external(&mut external) => match cmd {
                    Some(cmd) => cmd,
                    None => {
                        debug!("external command source closed");
                        external = None;
                        continue;
                    }
                },
            };

            let latest = latest_command(first, &mut spoken, external.as_mut());
            self.apply(latest);
        }
        debug!("controller stopped");
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Coalesce commands that are already waiting behind `first`.
fn latest_command(
    first: Command,
    spoken: &mut mpsc::UnboundedReceiver<Command>,
    external: Option<&mut mpsc::Receiver<Command>>,
) -> Command {
    let mut latest = first;
    let mut superseded = 0usize;
    while let Ok(cmd) = spoken.try_recv() {
        latest = cmd;
        superseded += 1;
    }
    if let Some(rx) = external {
        while let Ok(cmd) = rx.try_recv() {
            latest = cmd;
            superseded += 1;
        }
    }
    if superseded > 0 {
        debug!(superseded, ?latest, "commands arrived together, latest wins");
    }
    latest
}

async fn recv_external(rx: &mut Option<mpsc::Receiver<Command>>) -> Option<Command> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read `stop.` / `start.` lines from stdin and forward them to `tx`.
pub fn spawn_stdin_commands(
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        read_commands(BufReader::new(tokio::io::stdin()), tx, cancel).await;
    })
}

/// Forward every command line from `reader` to `tx` until EOF or cancel.
///
/// Unrecognised lines are logged and skipped.
pub async fn read_commands<R>(reader: R, tx: mpsc::Sender<Command>, cancel: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    None => warn!("unknown command {line:?}, expected \"stop.\" or \"start.\""),
                }
            }
            Ok(None) => {
                debug!("command input closed");
                break;
            }
            Err(e) => {
                warn!("failed to read command input: {e}");
                break;
            }
        }
    }
}
