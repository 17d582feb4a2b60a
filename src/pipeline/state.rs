//! Shared run-state signals observed by every stage.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Whether stages should consume input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Stages process their queues.
    Running,
    /// Stages idle; only control commands are honoured.
    Paused,
}

/// Snapshot of the run state broadcast to stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSnapshot {
    /// Current mode.
    pub mode: RunMode,
    /// Incremented on every pause. Items stamped with an older epoch are stale.
    pub epoch: u64,
}

/// Create a linked writer/reader pair, initially running at epoch 0.
pub fn run_state() -> (RunStateWriter, RunState) {
    let (tx, rx) = watch::channel(RunSnapshot {
        mode: RunMode::Running,
        epoch: 0,
    });
    (RunStateWriter { tx }, RunState { rx })
}

/// Write side of the run state, owned by the pipeline controller.
#[derive(Debug)]
pub struct RunStateWriter {
    tx: watch::Sender<RunSnapshot>,
}

impl RunStateWriter {
    /// Switch to paused and start a new epoch. Returns the new epoch, or
    /// `None` if already paused.
    pub fn pause(&self) -> Option<u64> {
        let mut new_epoch = None;
        self.tx.send_if_modified(|snap| {
            if snap.mode == RunMode::Paused {
                return false;
            }
            snap.mode = RunMode::Paused;
            snap.epoch += 1;
            new_epoch = Some(snap.epoch);
            true
        });
        new_epoch
    }

    /// Switch to running. Returns `false` if already running.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|snap| {
            if snap.mode == RunMode::Running {
                return false;
            }
            snap.mode = RunMode::Running;
            true
        })
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> RunSnapshot {
        *self.tx.borrow()
    }

    /// New reader observing this writer.
    pub fn subscribe(&self) -> RunState {
        RunState {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of the run state, cloned into each stage.
#[derive(Debug, Clone)]
pub struct RunState {
    rx: watch::Receiver<RunSnapshot>,
}

impl RunState {
    /// Current snapshot.
    pub fn snapshot(&self) -> RunSnapshot {
        *self.rx.borrow()
    }

    /// Whether stages should currently consume input.
    pub fn is_running(&self) -> bool {
        self.snapshot().mode == RunMode::Running
    }

    /// Current pause epoch.
    pub fn epoch(&self) -> u64 {
        self.snapshot().epoch
    }

    /// Wait until the pipeline is running. Returns immediately if it already is.
    ///
    /// If the writer is dropped while paused this never resolves; callers
    /// race it against their cancellation token.
    pub async fn wait_running(&mut self) {
        if self
            .rx
            .wait_for(|s| s.mode == RunMode::Running)
            .await
            .is_err()
        {
            std::future::pending::<()>().await;
        }
    }

    /// Wait until the pipeline is paused.
    pub async fn wait_paused(&mut self) {
        if self
            .rx
            .wait_for(|s| s.mode == RunMode::Paused)
            .await
            .is_err()
        {
            std::future::pending::<()>().await;
        }
    }
}

/// Set while playback is emitting assistant audio. Written only by the
/// playback stage.
#[derive(Debug, Clone, Default)]
pub struct SpeakingSignal(Arc<AtomicBool>);

impl SpeakingSignal {
    /// New signal, initially not speaking.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the flag.
    pub fn set(&self, speaking: bool) {
        self.0.store(speaking, Ordering::Release);
    }

    /// Whether the assistant is speaking.
    pub fn is_speaking(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Set while a turn is in flight: from the moment the segmenter emits the
/// segment that opens it until that segment is discarded, its reply has
/// finished playing, or the controller flushes on pause.
#[derive(Debug, Clone, Default)]
pub struct TurnLatch(Arc<AtomicBool>);

impl TurnLatch {
    /// New latch, initially idle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a turn as in progress.
    pub fn begin(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Start a turn unless one is already in progress. Returns whether this
    /// call started it.
    pub fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the current turn finished.
    pub fn end(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Whether a turn is in progress.
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
