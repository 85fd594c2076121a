//! Dedicated decode thread behind a one-slot frame handoff

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use super::control::ScanControl;
use crate::capture::RawFrame;
use crate::decode::{DecodeDispatcher, FrameOutcome};
use crate::error::{ScanError, ScanResult};

const WORKER_THREAD_NAME: &str = "barscan-decode";

/// Frame counters updated by the decode thread
#[derive(Default)]
pub struct PipelineStats {
    frames_received: AtomicUsize,
    frames_decoded: AtomicUsize,
    frames_failed: AtomicUsize,
    frames_skipped: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub received: usize,
    pub decoded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Delivered while paused and thrown away
    pub dropped: usize,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.frames_received.load(Ordering::Relaxed),
            decoded: self.frames_decoded.load(Ordering::Relaxed),
            failed: self.frames_failed.load(Ordering::Relaxed),
            skipped: self.frames_skipped.load(Ordering::Relaxed),
            dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &FrameOutcome) {
        match outcome {
            FrameOutcome::Decoded(_) => {
                self.frames_decoded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_decoded").increment(1);
            }
            FrameOutcome::NoCodeFound => {
                self.frames_failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_failed").increment(1);
            }
            FrameOutcome::Skipped(_) => {
                self.frames_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Owns the decode thread.
///
/// At most one frame is in flight: the thread hands out a readiness token
/// when it is idle, and producers wait for that token before grabbing the
/// next frame from the hardware.
pub struct ScanWorker {
    frame_tx: Option<Sender<RawFrame>>,
    ready_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<CachePadded<PipelineStats>>,
}

impl ScanWorker {
    /// Start the decode thread. Outcomes of processed frames arrive on the
    /// returned channel in frame order; frames dropped while paused produce
    /// no outcome.
    pub fn spawn(
        dispatcher: DecodeDispatcher,
        control: ScanControl,
        core: Option<usize>,
    ) -> ScanResult<(Self, Receiver<FrameOutcome>)> {
        let (frame_tx, frame_rx) = flume::bounded::<RawFrame>(1);
        let (ready_tx, ready_rx) = flume::bounded::<()>(1);
        let (outcome_tx, outcome_rx) = flume::unbounded();
        let stats = Arc::new(CachePadded::new(PipelineStats::default()));

        let thread_stats = stats.clone();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                if let Some(core) = core {
                    pin_to_core(core);
                }
                run(dispatcher, control, frame_rx, ready_tx, outcome_tx, &thread_stats);
            })?;

        Ok((
            Self {
                frame_tx: Some(frame_tx),
                ready_rx,
                handle: Some(handle),
                stats,
            },
            outcome_rx,
        ))
    }

    /// Wait until the thread can take another frame. `Ok(false)` on timeout.
    pub fn wait_ready(&self, timeout: Duration) -> ScanResult<bool> {
        match self.ready_rx.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(ScanError::WorkerGone),
        }
    }

    /// Hand a frame to the thread. Call only after [`ScanWorker::wait_ready`]
    /// returned `true`.
    pub fn submit(&self, frame: RawFrame) -> ScanResult<()> {
        let tx = self.frame_tx.as_ref().ok_or(ScanError::WorkerGone)?;
        tx.send(frame).map_err(|_| ScanError::WorkerGone)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting frames and wait for the thread to finish the one it
    /// is processing.
    pub fn shutdown(&mut self) {
        self.frame_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Decode thread panicked");
            }
            info!(stats = ?self.stats.snapshot(), "Decode thread stopped");
        }
    }
}

impl Drop for ScanWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut dispatcher: DecodeDispatcher,
    control: ScanControl,
    frame_rx: Receiver<RawFrame>,
    ready_tx: Sender<()>,
    outcome_tx: Sender<FrameOutcome>,
    stats: &PipelineStats,
) {
    debug!("Decode thread started");
    signal_ready(&ready_tx);

    while let Ok(frame) = frame_rx.recv() {
        stats.frames_received.fetch_add(1, Ordering::Relaxed);

        if control.is_paused() {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("frames_dropped").increment(1);
        } else {
            let geometry = control.geometry();
            let outcome = dispatcher.dispatch(&frame, geometry.as_deref(), control.policy());
            stats.record(&outcome);
            metrics::histogram!("frame_latency_us")
                .record(frame.timestamp.elapsed().as_micros() as f64);
            if outcome_tx.send(outcome).is_err() {
                debug!("Outcome receiver dropped, stopping decode thread");
                break;
            }
        }

        signal_ready(&ready_tx);
    }
    debug!("Frame channel closed");
}

fn signal_ready(ready_tx: &Sender<()>) {
    // Full means a token is already waiting
    if let Err(TrySendError::Disconnected(_)) = ready_tx.try_send(()) {
        debug!("No producer waiting for readiness");
    }
}

fn pin_to_core(core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("Could not enumerate CPU cores, decode thread left unpinned");
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            debug!(core, "Decode thread pinned");
        }
        _ => warn!(core, "Could not pin decode thread"),
    }
}
