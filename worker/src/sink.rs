use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::DynamicImage;
use tracing::debug;

use crate::error::WorkerError;

/// A finished frame ready for display.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub device: String,
    /// Sequence number of the source frame this was produced from.
    pub source_seq: u64,
    pub captured_at_ms: i64,
    pub image: DynamicImage,
}

/// Read-only copy of a worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatisticsSnapshot {
    pub frames_processed: u64,
    pub average_fps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatisticsEvent {
    /// A new average rate was published.
    Periodic(StatisticsSnapshot),
    /// A frame was skipped because of `error`; the worker keeps running.
    Error {
        snapshot: StatisticsSnapshot,
        error: WorkerError,
    },
    /// The run-loop has exited. Sent exactly once per started worker.
    Final(StatisticsSnapshot),
}

impl StatisticsEvent {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        match self {
            StatisticsEvent::Periodic(s) | StatisticsEvent::Final(s) => *s,
            StatisticsEvent::Error { snapshot, .. } => *snapshot,
        }
    }
}

/// Downstream contract. Both calls come from the worker thread and must not
/// block it; a slow consumer has to queue or drop on its own side.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: ProcessedFrame);

    fn on_statistics(&self, device: &str, event: StatisticsEvent);
}

/// Sink that forwards into crossbeam channels.
///
/// Frames go through a bounded queue and are dropped when it is full;
/// statistics use an unbounded queue so the final event is never lost.
#[derive(Clone)]
pub struct ChannelSink {
    frames: Sender<ProcessedFrame>,
    statistics: Sender<(String, StatisticsEvent)>,
}

pub struct SinkReceivers {
    pub frames: Receiver<ProcessedFrame>,
    pub statistics: Receiver<(String, StatisticsEvent)>,
}

impl ChannelSink {
    pub fn new(frame_capacity: usize) -> (Self, SinkReceivers) {
        let (frames_tx, frames_rx) = crossbeam_channel::bounded(frame_capacity.max(1));
        let (stats_tx, stats_rx) = crossbeam_channel::unbounded();
        (
            Self {
                frames: frames_tx,
                statistics: stats_tx,
            },
            SinkReceivers {
                frames: frames_rx,
                statistics: stats_rx,
            },
        )
    }
}

impl FrameSink for ChannelSink {
    fn on_frame(&self, frame: ProcessedFrame) {
        match self.frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                debug!(
                    device = frame.device,
                    seq = frame.source_seq,
                    "frame queue full, dropping frame"
                );
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn on_statistics(&self, device: &str, event: StatisticsEvent) {
        let _ = self.statistics.send((device.to_string(), event));
    }
}
