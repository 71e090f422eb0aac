//! Per-device processing worker.
//!
//! A `FrameWorker` owns one thread that repeatedly pulls the latest frame for
//! its device, crops it to the ROI, runs the transform pipeline and hands the
//! result to the sink. Controllers talk to it from any thread.
//!
//! Two locks with disjoint scope:
//! - the control lock guards only the stop flag and run state, so `stop()`
//!   never waits for a frame to finish;
//! - the processing lock (inside `ProcessingConfig`) guards ROI, flags and
//!   settings, and is held by the run-loop while it reads and processes a
//!   frame, so configuration updates land between frames.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use frame_proc_common::buffer::FrameSource;
use frame_proc_common::config::WorkerConfig;
use frame_proc_common::frame::Roi;
use frame_proc_common::settings::{ProcessingFlags, ProcessingSettings};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::pipeline::TransformPipeline;
use crate::processing::{ConfigSnapshot, ProcessingConfig};
use crate::rate::{RateEstimator, DEFAULT_WINDOW};
use crate::sink::{FrameSink, ProcessedFrame, StatisticsEvent, StatisticsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Constructed, thread not started.
    Idle,
    Running,
    /// Stop flag set; the loop exits at the start of its next iteration.
    StopRequested,
    /// Terminal. A stopped worker cannot be restarted.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// RateEstimator window length.
    pub fps_window: usize,
    /// Sleep applied when the source has no frame ready.
    pub idle_backoff: Duration,
    /// Keep the processing lock across the pipeline instead of releasing it
    /// after the crop.
    pub coarse_lock: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            fps_window: DEFAULT_WINDOW,
            idle_backoff: Duration::from_millis(5),
            coarse_lock: true,
        }
    }
}

impl From<&WorkerConfig> for WorkerOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            fps_window: config.fps_window,
            idle_backoff: Duration::from_millis(config.idle_backoff_ms),
            coarse_lock: config.coarse_lock,
        }
    }
}

struct RunControl {
    stop_requested: bool,
    state: RunState,
}

struct Shared {
    device: String,
    control: Mutex<RunControl>,
    processing: ProcessingConfig,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, RunControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_stop_request(&self) -> bool {
        let mut control = self.control();
        if control.stop_requested {
            control.stop_requested = false;
            true
        } else {
            false
        }
    }
}

pub struct FrameWorker {
    shared: Arc<Shared>,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    pipeline: TransformPipeline,
    options: WorkerOptions,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FrameWorker {
    pub fn new(
        device: impl Into<String>,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        pipeline: TransformPipeline,
        processing: ProcessingConfig,
        options: WorkerOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                device: device.into(),
                control: Mutex::new(RunControl {
                    stop_requested: false,
                    state: RunState::Idle,
                }),
                processing,
            }),
            source,
            sink,
            pipeline,
            options,
            handle: Mutex::new(None),
        }
    }

    pub fn device(&self) -> &str {
        &self.shared.device
    }

    pub fn state(&self) -> RunState {
        self.shared.control().state
    }

    /// Spawn the run-loop thread.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut control = self.shared.control();
        match control.state {
            RunState::Idle => {}
            RunState::Running | RunState::StopRequested => {
                return Err(WorkerError::AlreadyStarted(self.shared.device.clone()))
            }
            RunState::Stopped => return Err(WorkerError::Stopped(self.shared.device.clone())),
        }

        let run_loop = RunLoop {
            shared: Arc::clone(&self.shared),
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            pipeline: self.pipeline.clone(),
            idle_backoff: self.options.idle_backoff,
            coarse_lock: self.options.coarse_lock,
            rate: RateEstimator::new(self.options.fps_window),
            stats: StatisticsSnapshot::default(),
            timer: None,
            frame_pending: false,
            last_error: None,
        };
        let handle = spawn_thread(format!("proc-{}", self.shared.device), move || run_loop.run())
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;
        control.state = RunState::Running;
        drop(control);

        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Ask the run-loop to exit. Returns immediately; at most the frame
    /// currently in flight is still emitted.
    pub fn stop(&self) {
        let mut control = self.shared.control();
        match control.state {
            RunState::Idle => {
                control.state = RunState::Stopped;
                debug!(device = self.shared.device, "worker stopped before start");
            }
            RunState::Running => {
                control.stop_requested = true;
                control.state = RunState::StopRequested;
                debug!(device = self.shared.device, "stop requested");
            }
            RunState::StopRequested | RunState::Stopped => {}
        }
    }

    /// Wait for the run-loop thread to finish. Returns immediately if it was
    /// never started or has already been joined.
    pub fn join(&self) -> Result<(), WorkerError> {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| WorkerError::ThreadPanicked(self.shared.device.clone())),
            None => Ok(()),
        }
    }

    pub fn set_roi(&self, roi: Roi) -> Result<(), WorkerError> {
        self.shared.processing.set_roi(roi).inspect_err(|e| {
            warn!(device = self.shared.device, error = %e, "rejected ROI update");
        })
    }

    pub fn set_flags(&self, flags: ProcessingFlags) {
        self.shared.processing.replace_flags(flags);
    }

    pub fn set_settings(&self, settings: ProcessingSettings) -> Result<(), WorkerError> {
        self.shared.processing.replace_settings(settings).inspect_err(|e| {
            warn!(device = self.shared.device, error = %e, "rejected settings update");
        })
    }

    pub fn current_roi(&self) -> Roi {
        self.shared.processing.roi()
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.shared.processing.snapshot()
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        self.stop();
        let _ = self.join();
    }
}

/// State owned by the worker thread.
struct RunLoop {
    shared: Arc<Shared>,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    pipeline: TransformPipeline,
    idle_backoff: Duration,
    coarse_lock: bool,
    rate: RateEstimator,
    stats: StatisticsSnapshot,
    /// Start of the current iteration.
    timer: Option<Instant>,
    /// A frame was emitted whose timing sample has not been closed yet.
    frame_pending: bool,
    last_error: Option<WorkerError>,
}

impl RunLoop {
    fn run(mut self) {
        let device = self.shared.device.clone();
        info!(device, fps_window = self.rate.window(), "processing worker started");

        loop {
            if self.shared.take_stop_request() {
                break;
            }

            // This sample measures the previous iteration.
            let elapsed_ms = self.restart_timer();
            self.close_pending_frame();

            match self.process_frame() {
                Ok(Some(frame)) => {
                    self.sink.on_frame(frame);
                    self.frame_pending = true;
                    self.last_error = None;
                }
                Ok(None) => thread::sleep(self.idle_backoff),
                Err(err) => {
                    self.report_error(err);
                    thread::sleep(self.idle_backoff);
                }
            }

            if let Some(average) = self.rate.record_sample(elapsed_ms) {
                self.stats.average_fps = average;
                debug!(
                    device,
                    frames_processed = self.stats.frames_processed,
                    average_fps = format!("{:.1}", average),
                    "processing rate"
                );
                self.sink.on_statistics(&device, StatisticsEvent::Periodic(self.stats));
            }
        }

        let elapsed_ms = self.restart_timer();
        if let Some(average) = self.rate.record_sample(elapsed_ms) {
            self.stats.average_fps = average;
        }
        self.close_pending_frame();
        self.sink.on_statistics(&device, StatisticsEvent::Final(self.stats));
        self.shared.control().state = RunState::Stopped;

        info!(
            device,
            frames_processed = self.stats.frames_processed,
            average_fps = format!("{:.1}", self.stats.average_fps),
            "processing worker stopped"
        );
    }

    /// Read, crop and process one frame. `Ok(None)` means the source had
    /// nothing ready.
    fn process_frame(&self) -> Result<Option<ProcessedFrame>, WorkerError> {
        let mut guard = self.shared.processing.lock();
        let Some(buffered) = self.source.latest(&self.shared.device) else {
            return Ok(None);
        };
        let (width, height) = buffered.frame.dimensions();
        guard.observe_frame_size(width, height);
        let snapshot = guard.snapshot();
        let cropped = buffered.frame.crop(&snapshot.roi)?;

        let held = if self.coarse_lock {
            Some(guard)
        } else {
            drop(guard);
            None
        };

        let pipeline = &self.pipeline;
        let applied =
            panic::catch_unwind(AssertUnwindSafe(|| pipeline.apply(cropped, &snapshot)));
        let processed = match applied {
            Ok(result) => result?,
            Err(payload) => {
                return Err(WorkerError::TransformFailure {
                    step: "pipeline",
                    reason: panic_message(payload.as_ref()),
                })
            }
        };

        let frame = ProcessedFrame {
            device: self.shared.device.clone(),
            source_seq: buffered.seq,
            captured_at_ms: buffered.captured_at_ms,
            image: processed.into_dynamic(),
        };
        drop(held);
        Ok(Some(frame))
    }

    fn restart_timer(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed_ms = self
            .timer
            .map(|start| now.duration_since(start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        self.timer = Some(now);
        elapsed_ms
    }

    fn close_pending_frame(&mut self) {
        if self.frame_pending {
            self.stats.frames_processed += 1;
            self.frame_pending = false;
        }
    }

    /// Report a skipped frame. An error identical to the previous one is not
    /// reported again.
    fn report_error(&mut self, err: WorkerError) {
        if self.last_error.as_ref() == Some(&err) {
            return;
        }
        warn!(device = self.shared.device, error = %err, "skipping frame");
        self.sink.on_statistics(
            &self.shared.device,
            StatisticsEvent::Error {
                snapshot: self.stats,
                error: err.clone(),
            },
        );
        self.last_error = Some(err);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Spawn a named thread that inherits the current tracing dispatcher.
pub(crate) fn spawn_thread<F, T>(name: String, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name)
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}
