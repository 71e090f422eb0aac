use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use frame_proc_common::buffer::{FrameSource, SharedFrameBuffer};
use frame_proc_common::config::Config;
use frame_proc_worker::pipeline::{Overlay, TransformPipeline};
use frame_proc_worker::processing::ProcessingConfig;
use frame_proc_worker::replay::ReplaySource;
use frame_proc_worker::sink::{
    ChannelSink, FrameSink, ProcessedFrame, SinkReceivers, StatisticsEvent,
};
use frame_proc_worker::worker::{FrameWorker, WorkerOptions};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        devices = config.devices.len(),
        fps_window = config.worker.fps_window,
        coarse_lock = config.worker.coarse_lock,
        "starting frame-proc"
    );

    let overlay = match &config.overlay.font_path {
        Some(path) => Overlay::from_font_file(path).unwrap_or_else(|e| {
            warn!(error = %e, "overlay font unavailable, outlining the label area instead");
            Overlay::default()
        }),
        None => Overlay::default(),
    };
    debug!(font = overlay.has_font(), "overlay ready");
    let pipeline = TransformPipeline::new(overlay);

    let buffer = Arc::new(SharedFrameBuffer::new());
    let (sink, receivers) = ChannelSink::new(config.worker.frame_queue);
    let sink: Arc<dyn FrameSink> = Arc::new(sink);

    // Producers first so workers find frames on their first iterations.
    let mut replays = Vec::with_capacity(config.devices.len());
    for device in &config.devices {
        let started =
            ReplaySource::load(&device.key, &device.source, device.fps).and_then(|source| {
                info!(
                    device = source.device(),
                    frames = source.frame_count(),
                    fps = device.fps,
                    "frame source loaded"
                );
                source.spawn(Arc::clone(&buffer))
            });
        match started {
            Ok(handle) => replays.push(handle),
            Err(e) => {
                error!(device = device.key, error = %e, "failed to start frame source");
                std::process::exit(1);
            }
        }
    }

    let options = WorkerOptions::from(&config.worker);
    let mut workers = Vec::with_capacity(config.devices.len());
    for device in &config.devices {
        let processing = &config.processing;
        let processing = match ProcessingConfig::new(processing.flags, processing.settings) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "invalid processing settings");
                std::process::exit(1);
            }
        };
        let worker = FrameWorker::new(
            device.key.clone(),
            Arc::clone(&buffer) as Arc<dyn FrameSource>,
            Arc::clone(&sink),
            pipeline.clone(),
            processing,
            options.clone(),
        );
        if let Some(roi) = device.roi {
            // A rejected ROI is logged by the worker; it keeps the full frame.
            let _ = worker.set_roi(roi);
        }
        if let Err(e) = worker.start() {
            error!(device = device.key, error = %e, "failed to start worker");
            std::process::exit(1);
        }
        workers.push(worker);
    }
    drop(sink);

    let display = tokio::task::spawn_blocking(move || drain_sink(receivers));

    match config.output.run_for_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!(secs, "run time elapsed")
                }
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
        }
    }

    info!("shutting down");
    for worker in &workers {
        worker.stop();
    }
    let shutdown = tokio::task::spawn_blocking(move || {
        for worker in &workers {
            if let Err(e) = worker.join() {
                error!(device = worker.device(), error = %e, "worker did not shut down cleanly");
            }
        }
        drop(workers);
        for replay in replays {
            replay.stop();
        }
        info!(devices = ?buffer.devices(), "frame sources stopped");
    });
    if let Err(e) = shutdown.await {
        error!(error = %e, "shutdown task failed");
    }

    let last_frames = match display.await {
        Ok(frames) => frames,
        Err(e) => {
            error!(error = %e, "display task failed");
            HashMap::new()
        }
    };

    if let Some(dir) = &config.output.snapshot_dir {
        save_snapshots(dir, &last_frames);
    }
    info!("frame-proc stopped");
}

/// Consume worker output until every worker has dropped its sink handle.
/// Keeps the newest frame per device.
fn drain_sink(receivers: SinkReceivers) -> HashMap<String, ProcessedFrame> {
    let mut last_frames = HashMap::new();
    let mut received: u64 = 0;
    loop {
        let result = receivers.statistics.recv_timeout(Duration::from_millis(50));
        for frame in receivers.frames.try_iter() {
            received += 1;
            last_frames.insert(frame.device.clone(), frame);
        }
        match result {
            Ok((device, event)) => log_statistics(&device, &event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    for frame in receivers.frames.try_iter() {
        received += 1;
        last_frames.insert(frame.device.clone(), frame);
    }
    debug!(received, "display side drained");
    last_frames
}

fn log_statistics(device: &str, event: &StatisticsEvent) {
    match event {
        StatisticsEvent::Periodic(s) => info!(
            device,
            frames_processed = s.frames_processed,
            average_fps = format!("{:.1}", s.average_fps),
            "processing statistics"
        ),
        StatisticsEvent::Error { snapshot, error } => debug!(
            device,
            frames_processed = snapshot.frames_processed,
            error = %error,
            "frame skipped"
        ),
        StatisticsEvent::Final(s) => info!(
            device,
            frames_processed = s.frames_processed,
            average_fps = format!("{:.1}", s.average_fps),
            "final statistics"
        ),
    }
}

fn save_snapshots(dir: &Path, frames: &HashMap<String, ProcessedFrame>) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        error!(path = %dir.display(), error = %e, "failed to create snapshot directory");
        return;
    }
    for (device, frame) in frames {
        let path = dir.join(format!("{device}.png"));
        match frame.image.save(&path) {
            Ok(()) => info!(
                device,
                path = %path.display(),
                seq = frame.source_seq,
                "snapshot saved"
            ),
            Err(e) => error!(device, path = %path.display(), error = %e, "failed to save snapshot"),
        }
    }
}
