//! Still-image replay feeding the shared frame buffer.
//!
//! Stands in for a capture device: a single image file or a directory of
//! images (replayed in file-name order, looping) is published at a fixed rate.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use frame_proc_common::buffer::SharedFrameBuffer;
use frame_proc_common::frame::Frame;
use image::ImageFormat;
use tracing::{debug, info};

use crate::worker::spawn_thread;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to decode image {0}: {1}")]
    Decode(String, image::ImageError),
    #[error("no images found in {0}")]
    Empty(String),
    #[error("failed to spawn replay thread: {0}")]
    Spawn(std::io::Error),
}

pub struct ReplaySource {
    device: String,
    frames: Vec<Frame>,
    interval: Duration,
}

impl ReplaySource {
    pub fn load(device: impl Into<String>, path: &Path, fps: f64) -> Result<Self, ReplayError> {
        let files = if path.is_dir() {
            image_files(path)?
        } else {
            vec![path.to_path_buf()]
        };
        if files.is_empty() {
            return Err(ReplayError::Empty(path.display().to_string()));
        }

        let mut frames = Vec::with_capacity(files.len());
        for file in &files {
            let image = image::open(file)
                .map_err(|e| ReplayError::Decode(file.display().to_string(), e))?;
            frames.push(Frame::from_dynamic(image));
        }

        let device = device.into();
        debug!(device, frames = frames.len(), path = %path.display(), "replay source loaded");
        Ok(Self {
            device,
            frames,
            interval: Duration::from_secs_f64(1.0 / fps.max(0.001)),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Start publishing on a background thread until the handle is stopped.
    pub fn spawn(self, buffer: Arc<SharedFrameBuffer>) -> Result<ReplayHandle, ReplayError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let name = format!("replay-{}", self.device);
        let handle =
            spawn_thread(name, move || self.run(&buffer, &flag)).map_err(ReplayError::Spawn)?;
        Ok(ReplayHandle { stop, handle })
    }

    fn run(self, buffer: &SharedFrameBuffer, stop: &AtomicBool) {
        info!(device = self.device, frames = self.frames.len(), "replay started");
        let mut published = 0u64;
        for frame in self.frames.iter().cycle() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let started = Instant::now();
            buffer.publish(&self.device, frame.clone());
            published += 1;
            if let Some(rest) = self.interval.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        info!(device = self.device, published, "replay stopped");
    }
}

pub struct ReplayHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ReplayHandle {
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

/// Decodable image files directly inside `dir`, sorted by file name.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>, ReplayError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| ReplayError::Read(dir.display().to_string(), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| ReplayError::Read(dir.display().to_string(), e))?
            .path();
        if path.is_file() && ImageFormat::from_path(&path).is_ok() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_proc_common::buffer::FrameSource;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn directory_replayed_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 4, Luma([20])).save(dir.path().join("b.png")).unwrap();
        GrayImage::from_pixel(4, 4, Luma([10])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let source = ReplaySource::load("cam0", dir.path(), 30.0).unwrap();
        assert_eq!(source.frame_count(), 2);
        assert_eq!(source.frames[0].as_bytes()[0], 10);
        assert_eq!(source.frames[1].as_bytes()[0], 20);
    }

    #[test]
    fn single_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        RgbImage::from_pixel(6, 3, Rgb([1, 2, 3])).save(&path).unwrap();

        let source = ReplaySource::load("cam0", &path, 15.0).unwrap();
        assert_eq!(source.frame_count(), 1);
        assert_eq!(source.frames[0].dimensions(), (6, 3));
        assert_eq!(source.frames[0].channels(), 3);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReplaySource::load("cam0", dir.path(), 15.0).err().unwrap();
        assert!(matches!(err, ReplayError::Empty(_)));
    }

    #[test]
    fn undecodable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let err = ReplaySource::load("cam0", &path, 15.0).err().unwrap();
        assert!(matches!(err, ReplayError::Decode(..)));
    }

    #[test]
    fn publishes_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        GrayImage::from_pixel(4, 4, Luma([99])).save(&path).unwrap();

        let buffer = Arc::new(SharedFrameBuffer::new());
        let handle = ReplaySource::load("cam0", &path, 200.0)
            .unwrap()
            .spawn(Arc::clone(&buffer))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while buffer.latest("cam0").map_or(true, |f| f.seq < 3) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.stop();

        let latest = buffer.latest("cam0").expect("nothing published");
        assert!(latest.seq >= 3);
        assert_eq!(latest.frame.as_bytes()[0], 99);

        let after = latest.seq;
        thread::sleep(Duration::from_millis(30));
        assert_eq!(buffer.latest("cam0").unwrap().seq, after);
    }
}
