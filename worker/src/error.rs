use frame_proc_common::frame::{FrameError, Roi};
use frame_proc_common::settings::SettingsError;

/// Everything a worker can report, either to the controller as a rejected
/// call or to the sink as an error-tagged statistics event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkerError {
    #[error("ROI {roi} does not fit within a {width}x{height} frame")]
    InvalidRoi { roi: Roi, width: u32, height: u32 },
    #[error("invalid processing settings: {0}")]
    InvalidSettings(#[from] SettingsError),
    #[error("transform `{step}` failed: {reason}")]
    TransformFailure { step: &'static str, reason: String },
    #[error("frame error: {0}")]
    Frame(FrameError),
    #[error("worker for device {0} is already running")]
    AlreadyStarted(String),
    #[error("worker for device {0} has stopped and cannot be restarted")]
    Stopped(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
    #[error("worker thread for device {0} panicked")]
    ThreadPanicked(String),
}

impl From<FrameError> for WorkerError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::RoiOutOfBounds { roi, width, height } => {
                WorkerError::InvalidRoi { roi, width, height }
            }
            other => WorkerError::Frame(other),
        }
    }
}
