use std::sync::{Mutex, MutexGuard, PoisonError};

use frame_proc_common::frame::Roi;
use frame_proc_common::settings::{ProcessingFlags, ProcessingSettings};
use tracing::debug;

use crate::error::WorkerError;

/// Immutable copy of the processing configuration taken under one lock.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConfigSnapshot {
    pub roi: Roi,
    pub flags: ProcessingFlags,
    pub settings: ProcessingSettings,
}

#[derive(Debug, Default)]
struct ProcessingState {
    roi: Roi,
    flags: ProcessingFlags,
    settings: ProcessingSettings,
    /// Dimensions of the most recent source frame, used to vet ROI updates.
    frame_size: Option<(u32, u32)>,
}

/// ROI, flags and settings shared between a controller and one run-loop.
///
/// All writes replace whole values under the processing lock, so a reader
/// never sees half of one update and half of another.
#[derive(Debug, Default)]
pub struct ProcessingConfig {
    state: Mutex<ProcessingState>,
}

impl ProcessingConfig {
    /// Settings are validated; an invalid set is refused.
    pub fn new(flags: ProcessingFlags, settings: ProcessingSettings) -> Result<Self, WorkerError> {
        settings.validate()?;
        Ok(Self {
            state: Mutex::new(ProcessingState {
                flags,
                settings,
                ..Default::default()
            }),
        })
    }

    /// Store a new ROI. Once a frame has been seen the rectangle must fit it;
    /// a rejected ROI leaves the previous one in place.
    pub fn set_roi(&self, roi: Roi) -> Result<(), WorkerError> {
        let mut state = self.state();
        if let Some((width, height)) = state.frame_size {
            if !roi.is_unset() && !roi.fits_within(width, height) {
                return Err(WorkerError::InvalidRoi { roi, width, height });
            }
        }
        debug!(%roi, "ROI updated");
        state.roi = roi;
        Ok(())
    }

    pub fn replace_flags(&self, flags: ProcessingFlags) {
        self.state().flags = flags;
    }

    pub fn replace_settings(&self, settings: ProcessingSettings) -> Result<(), WorkerError> {
        settings.validate()?;
        self.state().settings = settings;
        Ok(())
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.lock().snapshot()
    }

    pub fn roi(&self) -> Roi {
        self.state().roi
    }

    /// Take the processing lock. The run-loop holds it while it reads and
    /// processes a frame.
    pub(crate) fn lock(&self) -> ProcessingGuard<'_> {
        ProcessingGuard(self.state())
    }

    fn state(&self) -> MutexGuard<'_, ProcessingState> {
        // Every critical section only copies plain values, so the state is
        // consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct ProcessingGuard<'a>(MutexGuard<'a, ProcessingState>);

impl ProcessingGuard<'_> {
    pub(crate) fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            roi: self.0.roi,
            flags: self.0.flags,
            settings: self.0.settings,
        }
    }

    pub(crate) fn observe_frame_size(&mut self, width: u32, height: u32) {
        self.0.frame_size = Some((width, height));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_proc_common::settings::{SettingsError, Smoothing};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn roi_accepted_before_first_frame() {
        let config = ProcessingConfig::default();
        config.set_roi(Roi::new(500, 500, 10, 10)).unwrap();
        assert_eq!(config.roi(), Roi::new(500, 500, 10, 10));
    }

    #[test]
    fn out_of_bounds_roi_keeps_previous() {
        let config = ProcessingConfig::default();
        config.lock().observe_frame_size(100, 100);
        config.set_roi(Roi::new(0, 0, 50, 50)).unwrap();

        let err = config.set_roi(Roi::new(0, 0, 150, 50)).unwrap_err();
        assert_eq!(
            err,
            WorkerError::InvalidRoi {
                roi: Roi::new(0, 0, 150, 50),
                width: 100,
                height: 100
            }
        );
        assert_eq!(config.roi(), Roi::new(0, 0, 50, 50));
    }

    #[test]
    fn invalid_settings_keep_previous() {
        let config = ProcessingConfig::default();
        let bad = ProcessingSettings {
            smoothing: Smoothing::Median { size: 2 },
            ..Default::default()
        };
        let err = config.replace_settings(bad).unwrap_err();
        assert_eq!(err, WorkerError::InvalidSettings(SettingsError::EvenKernel(2)));
        assert_eq!(config.snapshot().settings, ProcessingSettings::default());
    }

    #[test]
    fn new_rejects_invalid_settings() {
        let mut settings = ProcessingSettings::default();
        settings.canny.aperture_size = 9;
        assert!(ProcessingConfig::new(ProcessingFlags::default(), settings).is_err());
    }

    #[test]
    fn concurrent_flag_replace_is_atomic() {
        let config = Arc::new(ProcessingConfig::default());
        let all_on = ProcessingFlags {
            grayscale: true,
            smooth: true,
            dilate: true,
            erode: true,
            flip: true,
            edge_detect: true,
            speed_overlay: true,
        };
        let all_off = ProcessingFlags::default();

        let writer = {
            let config = Arc::clone(&config);
            thread::spawn(move || {
                for i in 0..10_000 {
                    config.replace_flags(if i % 2 == 0 { all_on } else { all_off });
                }
            })
        };

        for _ in 0..10_000 {
            let flags = config.snapshot().flags;
            assert!(flags == all_on || flags == all_off, "torn flags: {flags:?}");
        }
        writer.join().unwrap();
    }
}
