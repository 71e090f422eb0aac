//! The fixed-order transform chain applied to every cropped frame.

pub mod edges;
pub mod overlay;
pub mod transforms;

use frame_proc_common::frame::Frame;

use crate::error::WorkerError;
use crate::processing::ConfigSnapshot;

pub use overlay::Overlay;

/// Applies the enabled transforms in a fixed order:
/// grayscale, smoothing, dilate, erode, flip, edge detection, overlay.
///
/// A disabled step passes the frame through unchanged. Given the same frame
/// and snapshot the output is always the same.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    overlay: Overlay,
}

impl TransformPipeline {
    pub fn new(overlay: Overlay) -> Self {
        Self { overlay }
    }

    pub fn apply(&self, frame: Frame, snapshot: &ConfigSnapshot) -> Result<Frame, WorkerError> {
        let flags = &snapshot.flags;
        let settings = &snapshot.settings;
        settings.validate()?;

        let mut frame = frame;
        if flags.grayscale {
            frame = transforms::grayscale(frame);
        }
        if flags.smooth {
            frame = transforms::smooth(frame, &settings.smoothing);
        }
        if flags.dilate {
            frame = transforms::dilate(frame, settings.dilate_iterations);
        }
        if flags.erode {
            frame = transforms::erode(frame, settings.erode_iterations);
        }
        if flags.flip {
            frame = transforms::flip(frame, settings.flip);
        }
        if flags.edge_detect {
            frame = Frame::Gray(edges::canny(&frame, &settings.canny));
        }
        if flags.speed_overlay {
            self.overlay.draw(&mut frame);
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_proc_common::frame::Roi;
    use frame_proc_common::settings::{FlipAxis, ProcessingFlags, ProcessingSettings, Smoothing};
    use image::{Rgb, RgbImage};

    fn test_frame() -> Frame {
        Frame::Rgb(RgbImage::from_fn(100, 100, |x, y| {
            Rgb([(x * 2) as u8, (y * 2) as u8, ((x + y) % 256) as u8])
        }))
    }

    fn snapshot(flags: ProcessingFlags) -> ConfigSnapshot {
        ConfigSnapshot {
            roi: Roi::default(),
            flags,
            settings: ProcessingSettings::default(),
        }
    }

    #[test]
    fn disabled_pipeline_is_identity() {
        let pipeline = TransformPipeline::default();
        let frame = test_frame();
        let crop = frame.crop(&Roi::new(10, 20, 30, 40)).unwrap();
        let out = pipeline.apply(crop.clone(), &snapshot(ProcessingFlags::default())).unwrap();
        assert_eq!(out, crop);

        let twice = pipeline.apply(out.clone(), &snapshot(ProcessingFlags::default())).unwrap();
        assert_eq!(twice, out);
    }

    #[test]
    fn grayscale_crop_scenario() {
        let pipeline = TransformPipeline::default();
        let frame = test_frame();
        let crop = frame.crop(&Roi::new(0, 0, 50, 50)).unwrap();
        let flags = ProcessingFlags {
            grayscale: true,
            ..Default::default()
        };
        let out = pipeline.apply(crop.clone(), &snapshot(flags)).unwrap();
        assert_eq!(out.channels(), 1);
        assert_eq!(out.dimensions(), (50, 50));
        assert_eq!(out, transforms::grayscale(crop));
    }

    #[test]
    fn steps_run_in_fixed_order() {
        // Flip after dilate: dilating then flipping must equal the pipeline result.
        let pipeline = TransformPipeline::default();
        let frame = test_frame();
        let flags = ProcessingFlags {
            dilate: true,
            flip: true,
            ..Default::default()
        };
        let mut snap = snapshot(flags);
        snap.settings.flip = FlipAxis::Horizontal;
        let out = pipeline.apply(frame.clone(), &snap).unwrap();
        let expected = transforms::flip(transforms::dilate(frame, 1), FlipAxis::Horizontal);
        assert_eq!(out, expected);
    }

    #[test]
    fn edge_detection_yields_single_channel() {
        let pipeline = TransformPipeline::default();
        let flags = ProcessingFlags {
            edge_detect: true,
            ..Default::default()
        };
        let out = pipeline.apply(test_frame(), &snapshot(flags)).unwrap();
        assert_eq!(out.channels(), 1);
        assert!(out.as_bytes().iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn invalid_settings_fail_the_frame() {
        let pipeline = TransformPipeline::default();
        let mut snap = snapshot(ProcessingFlags {
            smooth: true,
            ..Default::default()
        });
        snap.settings.smoothing = Smoothing::Median { size: 2 };
        let err = pipeline.apply(test_frame(), &snap).unwrap_err();
        assert!(matches!(err, WorkerError::InvalidSettings(_)));
    }

    #[test]
    fn pipeline_is_deterministic() {
        let pipeline = TransformPipeline::default();
        let flags = ProcessingFlags {
            grayscale: true,
            smooth: true,
            dilate: true,
            erode: true,
            flip: true,
            edge_detect: true,
            speed_overlay: true,
        };
        let snap = snapshot(flags);
        let a = pipeline.apply(test_frame(), &snap).unwrap();
        let b = pipeline.apply(test_frame(), &snap).unwrap();
        assert_eq!(a, b);
    }
}
