use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use frame_proc_common::frame::Frame;
use image::{Luma, Rgb, Rgba};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::debug;

/// Text drawn by the speed overlay.
pub const LABEL: &str = "Speed estimation";
/// Left end of the label baseline, in frame pixels.
pub const LABEL_ORIGIN: (i32, i32) = (94, 92);
const LABEL_HEIGHT: u32 = 24;
const LABEL_WIDTH: u32 = 192;

/// Draws the fixed informational label onto frames.
///
/// Without a font the label area is outlined instead, so the overlay stays
/// visible even on hosts without font files.
#[derive(Clone, Default)]
pub struct Overlay {
    font: Option<FontArc>,
}

impl Overlay {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    pub fn from_font_file(path: &Path) -> Result<Self, OverlayError> {
        let bytes = std::fs::read(path)
            .map_err(|e| OverlayError::Read(path.display().to_string(), e.to_string()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|_| OverlayError::InvalidFont(path.display().to_string()))?;
        debug!(path = %path.display(), "overlay font loaded");
        Ok(Self::new(Some(font)))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw(&self, frame: &mut Frame) {
        match frame {
            Frame::Gray(img) => self.draw_on(img, Luma([255])),
            Frame::Rgb(img) => self.draw_on(img, Rgb([0, 0, 255])),
            Frame::Rgba(img) => self.draw_on(img, Rgba([0, 0, 255, 255])),
        }
    }

    fn draw_on<P>(&self, img: &mut image::ImageBuffer<P, Vec<u8>>, color: P)
    where
        P: image::Pixel<Subpixel = u8>,
    {
        let (x, baseline) = LABEL_ORIGIN;
        let top = baseline - LABEL_HEIGHT as i32;
        match &self.font {
            Some(font) => {
                draw_text_mut(img, color, x, top, PxScale::from(LABEL_HEIGHT as f32), font, LABEL);
            }
            None => {
                let rect = Rect::at(x, top).of_size(LABEL_WIDTH, LABEL_HEIGHT);
                draw_hollow_rect_mut(img, rect, color);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("failed to read font file {0}: {1}")]
    Read(String, String),
    #[error("{0} is not a usable font")]
    InvalidFont(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    #[test]
    fn outline_drawn_without_font() {
        let overlay = Overlay::default();
        assert!(!overlay.has_font());

        let mut frame = Frame::Rgb(RgbImage::new(320, 240));
        overlay.draw(&mut frame);
        let Frame::Rgb(img) = &frame else { unreachable!() };
        let (x, baseline) = LABEL_ORIGIN;
        assert_eq!(img.get_pixel(x as u32, (baseline - 24) as u32), &Rgb([0, 0, 255]));
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn gray_frames_get_white_label() {
        let mut frame = Frame::Gray(GrayImage::new(320, 240));
        Overlay::default().draw(&mut frame);
        assert!(frame.as_bytes().contains(&255));
    }

    #[test]
    fn small_frames_are_left_alone() {
        let mut frame = Frame::Gray(GrayImage::new(50, 50));
        Overlay::default().draw(&mut frame);
        assert!(frame.as_bytes().iter().all(|&v| v == 0));
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let err = Overlay::from_font_file(Path::new("/nonexistent/font.ttf")).err().unwrap();
        assert!(matches!(err, OverlayError::Read(..)));
    }
}
