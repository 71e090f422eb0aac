use image::{imageops, DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::Deserialize;
use std::fmt;

/// An owned video frame with 1, 3 or 4 interleaved 8-bit channels.
///
/// Channel order for colour frames is RGB(A). Frames handed out by a
/// `FrameSource` are shared read-only; anything that needs to modify pixels
/// works on a private copy obtained through [`Frame::crop`].
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Gray(GrayImage),
    Rgb(RgbImage),
    Rgba(RgbaImage),
}

impl Frame {
    /// Build a frame from raw interleaved bytes (row-major, no padding).
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                got: data.len(),
                expected,
            });
        }
        let got = data.len();
        let frame = match channels {
            1 => GrayImage::from_raw(width, height, data).map(Frame::Gray),
            3 => RgbImage::from_raw(width, height, data).map(Frame::Rgb),
            4 => RgbaImage::from_raw(width, height, data).map(Frame::Rgba),
            other => return Err(FrameError::UnsupportedChannels(other)),
        };
        frame.ok_or(FrameError::BufferSize { got, expected })
    }

    /// Convert a decoded image into the nearest supported layout.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(img) => Frame::Gray(img),
            DynamicImage::ImageRgb8(img) => Frame::Rgb(img),
            DynamicImage::ImageRgba8(img) => Frame::Rgba(img),
            other => {
                let color = other.color();
                if color.has_alpha() {
                    Frame::Rgba(other.to_rgba8())
                } else if color.has_color() {
                    Frame::Rgb(other.to_rgb8())
                } else {
                    Frame::Gray(other.to_luma8())
                }
            }
        }
    }

    // -- Convenience accessors --------------------------------------------------

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Frame::Gray(img) => img.dimensions(),
            Frame::Rgb(img) => img.dimensions(),
            Frame::Rgba(img) => img.dimensions(),
        }
    }

    /// Number of interleaved channels per pixel (1, 3 or 4).
    pub fn channels(&self) -> u8 {
        match self {
            Frame::Gray(_) => 1,
            Frame::Rgb(_) => 3,
            Frame::Rgba(_) => 4,
        }
    }

    /// Raw interleaved pixel bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Gray(img) => img.as_raw(),
            Frame::Rgb(img) => img.as_raw(),
            Frame::Rgba(img) => img.as_raw(),
        }
    }

    /// Mutable access to the interleaved pixel bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Frame::Gray(img) => &mut **img,
            Frame::Rgb(img) => &mut **img,
            Frame::Rgba(img) => &mut **img,
        }
    }

    // -- Region of interest -----------------------------------------------------

    /// Copy the region selected by `roi` into a new frame.
    ///
    /// An unset ROI selects the whole frame. The source frame is never
    /// modified and the result shares no memory with it.
    pub fn crop(&self, roi: &Roi) -> Result<Frame, FrameError> {
        let (width, height) = self.dimensions();
        let r = roi.resolve(width, height)?;
        Ok(match self {
            Frame::Gray(img) => {
                Frame::Gray(imageops::crop_imm(img, r.x, r.y, r.width, r.height).to_image())
            }
            Frame::Rgb(img) => {
                Frame::Rgb(imageops::crop_imm(img, r.x, r.y, r.width, r.height).to_image())
            }
            Frame::Rgba(img) => {
                Frame::Rgba(imageops::crop_imm(img, r.x, r.y, r.width, r.height).to_image())
            }
        })
    }

    /// Hand the pixels over in the representation display consumers expect.
    pub fn into_dynamic(self) -> DynamicImage {
        match self {
            Frame::Gray(img) => DynamicImage::ImageLuma8(img),
            Frame::Rgb(img) => DynamicImage::ImageRgb8(img),
            Frame::Rgba(img) => DynamicImage::ImageRgba8(img),
        }
    }
}

/// A region of interest inside a frame.
///
/// The default (all zero) rectangle means "not configured" and selects the
/// whole frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rectangle covering a whole `width x height` frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Returns true if no region has been configured.
    pub fn is_unset(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns true if the rectangle lies entirely inside a `width x height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height)
    }

    /// Resolve against concrete frame dimensions: unset becomes the full
    /// frame, out-of-bounds is an error. Never clamps.
    pub fn resolve(&self, width: u32, height: u32) -> Result<Roi, FrameError> {
        if self.is_unset() {
            return Ok(Roi::full(width, height));
        }
        if !self.fits_within(width, height) {
            return Err(FrameError::RoiOutOfBounds {
                roi: *self,
                width,
                height,
            });
        }
        Ok(*self)
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer has {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
    #[error("unsupported channel count {0}, expected 1, 3 or 4")]
    UnsupportedChannels(u8),
    #[error("ROI {roi} does not fit within a {width}x{height} frame")]
    RoiOutOfBounds { roi: Roi, width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let data = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        Frame::from_raw(width, height, 3, data).unwrap()
    }

    #[test]
    fn from_raw_checks_length() {
        let err = Frame::from_raw(4, 4, 3, vec![0; 10]).unwrap_err();
        assert_eq!(err, FrameError::BufferSize { got: 10, expected: 48 });
    }

    #[test]
    fn from_raw_rejects_two_channels() {
        let err = Frame::from_raw(2, 2, 2, vec![0; 8]).unwrap_err();
        assert_eq!(err, FrameError::UnsupportedChannels(2));
    }

    #[test]
    fn crop_copies_region() {
        let frame = gradient(10, 8);
        let cropped = frame.crop(&Roi::new(2, 3, 4, 2)).unwrap();
        assert_eq!(cropped.dimensions(), (4, 2));
        assert_eq!(cropped.channels(), 3);

        let Frame::Rgb(src) = &frame else { unreachable!() };
        let Frame::Rgb(dst) = &cropped else { unreachable!() };
        for y in 0..2 {
            for x in 0..4 {
                assert_eq!(dst.get_pixel(x, y), src.get_pixel(x + 2, y + 3));
            }
        }
    }

    #[test]
    fn unset_roi_selects_whole_frame() {
        let frame = gradient(6, 5);
        let cropped = frame.crop(&Roi::default()).unwrap();
        assert_eq!(cropped, frame);
    }

    #[test]
    fn out_of_bounds_roi_is_rejected() {
        let frame = gradient(100, 100);
        let roi = Roi::new(60, 0, 50, 50);
        let err = frame.crop(&roi).unwrap_err();
        assert_eq!(
            err,
            FrameError::RoiOutOfBounds {
                roi,
                width: 100,
                height: 100
            }
        );
    }

    #[test]
    fn fits_within_handles_overflow() {
        let roi = Roi::new(u32::MAX, 0, 2, 1);
        assert!(!roi.fits_within(u32::MAX, 10));
        assert!(Roi::new(0, 0, 10, 10).fits_within(10, 10));
    }

    #[test]
    fn from_dynamic_keeps_layout() {
        let img = DynamicImage::ImageLuma16(image::ImageBuffer::new(3, 2));
        let frame = Frame::from_dynamic(img);
        assert_eq!(frame.channels(), 1);
        assert_eq!(frame.dimensions(), (3, 2));
    }
}
