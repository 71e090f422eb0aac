//! Per-step image transforms used by the pipeline.
//!
//! Every function takes the frame by value and returns the transformed frame;
//! none of them touch anything but the frame they are given.

use frame_proc_common::frame::Frame;
use frame_proc_common::settings::{kernel_size_for_sigma, FlipAxis, Smoothing};
use image::{imageops, GrayImage, ImageBuffer, Luma, Pixel};
use imageproc::filter::{median_filter, separable_filter};
use imageproc::map::map_colors;
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};

/// Convert 3/4-channel frames to a single luminance channel. Single-channel
/// frames pass through untouched.
///
/// Uses `imageops::grayscale`, i.e. Rec. 709 weights (0.2126, 0.7152,
/// 0.0722), not the Rec. 601 weights (0.299, 0.587, 0.114) common in other
/// vision libraries. Outputs can differ by a few levels on saturated colours.
pub fn grayscale(frame: Frame) -> Frame {
    match frame {
        Frame::Rgb(img) => Frame::Gray(imageops::grayscale(&img)),
        Frame::Rgba(img) => Frame::Gray(imageops::grayscale(&img)),
        gray @ Frame::Gray(_) => gray,
    }
}

/// Apply the configured smoothing filter to every channel.
pub fn smooth(frame: Frame, smoothing: &Smoothing) -> Frame {
    match *smoothing {
        Smoothing::Box { width, height } => {
            if width <= 1 && height <= 1 {
                return frame;
            }
            let h = box_kernel(width);
            let v = box_kernel(height);
            separable(frame, &h, &v)
        }
        Smoothing::Gaussian {
            width,
            height,
            sigma_x,
            sigma_y,
        } => {
            let sigma_y = if sigma_y > 0.0 { sigma_y } else { sigma_x };
            let kx = if width > 0 { width } else { kernel_size_for_sigma(sigma_x) };
            let ky = if height > 0 { height } else { kernel_size_for_sigma(sigma_y) };
            let h = gaussian_kernel(kx, sigma_x);
            let v = gaussian_kernel(ky, sigma_y);
            separable(frame, &h, &v)
        }
        Smoothing::Median { size } => {
            if size <= 1 {
                return frame;
            }
            let r = size / 2;
            match frame {
                Frame::Gray(img) => Frame::Gray(median_filter(&img, r, r)),
                Frame::Rgb(img) => Frame::Rgb(median_filter(&img, r, r)),
                Frame::Rgba(img) => Frame::Rgba(median_filter(&img, r, r)),
            }
        }
    }
}

fn separable(frame: Frame, h: &[f32], v: &[f32]) -> Frame {
    match frame {
        Frame::Gray(img) => Frame::Gray(separable_filter(&img, h, v)),
        Frame::Rgb(img) => Frame::Rgb(separable_filter(&img, h, v)),
        Frame::Rgba(img) => Frame::Rgba(separable_filter(&img, h, v)),
    }
}

fn box_kernel(size: u32) -> Vec<f32> {
    let size = size.max(1) as usize;
    vec![1.0 / size as f32; size]
}

/// Normalized 1-D Gaussian. A non-positive sigma is derived from the size.
fn gaussian_kernel(size: u32, sigma: f64) -> Vec<f32> {
    let size = size.max(1);
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let center = (size as f64 - 1.0) / 2.0;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// Morphological dilation with a 3x3 rectangle, `iterations` times.
pub fn dilate(frame: Frame, iterations: u32) -> Frame {
    morphology(frame, iterations, grayscale_dilate)
}

/// Morphological erosion with a 3x3 rectangle, `iterations` times.
pub fn erode(frame: Frame, iterations: u32) -> Frame {
    morphology(frame, iterations, grayscale_erode)
}

type MorphOp = fn(&GrayImage, &Mask) -> GrayImage;

fn morphology(frame: Frame, iterations: u32, op: MorphOp) -> Frame {
    if iterations == 0 {
        return frame;
    }
    let mask = Mask::square(1);
    let run = |plane: GrayImage| (0..iterations).fold(plane, |img, _| op(&img, &mask));
    match frame {
        Frame::Gray(img) => Frame::Gray(run(img)),
        Frame::Rgb(img) => Frame::Rgb(per_channel(&img, run)),
        Frame::Rgba(img) => Frame::Rgba(per_channel(&img, run)),
    }
}

/// Split `img` into planes, filter each one and interleave the results.
fn per_channel<P>(
    img: &ImageBuffer<P, Vec<u8>>,
    run: impl Fn(GrayImage) -> GrayImage,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let mut out = img.clone();
    for c in 0..P::CHANNEL_COUNT as usize {
        let plane = run(map_colors(img, |p| Luma([p.channels()[c]])));
        for (dst, src) in out.pixels_mut().zip(plane.pixels()) {
            dst.channels_mut()[c] = src[0];
        }
    }
    out
}

pub fn flip(mut frame: Frame, axis: FlipAxis) -> Frame {
    match &mut frame {
        Frame::Gray(img) => flip_in_place(img, axis),
        Frame::Rgb(img) => flip_in_place(img, axis),
        Frame::Rgba(img) => flip_in_place(img, axis),
    }
    frame
}

fn flip_in_place<P: Pixel>(img: &mut ImageBuffer<P, Vec<P::Subpixel>>, axis: FlipAxis) {
    match axis {
        FlipAxis::Vertical => imageops::flip_vertical_in_place(img),
        FlipAxis::Horizontal => imageops::flip_horizontal_in_place(img),
        FlipAxis::Both => imageops::rotate180_in_place(img),
    }
}
