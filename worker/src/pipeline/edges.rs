//! Canny edge detection with a selectable Sobel aperture and gradient norm.
//!
//! imageproc's `canny` fixes both the aperture and the norm and pre-blurs the
//! input, so the detector is assembled here from the usual four stages:
//! Sobel gradients, magnitude, non-maximum suppression and hysteresis.

use frame_proc_common::frame::Frame;
use frame_proc_common::settings::CannySettings;
use image::{GrayImage, Luma};

const EDGE: u8 = 255;
/// tan(22.5°) and tan(67.5°), the sector bounds for gradient direction.
const TAN_22_5: f32 = 0.414_213_57;
const TAN_67_5: f32 = 2.414_213_6;

/// Run edge detection and return a single-channel 0/255 edge map.
///
/// For multi-channel frames each pixel uses the channel with the strongest
/// gradient.
pub fn canny(frame: &Frame, settings: &CannySettings) -> GrayImage {
    let (width, height) = frame.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut out = GrayImage::new(width, height);
    if w < 3 || h < 3 {
        return out;
    }

    let gradient = Gradient::compute(frame, settings.aperture_size as usize, settings.l2_gradient);
    let low = settings.threshold_low.min(settings.threshold_high) as f32;
    let high = settings.threshold_low.max(settings.threshold_high) as f32;

    // Non-maximum suppression: 0 = not an edge, 1 = weak, 2 = strong.
    let mut class = vec![0u8; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let m = gradient.magnitude[i];
            if m <= low {
                continue;
            }
            let dx = gradient.dx[i] as f32;
            let dy = gradient.dy[i] as f32;
            let (ax, ay) = (dx.abs(), dy.abs());
            let (before, after) = if ay <= ax * TAN_22_5 {
                (i - 1, i + 1)
            } else if ay >= ax * TAN_67_5 {
                (i - w, i + w)
            } else if (dx > 0.0) == (dy > 0.0) {
                (i - w - 1, i + w + 1)
            } else {
                (i - w + 1, i + w - 1)
            };
            if m > gradient.magnitude[before] && m >= gradient.magnitude[after] {
                class[i] = if m > high { 2 } else { 1 };
            }
        }
    }

    // Hysteresis: grow strong edges through 8-connected weak pixels.
    let mut stack: Vec<usize> = (0..w * h).filter(|&i| class[i] == 2).collect();
    let mut edges = vec![false; w * h];
    for &i in &stack {
        edges[i] = true;
    }
    while let Some(i) = stack.pop() {
        let (x, y) = (i % w, i / w);
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let n = ny * w + nx;
                if class[n] == 1 && !edges[n] {
                    edges[n] = true;
                    stack.push(n);
                }
            }
        }
    }

    for (i, edge) in edges.iter().enumerate() {
        if *edge {
            out.put_pixel((i % w) as u32, (i / w) as u32, Luma([EDGE]));
        }
    }
    out
}

struct Gradient {
    dx: Vec<i32>,
    dy: Vec<i32>,
    magnitude: Vec<f32>,
}

impl Gradient {
    fn compute(frame: &Frame, aperture: usize, l2: bool) -> Self {
        let (width, height) = frame.dimensions();
        let (w, h) = (width as usize, height as usize);
        let channels = frame.channels() as usize;
        let smooth = binomial(aperture);
        let deriv = derivative(aperture);
        let bytes = frame.as_bytes();

        let mut best = Gradient {
            dx: vec![0; w * h],
            dy: vec![0; w * h],
            magnitude: vec![f32::MIN; w * h],
        };
        for c in 0..channels {
            let plane: Vec<i32> =
                bytes.iter().skip(c).step_by(channels).map(|&v| v as i32).collect();
            let dx = convolve_cols(&convolve_rows(&plane, w, h, &deriv), w, h, &smooth);
            let dy = convolve_cols(&convolve_rows(&plane, w, h, &smooth), w, h, &deriv);
            for i in 0..w * h {
                let m = magnitude(dx[i], dy[i], l2);
                if m > best.magnitude[i] {
                    best.dx[i] = dx[i];
                    best.dy[i] = dy[i];
                    best.magnitude[i] = m;
                }
            }
        }
        best
    }
}

fn magnitude(dx: i32, dy: i32, l2: bool) -> f32 {
    if l2 {
        ((dx as f32).powi(2) + (dy as f32).powi(2)).sqrt()
    } else {
        (dx.abs() + dy.abs()) as f32
    }
}

/// Row `n - 1` of Pascal's triangle: the Sobel smoothing kernel.
fn binomial(n: usize) -> Vec<i32> {
    let mut row = vec![1];
    for _ in 1..n {
        row = convolve_kernels(&row, &[1, 1]);
    }
    row
}

/// Sobel derivative kernel: central difference smoothed to length `n`.
fn derivative(n: usize) -> Vec<i32> {
    convolve_kernels(&[-1, 0, 1], &binomial(n.saturating_sub(2).max(1)))
}

fn convolve_kernels(a: &[i32], b: &[i32]) -> Vec<i32> {
    let mut out = vec![0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Horizontal correlation with replicated borders.
fn convolve_rows(src: &[i32], w: usize, h: usize, kernel: &[i32]) -> Vec<i32> {
    let r = (kernel.len() / 2) as isize;
    let mut out = vec![0; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0;
            for (k, &weight) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - r).clamp(0, w as isize - 1) as usize;
                acc += weight * row[sx];
            }
            out[y * w + x] = acc;
        }
    }
    out
}

/// Vertical correlation with replicated borders.
fn convolve_cols(src: &[i32], w: usize, h: usize, kernel: &[i32]) -> Vec<i32> {
    let r = (kernel.len() / 2) as isize;
    let mut out = vec![0; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0;
            for (k, &weight) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - r).clamp(0, h as isize - 1) as usize;
                acc += weight * src[sy * w + x];
            }
            out[y * w + x] = acc;
        }
    }
    out
}
