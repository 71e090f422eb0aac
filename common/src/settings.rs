use serde::Deserialize;

/// Enable toggles for the optional transforms. Always replaced as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessingFlags {
    pub grayscale: bool,
    pub smooth: bool,
    pub dilate: bool,
    pub erode: bool,
    pub flip: bool,
    pub edge_detect: bool,
    pub speed_overlay: bool,
}

/// Smoothing kind together with its kernel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Smoothing {
    /// Normalized box filter.
    Box { width: u32, height: u32 },
    /// Gaussian blur. A zero kernel size is derived from the sigma, a zero
    /// sigma from the kernel size; `sigma_y == 0` reuses `sigma_x`.
    Gaussian {
        width: u32,
        height: u32,
        #[serde(default)]
        sigma_x: f64,
        #[serde(default)]
        sigma_y: f64,
    },
    /// Median filter over a square `size x size` window.
    Median { size: u32 },
}

impl Default for Smoothing {
    fn default() -> Self {
        Smoothing::Box {
            width: 3,
            height: 3,
        }
    }
}

/// Flip direction, following the usual integer flip-code convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipAxis {
    /// Around the x axis (code 0): rows are reversed.
    #[default]
    Vertical,
    /// Around the y axis (positive code): columns are reversed.
    Horizontal,
    /// Around both axes (negative code).
    Both,
}

impl FlipAxis {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => FlipAxis::Vertical,
            c if c > 0 => FlipAxis::Horizontal,
            _ => FlipAxis::Both,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            FlipAxis::Vertical => 0,
            FlipAxis::Horizontal => 1,
            FlipAxis::Both => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CannySettings {
    pub threshold_low: f64,
    pub threshold_high: f64,
    /// Sobel aperture: 3, 5 or 7.
    pub aperture_size: u32,
    /// Use the L2 gradient magnitude instead of |dx| + |dy|.
    pub l2_gradient: bool,
}

impl Default for CannySettings {
    fn default() -> Self {
        Self {
            threshold_low: 10.0,
            threshold_high: 100.0,
            aperture_size: 3,
            l2_gradient: false,
        }
    }
}

/// Numeric parameters for each optional transform. Always replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub smoothing: Smoothing,
    pub dilate_iterations: u32,
    pub erode_iterations: u32,
    pub flip: FlipAxis,
    pub canny: CannySettings,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            smoothing: Smoothing::default(),
            dilate_iterations: 1,
            erode_iterations: 1,
            flip: FlipAxis::default(),
            canny: CannySettings::default(),
        }
    }
}

/// Largest supported dilate/erode iteration count.
pub const MAX_MORPH_ITERATIONS: u32 = 255;

/// Largest smoothing kernel side, given or derived from a sigma.
pub const MAX_KERNEL_SIZE: u32 = 255;

/// Gaussian kernel size implied by a sigma when none is given:
/// `round(6 * sigma + 1) | 1`. Saturates for huge sigmas.
pub fn kernel_size_for_sigma(sigma: f64) -> u32 {
    ((sigma * 6.0 + 1.0).round().min(u32::MAX as f64) as u32) | 1
}

impl ProcessingSettings {
    /// Reject parameter combinations the transforms cannot run with.
    ///
    /// Checked whenever settings are replaced, so a bad value is refused at
    /// the controller instead of failing every frame.
    pub fn validate(&self) -> Result<(), SettingsError> {
        match self.smoothing {
            Smoothing::Box { width, height } => {
                if width == 0 || height == 0 {
                    return Err(SettingsError::BoxKernel { width, height });
                }
                check_kernel_size(width)?;
                check_kernel_size(height)?;
            }
            Smoothing::Gaussian {
                width,
                height,
                sigma_x,
                sigma_y,
            } => {
                for size in [width, height] {
                    if size != 0 && size % 2 == 0 {
                        return Err(SettingsError::EvenKernel(size));
                    }
                }
                let valid = |s: f64| s.is_finite() && s >= 0.0;
                if !(valid(sigma_x) && valid(sigma_y)) {
                    return Err(SettingsError::Sigma { sigma_x, sigma_y });
                }
                if (width == 0 || height == 0) && sigma_x == 0.0 {
                    return Err(SettingsError::GaussianUndetermined);
                }
                let sigma_y = if sigma_y > 0.0 { sigma_y } else { sigma_x };
                for (size, sigma) in [(width, sigma_x), (height, sigma_y)] {
                    let size = if size > 0 { size } else { kernel_size_for_sigma(sigma) };
                    check_kernel_size(size)?;
                }
            }
            Smoothing::Median { size } => {
                if size % 2 == 0 {
                    return Err(SettingsError::EvenKernel(size));
                }
                check_kernel_size(size)?;
            }
        }

        for iterations in [self.dilate_iterations, self.erode_iterations] {
            if iterations > MAX_MORPH_ITERATIONS {
                return Err(SettingsError::Iterations(iterations));
            }
        }

        let canny = &self.canny;
        if !matches!(canny.aperture_size, 3 | 5 | 7) {
            return Err(SettingsError::Aperture(canny.aperture_size));
        }
        for threshold in [canny.threshold_low, canny.threshold_high] {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(SettingsError::Threshold(threshold));
            }
        }
        Ok(())
    }
}

fn check_kernel_size(size: u32) -> Result<(), SettingsError> {
    if size > MAX_KERNEL_SIZE {
        return Err(SettingsError::KernelTooLarge(size));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("box kernel must be at least 1x1, got {width}x{height}")]
    BoxKernel { width: u32, height: u32 },
    #[error("kernel size {0} must be odd")]
    EvenKernel(u32),
    #[error("gaussian sigmas must be finite and non-negative, got ({sigma_x}, {sigma_y})")]
    Sigma { sigma_x: f64, sigma_y: f64 },
    #[error("kernel size {0} exceeds the maximum of 255")]
    KernelTooLarge(u32),
    #[error("gaussian blur needs either a kernel size or a positive sigma_x")]
    GaussianUndetermined,
    #[error("morphology iterations {0} exceed the maximum of 255")]
    Iterations(u32),
    #[error("edge detection aperture {0} must be 3, 5 or 7")]
    Aperture(u32),
    #[error("edge detection threshold {0} must be finite and non-negative")]
    Threshold(f64),
}
