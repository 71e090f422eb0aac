use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::frame::Roi;
use crate::settings::{ProcessingFlags, ProcessingSettings};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of rate samples averaged per published FPS value.
    #[serde(default = "default_fps_window")]
    pub fps_window: usize,
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// Processed frames buffered for the display side before dropping.
    #[serde(default = "default_frame_queue")]
    pub frame_queue: usize,
    /// Hold the processing lock across the whole pipeline.
    #[serde(default = "default_coarse_lock")]
    pub coarse_lock: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            fps_window: default_fps_window(),
            idle_backoff_ms: default_idle_backoff_ms(),
            frame_queue: default_frame_queue(),
            coarse_lock: default_coarse_lock(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub key: String,
    /// Image file, or a directory of images replayed in name order.
    pub source: PathBuf,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub roi: Option<Roi>,
}

/// Initial processing state applied to every worker.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub flags: ProcessingFlags,
    #[serde(default)]
    pub settings: ProcessingSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverlayConfig {
    /// TrueType/OpenType font for the overlay label.
    #[serde(default)]
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving the last processed frame of each device on exit.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub run_for_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("at least one [[devices]] entry is required".into()));
        }
        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.key.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate device key {:?}", device.key)));
            }
            if !(device.fps.is_finite() && device.fps > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "device {:?}: fps must be positive, got {}",
                    device.key, device.fps
                )));
            }
        }
        if self.worker.fps_window == 0 {
            return Err(ConfigError::Invalid("worker.fps_window must be at least 1".into()));
        }
        self.processing
            .settings
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("processing.settings: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_fps_window() -> usize {
    32
}
fn default_idle_backoff_ms() -> u64 {
    5
}
fn default_frame_queue() -> usize {
    8
}
fn default_coarse_lock() -> bool {
    true
}
fn default_fps() -> f64 {
    15.0
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{FlipAxis, Smoothing};

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [[devices]]
            key = "cam0"
            source = "frames/"
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.fps_window, 32);
        assert!(config.worker.coarse_lock);
        assert_eq!(config.devices[0].fps, 15.0);
        assert!(config.devices[0].roi.is_none());
        assert_eq!(config.processing.flags, ProcessingFlags::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn full_processing_section() {
        let config = Config::parse(
            r#"
            [processing.flags]
            grayscale = true
            smooth = true

            [processing.settings]
            erode_iterations = 3
            flip = "both"
            smoothing = { kind = "gaussian", width = 5, height = 5, sigma_x = 1.5 }
            canny = { threshold_low = 20.0, threshold_high = 60.0, aperture_size = 5, l2_gradient = true }

            [[devices]]
            key = "cam0"
            source = "a.png"
            roi = { x = 10, y = 20, width = 30, height = 40 }
            "#,
        )
        .unwrap();

        let flags = config.processing.flags;
        assert!(flags.grayscale && flags.smooth && !flags.flip);
        let settings = config.processing.settings;
        assert_eq!(settings.erode_iterations, 3);
        assert_eq!(settings.dilate_iterations, 1);
        assert_eq!(settings.flip, FlipAxis::Both);
        assert_eq!(
            settings.smoothing,
            Smoothing::Gaussian {
                width: 5,
                height: 5,
                sigma_x: 1.5,
                sigma_y: 0.0
            }
        );
        assert_eq!(settings.canny.aperture_size, 5);
        assert_eq!(config.devices[0].roi, Some(Roi::new(10, 20, 30, 40)));
    }

    #[test]
    fn duplicate_devices_rejected() {
        let err = Config::parse(
            r#"
            [[devices]]
            key = "cam0"
            source = "a.png"

            [[devices]]
            key = "cam0"
            source = "b.png"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn invalid_settings_rejected() {
        let err = Config::parse(
            r#"
            [processing.settings]
            smoothing = { kind = "median", size = 4 }

            [[devices]]
            key = "cam0"
            source = "a.png"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be odd"), "{err}");
    }

    #[test]
    fn no_devices_rejected() {
        assert!(Config::parse("devices = []").is_err());
    }

    #[test]
    fn example_config_parses() {
        let config = Config::parse(include_str!("../../config.example.toml")).unwrap();
        assert_eq!(config.devices[0].key, "cam0");
        assert_eq!(config.devices[0].roi, Some(Roi::new(0, 0, 320, 240)));
        assert_eq!(config.output.run_for_secs, Some(10));
        assert!(config.processing.flags.speed_overlay);
    }
}
