// THEORY:
// All tunables live in one plain struct that is handed to the session at
// construction time. Nothing in the engine reads a global; a driver that wants
// different sensitivity builds a different config. The struct deserializes from
// JSON with every field optional, so a config file only needs to name what it
// changes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_THRESHOLD: u8 = 30;
pub const DEFAULT_MIN_AREA: f64 = 1000.0;
pub const DEFAULT_BLUR_KERNEL_SIZE: u32 = 11;
pub const DEFAULT_CAPTURE_COOLDOWN_SECS: f64 = 5.0;

/// Image encoding used for persisted artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Lossless; a stored artifact reads back pixel-identical.
    #[default]
    Png,
    Jpeg,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Png => "png",
            ArtifactFormat::Jpeg => "jpg",
        }
    }

}

/// Configuration for a `SurveillanceSession` and the storage it writes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveillanceConfig {
    /// Minimum per-pixel intensity difference that counts as change.
    pub threshold: u8,
    /// Minimum enclosed area, in pixels, for a region to be reported.
    pub min_area: f64,
    /// Gaussian kernel size used by the preprocessor. Must be odd.
    pub blur_kernel_size: u32,
    /// Minimum number of seconds between two persisted artifacts.
    pub capture_cooldown_secs: f64,
    /// Which camera to open.
    pub device_index: u32,
    /// Folder that receives persisted artifacts.
    pub save_folder: PathBuf,
    /// File name prefix for persisted artifacts.
    pub artifact_prefix: String,
    pub artifact_format: ArtifactFormat,
    /// Optional JSON-lines file that receives one record per saved artifact.
    pub metadata_log: Option<PathBuf>,
}

impl Default for SurveillanceConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
            blur_kernel_size: DEFAULT_BLUR_KERNEL_SIZE,
            capture_cooldown_secs: DEFAULT_CAPTURE_COOLDOWN_SECS,
            device_index: 0,
            save_folder: PathBuf::from("recordings"),
            artifact_prefix: String::from("motion"),
            artifact_format: ArtifactFormat::default(),
            metadata_log: None,
        }
    }
}

impl SurveillanceConfig {
    /// Loads a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_kernel_size(self.blur_kernel_size)?;
        if !self.min_area.is_finite() || self.min_area < 0.0 {
            return Err(Error::Config(format!(
                "min_area must be a non-negative number, got {}",
                self.min_area
            )));
        }
        if Duration::try_from_secs_f64(self.capture_cooldown_secs).is_err() {
            return Err(Error::Config(format!(
                "capture_cooldown_secs must be a non-negative number of seconds that fits a duration, got {}",
                self.capture_cooldown_secs
            )));
        }
        if self.artifact_prefix.is_empty() {
            return Err(Error::Config("artifact_prefix must not be empty".into()));
        }
        Ok(())
    }

    /// The cooldown as a `Duration`. Values `validate()` rejects saturate to
    /// `Duration::MAX`.
    pub fn capture_cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.capture_cooldown_secs).unwrap_or(Duration::MAX)
    }
}

/// Gaussian kernels are centred on a pixel, so only odd sizes make sense.
pub fn validate_kernel_size(kernel_size: u32) -> Result<()> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(Error::Config(format!(
            "blur_kernel_size must be a positive odd integer, got {kernel_size}"
        )));
    }
    Ok(())
}
