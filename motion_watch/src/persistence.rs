// THEORY:
// Persistence is an external collaborator: the session only knows the two
// traits defined here. `PersistenceSink` stores an artifact and reports where
// it went; `MetadataRecorder` optionally logs that it happened. The concrete
// `DiskSink` and `JsonLinesRecorder` cover the common case of a local folder
// and a local log file.
//
// A write is acknowledged only after the file has been flushed and synced, so
// counting acknowledgments counts artifacts that are really on disk.

use crate::config::ArtifactFormat;
use crate::core_modules::frame::Frame;
use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const JPEG_QUALITY: u8 = 90;

/// Event type recorded for artifacts produced by motion.
pub const MOTION_EVENT: &str = "motion";

/// Where a sink stored an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredPath(PathBuf);

impl StoredPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for StoredPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Durable storage for captured artifacts.
///
/// `write` may be called from a background thread, hence `Send + Sync`.
pub trait PersistenceSink: Send + Sync + 'static {
    fn write(&self, artifact: &Frame, suggested_name: &str) -> Result<StoredPath>;
}

/// Optional log of saved artifacts. Failures here are never fatal.
pub trait MetadataRecorder: Send {
    fn record(&mut self, event_type: &str, path: &StoredPath) -> Result<()>;
}

/// Builds `<prefix>_<YYYYmmdd-HHMMSS>`. Two captures in the same second share a
/// name and the later one overwrites the earlier one.
pub fn artifact_name(prefix: &str, at: DateTime<Local>) -> String {
    format!("{prefix}_{}", at.format("%Y%m%d-%H%M%S"))
}

/// Writes artifacts as image files into one folder.
#[derive(Debug, Clone)]
pub struct DiskSink {
    folder: PathBuf,
    format: ArtifactFormat,
}

impl DiskSink {
    /// Creates the sink, creating `folder` (and its parents) if it is missing.
    pub fn new(folder: impl Into<PathBuf>, format: ArtifactFormat) -> Result<Self> {
        let folder = folder.into();
        if folder.is_dir() {
            log::debug!("Using existing save folder {}", folder.display());
        } else {
            std::fs::create_dir_all(&folder)?;
            log::info!("Created save folder {}", folder.display());
        }
        Ok(Self { folder, format })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.folder.join(format!("{name}.{}", self.format.extension()))
    }

    fn encode(&self, image: &RgbImage, file: &File) -> Result<()> {
        let mut writer = BufWriter::new(file);
        let (width, height) = image.dimensions();
        match self.format {
            ArtifactFormat::Png => PngEncoder::new(&mut writer).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?,
            ArtifactFormat::Jpeg => JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)?,
        }
        writer.flush()?;
        Ok(())
    }
}

impl PersistenceSink for DiskSink {
    fn write(&self, artifact: &Frame, suggested_name: &str) -> Result<StoredPath> {
        let path = self.path_for(suggested_name);
        let to_write_error = |reason: String| Error::Write {
            name: suggested_name.to_string(),
            reason,
        };

        let file = File::create(&path)
            .map_err(|e| to_write_error(format!("creating {}: {e}", path.display())))?;
        if let Err(e) = self.encode(artifact.image(), &file) {
            drop(file);
            if let Err(cleanup) = std::fs::remove_file(&path) {
                log::warn!("Partial artifact {} left behind: {cleanup}", path.display());
            }
            return Err(to_write_error(e.to_string()));
        }
        file.sync_all()
            .map_err(|e| to_write_error(format!("syncing {}: {e}", path.display())))?;

        log::info!("Artifact saved: {}", path.display());
        Ok(StoredPath::new(path))
    }
}

/// Loads a stored artifact back as RGB pixels.
pub fn read_artifact(path: &StoredPath) -> Result<RgbImage> {
    Ok(image::open(path.as_path())?.to_rgb8())
}

/// One line of the metadata log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub event_type: String,
    pub path: StoredPath,
    pub recorded_at: DateTime<Local>,
}

/// Appends one JSON object per line to a log file.
#[derive(Debug)]
pub struct JsonLinesRecorder {
    path: PathBuf,
    file: File,
}

impl JsonLinesRecorder {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataRecorder for JsonLinesRecorder {
    fn record(&mut self, event_type: &str, path: &StoredPath) -> Result<()> {
        let record = MetadataRecord {
            event_type: event_type.to_string(),
            path: path.clone(),
            recorded_at: Local::now(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .map_err(|e| Error::Record {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}
