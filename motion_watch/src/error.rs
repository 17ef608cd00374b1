// THEORY:
// Every failure the engine can produce is a named variant of one enum. The
// variants fall into three families, and callers are expected to react to the
// family rather than to the message text:
// - Resource failures (camera, stream, storage) carry the resource they concern
//   so the caller can decide whether retrying makes sense.
// - Algorithmic failures (`InvalidFrame`, `DimensionMismatch`) fail one cycle
//   and leave the session running.
// - Lifecycle misuse (`InvalidState`, `StopRequested`) reports that an
//   operation was refused, never that something broke.

use crate::session::SessionState;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The camera device could not be opened (missing, busy, or refused).
    #[error("camera {device_index} could not be opened: {reason}")]
    CameraOpen { device_index: u32, reason: String },

    /// The device opened but the first two frames could not be captured.
    #[error("camera {device_index} opened but the initial frames could not be read: {reason}")]
    CameraInit { device_index: u32, reason: String },

    /// A frame was malformed (empty, or a buffer that does not match its geometry).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Two frames that must be compared have different geometry.
    #[error("frame geometry changed from {expected:?} to {found:?}")]
    DimensionMismatch { expected: (u32, u32), found: (u32, u32) },

    /// The frame source reported an error or timed out while reading.
    #[error("reading from the frame stream failed: {0}")]
    StreamRead(String),

    /// The frame source has no more frames.
    #[error("end of frame stream")]
    EndOfStream,

    /// The persistence sink failed to store an artifact.
    #[error("failed to write artifact `{name}`: {reason}")]
    Write { name: String, reason: String },

    /// The optional metadata recorder failed. Never fatal.
    #[error("failed to record metadata for {path}: {reason}")]
    Record { path: String, reason: String },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A lifecycle operation was attempted from a state that does not allow it.
    #[error("`{operation}` is not allowed while the session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// A stop requested from another thread was honoured before the cycle began.
    #[error("a stop was requested; the session is now paused")]
    StopRequested,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stream errors end the active run; everything else leaves it running.
    pub fn ends_run(&self) -> bool {
        matches!(self, Error::StreamRead(_) | Error::EndOfStream)
    }

    /// Per-cycle algorithmic failures. The session keeps running after these.
    pub fn is_algorithmic(&self) -> bool {
        matches!(self, Error::InvalidFrame(_) | Error::DimensionMismatch { .. })
    }
}
