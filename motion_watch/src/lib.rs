// THEORY:
// This file is the main entry point for the `motion_watch` library crate.
// The public face of the engine is `SurveillanceSession`: a driver opens it,
// starts it, and calls `step()` on every tick, receiving an annotated frame and
// a report of what happened to the capture side of that cycle.
//
// Everything the session talks to lives behind a trait. The camera is a
// `FrameSource`, storage is a `PersistenceSink`, and the optional event log is
// a `MetadataRecorder`. The per-frame stages themselves (`core_modules`) are
// public so they can be exercised on their own, but most consumers never need
// to touch them directly.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod persistence;
pub mod session;
pub mod stats;
pub mod write_behind;

pub use config::{ArtifactFormat, SurveillanceConfig};
pub use core_modules::frame::{DetectionResult, Frame, MotionRegion};
pub use error::{Error, Result};
pub use persistence::{DiskSink, JsonLinesRecorder, MetadataRecorder, PersistenceSink, StoredPath};
pub use session::{CaptureStatus, FrameSource, SessionState, StepReport, StopHandle, SurveillanceSession};
pub use stats::{SessionStats, SharedStats, format_elapsed};
