// THEORY:
// A scene with continuous motion would otherwise produce one saved image per
// frame. The capture gate is the debounce: after it lets one capture through,
// it refuses every other capture until the cooldown has elapsed.
//
// The gate is consulted *before* the write is attempted, and it advances its
// clock at decision time. A write that later fails still uses up its window,
// so there is at most one write attempt per cooldown window.
//
// The cooldown is global to the gate. Two unrelated motions in different parts
// of the picture share one window.

use crate::core_modules::frame::Frame;
use std::time::{Duration, Instant};

/// Outcome of asking the gate for permission to persist a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureDecision {
    /// The cooldown had elapsed. The artifact is a copy of the offered frame.
    Captured { artifact: Frame, timestamp: Instant },
    /// A capture happened too recently.
    Suppressed,
}

impl CaptureDecision {
    pub fn is_captured(&self) -> bool {
        matches!(self, CaptureDecision::Captured { .. })
    }
}

/// Rate limiter for persisted artifacts.
#[derive(Debug, Clone, Default)]
pub struct CaptureGate {
    /// `None` until the first capture.
    last_capture_time: Option<Instant>,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether `frame` may be persisted at `now`.
    ///
    /// A `now` earlier than the last capture is treated as zero elapsed time.
    pub fn try_capture(&mut self, now: Instant, frame: &Frame, cooldown: Duration) -> CaptureDecision {
        if let Some(last) = self.last_capture_time {
            if now.saturating_duration_since(last) < cooldown {
                return CaptureDecision::Suppressed;
            }
        }

        self.last_capture_time = Some(now);
        CaptureDecision::Captured {
            artifact: frame.clone(),
            timestamp: now,
        }
    }

    pub fn last_capture_time(&self) -> Option<Instant> {
        self.last_capture_time
    }
}
