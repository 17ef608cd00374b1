// THEORY:
// Counters are written by exactly one thread (the one calling `step()`) but a
// dashboard may poll them from anywhere, at its own cadence. The live counters
// are therefore atomics behind an `Arc`, and readers only ever receive a plain
// `SessionStats` snapshot.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A point-in-time copy of a session's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    /// Cycles in which at least one motion region was found.
    pub total_detection_cycles: u64,
    /// Artifacts whose write was acknowledged as successful.
    pub total_artifacts_saved: u64,
    /// When the current run started. `None` until the first `start()`.
    pub session_start_time: Option<DateTime<Local>>,
    /// Background writes submitted but not yet acknowledged.
    pub pending_writes: usize,
}

impl SessionStats {
    /// Time since the run started, as of `now`.
    pub fn elapsed(&self, now: DateTime<Local>) -> Option<chrono::Duration> {
        self.session_start_time
            .map(|start| (now - start).max(chrono::Duration::zero()))
    }
}

/// Renders a duration as `HH:MM:SS`. Hours are not wrapped.
pub fn format_elapsed(elapsed: chrono::Duration) -> String {
    let seconds = elapsed.num_seconds().max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Live counters shared between the session and any number of observers.
#[derive(Debug, Default)]
pub struct SharedStats {
    detection_cycles: AtomicU64,
    artifacts_saved: AtomicU64,
    pending_writes: AtomicUsize,
    started_at: Mutex<Option<DateTime<Local>>>,
}

impl SharedStats {
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            total_detection_cycles: self.detection_cycles.load(Ordering::Acquire),
            total_artifacts_saved: self.artifacts_saved.load(Ordering::Acquire),
            session_start_time: self.started_at(),
            pending_writes: self.pending_writes.load(Ordering::Acquire),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        match self.started_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn record_detection_cycle(&self) {
        self.detection_cycles.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_artifact_saved(&self) {
        self.artifacts_saved.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn set_pending_writes(&self, pending: usize) {
        self.pending_writes.store(pending, Ordering::Release);
    }

    /// Sets the start time only if none is set yet.
    pub(crate) fn mark_started(&self, at: DateTime<Local>) {
        let mut guard = match self.started_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get_or_insert(at);
    }

    /// Zeroes both counters. The start time becomes `restart_at`.
    pub(crate) fn reset(&self, restart_at: Option<DateTime<Local>>) {
        self.detection_cycles.store(0, Ordering::Release);
        self.artifacts_saved.store(0, Ordering::Release);
        let mut guard = match self.started_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = restart_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn formats_elapsed_time() {
        assert_eq!(format_elapsed(chrono::Duration::seconds(0)), "00:00:00");
        assert_eq!(format_elapsed(chrono::Duration::seconds(3_725)), "01:02:05");
        assert_eq!(format_elapsed(chrono::Duration::seconds(-4)), "00:00:00");
    }

    #[test]
    fn start_time_is_only_set_once() {
        let stats = SharedStats::default();
        let first = Local::now();
        stats.mark_started(first);
        stats.mark_started(first + chrono::Duration::seconds(30));
        assert_eq!(stats.started_at(), Some(first));
    }

    #[test]
    fn reset_zeroes_counters() {
        let stats = SharedStats::default();
        stats.record_detection_cycle();
        stats.record_artifact_saved();
        stats.reset(None);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_detection_cycles, 0);
        assert_eq!(snapshot.total_artifacts_saved, 0);
        assert_eq!(snapshot.session_start_time, None);
    }

    #[test]
    fn counters_are_visible_from_another_thread() {
        let stats = Arc::new(SharedStats::default());
        for _ in 0..3 {
            stats.record_detection_cycle();
        }
        let observer = Arc::clone(&stats);
        let seen = std::thread::spawn(move || observer.snapshot().total_detection_cycles)
            .join()
            .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn elapsed_is_measured_from_the_start() {
        let start = Local::now();
        let snapshot = SessionStats {
            total_detection_cycles: 0,
            total_artifacts_saved: 0,
            session_start_time: Some(start),
            pending_writes: 0,
        };
        let elapsed = snapshot.elapsed(start + chrono::Duration::seconds(61)).unwrap();
        assert_eq!(format_elapsed(elapsed), "00:01:01");
    }
}
