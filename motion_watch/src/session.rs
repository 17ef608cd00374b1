// THEORY:
// The `session` module is the top-level API of the engine. A
// `SurveillanceSession` owns one camera handle, the rolling two-frame window,
// the capture gate and the statistics, and runs the whole pipeline once per
// call to `step()`:
//
//   preprocess both frames -> detect -> (count, gate, persist) -> annotate
//   -> read the next frame -> slide the window
//
// Key architectural principles:
// 1.  **No clock of its own**: the session never loops or sleeps. A driver calls
//     `step()` at whatever cadence it likes (a thread loop, a timer, an async
//     task) and renders what comes back.
// 2.  **Collaborators behind traits**: the camera (`FrameSource`) and the
//     storage (`PersistenceSink`) are type parameters, so tests run the real
//     state machine against scripted cameras and in-memory sinks.
// 3.  **Explicit lifecycle**: every operation checks the current state and
//     refuses with `InvalidState` instead of guessing.
//
//   Uninitialized --init--> Ready --start--> Running --stop--> Paused
//                                              ^                 |
//                                              +------start------+
//   Ready | Running | Paused --release--> Released --init--> Ready
//
// 4.  **Failures are results**: a failed read ends the run (state `Paused`) but
//     still hands back the frame that was just annotated. A failed detection
//     fails only its own cycle. A failed write is reported in the step report
//     and the session keeps running.

use crate::config::SurveillanceConfig;
use crate::core_modules::annotator::annotate;
use crate::core_modules::capture_gate::{CaptureDecision, CaptureGate};
use crate::core_modules::frame::{DetectionResult, Frame};
use crate::core_modules::motion_detector::motion_detector;
use crate::core_modules::preprocessor::preprocessor;
use crate::error::{Error, Result};
use crate::persistence::{MOTION_EVENT, MetadataRecorder, PersistenceSink, StoredPath, artifact_name};
use crate::stats::{SessionStats, SharedStats};
use crate::write_behind::{WriteAck, WriteBehind};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A camera, or anything else that produces an ordered stream of frames.
pub trait FrameSource {
    /// An open device. Owned by exactly one session at a time.
    type Handle;

    fn open(&mut self, device_index: u32) -> Result<Self::Handle>;

    /// Reads the next frame. End of stream and timeouts are errors.
    fn read(&mut self, handle: &mut Self::Handle) -> Result<Frame>;

    fn close(&mut self, handle: Self::Handle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Running,
    Paused,
    Released,
}

/// What happened to the capture side of one cycle.
#[derive(Debug)]
pub enum CaptureStatus {
    /// No motion, so the gate was not consulted.
    NoMotion,
    /// Motion, but the cooldown had not elapsed.
    Suppressed,
    /// The artifact was written and acknowledged.
    Saved(StoredPath),
    /// The artifact was handed to the background writer under this name.
    Queued(String),
    /// The write failed. The cooldown window is still consumed.
    Failed(Error),
}

/// The result of one `step()`.
#[derive(Debug)]
pub struct StepReport {
    /// The older frame of the window with the detected regions drawn on it.
    pub display: Frame,
    pub region_count: usize,
    /// False exactly when reading the next frame failed.
    pub continuation: bool,
    pub capture: CaptureStatus,
    /// Why the run ended, when `continuation` is false.
    pub stream_error: Option<Error>,
}

/// Lets another thread ask a session to stop before its next cycle.
#[derive(Debug, Clone)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::Release);
    }
}

/// The two frames being compared. `older` is also the frame that gets
/// displayed and, when the gate allows it, persisted.
struct FrameWindow {
    older: Frame,
    newer: Frame,
}

/// The main, top-level struct of the engine.
pub struct SurveillanceSession<F: FrameSource, S: PersistenceSink> {
    config: SurveillanceConfig,
    source: F,
    handle: Option<F::Handle>,
    window: Option<FrameWindow>,
    state: SessionState,
    gate: CaptureGate,
    sink: Arc<S>,
    recorder: Option<Box<dyn MetadataRecorder>>,
    write_behind: Option<WriteBehind>,
    stats: Arc<SharedStats>,
    stop_requested: Arc<AtomicBool>,
}

impl<F: FrameSource, S: PersistenceSink> SurveillanceSession<F, S> {
    pub fn new(config: SurveillanceConfig, source: F, sink: S) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "Session created: threshold {}, min area {}, blur {}, cooldown {}s",
            config.threshold,
            config.min_area,
            config.blur_kernel_size,
            config.capture_cooldown_secs
        );
        Ok(Self {
            config,
            source,
            handle: None,
            window: None,
            state: SessionState::Uninitialized,
            gate: CaptureGate::new(),
            sink: Arc::new(sink),
            recorder: None,
            write_behind: None,
            stats: Arc::new(SharedStats::default()),
            stop_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Records every saved artifact through `recorder`, best-effort.
    pub fn with_recorder(mut self, recorder: impl MetadataRecorder + 'static) -> Self {
        self.recorder = Some(Box::new(recorder));
        self
    }

    /// Moves artifact writes onto a worker task running on `runtime`.
    pub fn with_background_writes(mut self, runtime: &tokio::runtime::Handle) -> Self {
        self.write_behind = Some(WriteBehind::spawn(runtime, Arc::clone(&self.sink)));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SurveillanceConfig {
        &self.config
    }

    pub fn source(&self) -> &F {
        &self.source
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Live counters for observers on other threads.
    pub fn stats_handle(&self) -> Arc<SharedStats> {
        Arc::clone(&self.stats)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            requested: Arc::clone(&self.stop_requested),
        }
    }

    /// Opens the device and captures the first two frames.
    pub fn init(&mut self) -> Result<()> {
        match self.state {
            SessionState::Uninitialized | SessionState::Released => {}
            state => return Err(Error::InvalidState { operation: "init", state }),
        }

        let device_index = self.config.device_index;
        log::debug!("Opening camera {device_index}");
        let mut handle = self.source.open(device_index).map_err(|err| match err {
            Error::CameraOpen { .. } => err,
            other => Error::CameraOpen {
                device_index,
                reason: other.to_string(),
            },
        })?;

        let initial = self
            .source
            .read(&mut handle)
            .and_then(|older| Ok((older, self.source.read(&mut handle)?)));

        match initial {
            Ok((older, newer)) => {
                log::info!(
                    "Camera {device_index} ready at {}x{}",
                    newer.width(),
                    newer.height()
                );
                self.handle = Some(handle);
                self.window = Some(FrameWindow { older, newer });
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(err) => {
                self.source.close(handle);
                log::warn!("Camera {device_index} opened but initial frames failed: {err}");
                Err(Error::CameraInit {
                    device_index,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Starts a run, or resumes a paused one without reopening the device.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready | SessionState::Paused => {
                self.stop_requested.store(false, Ordering::Release);
                self.stats.mark_started(Local::now());
                self.state = SessionState::Running;
                log::info!("Surveillance running");
                Ok(())
            }
            state => Err(Error::InvalidState { operation: "start", state }),
        }
    }

    /// Pauses a run. The device stays open.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            SessionState::Running => {
                self.state = SessionState::Paused;
                log::info!("Surveillance paused");
                Ok(())
            }
            SessionState::Paused => Ok(()),
            state => Err(Error::InvalidState { operation: "stop", state }),
        }
    }

    /// Closes the device and drops the frame window.
    pub fn release(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready | SessionState::Running | SessionState::Paused => {
                self.collect_acks();
                if let Some(handle) = self.handle.take() {
                    self.source.close(handle);
                }
                self.window = None;
                self.state = SessionState::Released;
                log::info!("Camera released");
                Ok(())
            }
            state => Err(Error::InvalidState { operation: "release", state }),
        }
    }

    /// Zeroes the counters. A running session restarts its clock now.
    pub fn reset_stats(&mut self) {
        let restart_at = (self.state == SessionState::Running).then(Local::now);
        self.stats.reset(restart_at);
        log::info!("Statistics reset");
    }

    /// Waits for every background write to be acknowledged and counts the
    /// results. Blocks; call it from a plain thread, not an async task.
    pub fn flush_writes(&mut self) {
        let acks = match self.write_behind.as_mut() {
            Some(writer) => writer.flush(),
            None => return,
        };
        self.stats.set_pending_writes(0);
        for ack in acks {
            self.handle_ack(ack);
        }
    }

    /// Runs one detection cycle. Valid only while `Running`.
    ///
    /// Errors are reserved for cycles that produced no display frame: a
    /// lifecycle refusal, an honoured stop request, or a failed detection.
    /// A failed read still returns `Ok`, with `continuation == false`, unless
    /// the detection of that same cycle failed too: then the stream error is
    /// returned and the session is already `Paused`.
    pub fn step(&mut self) -> Result<StepReport> {
        if self.state != SessionState::Running {
            return Err(Error::InvalidState {
                operation: "step",
                state: self.state,
            });
        }
        if self.stop_requested.swap(false, Ordering::AcqRel) {
            self.state = SessionState::Paused;
            log::info!("Stop requested; surveillance paused");
            return Err(Error::StopRequested);
        }

        self.collect_acks();

        let Some(window) = self.window.take() else {
            return Err(Error::InvalidState {
                operation: "step",
                state: self.state,
            });
        };

        let cycle = self.analyze(&window);

        // The window slides even after a failed detection, so a stream whose
        // geometry changed recovers once both frames have the new geometry.
        let (window, stream_error) = self.advance(window);
        self.window = Some(window);
        if let Some(err) = &stream_error {
            log::warn!("Frame stream ended: {err}");
            self.state = SessionState::Paused;
        }

        match cycle {
            Ok((detection, capture, display)) => Ok(StepReport {
                display,
                region_count: detection.len(),
                continuation: stream_error.is_none(),
                capture,
                stream_error,
            }),
            Err(err) => {
                log::warn!("Detection cycle failed: {err}");
                Err(stream_error.unwrap_or(err))
            }
        }
    }

    /// Steps 1 to 4 of a cycle: everything except reading the next frame.
    fn analyze(&mut self, window: &FrameWindow) -> Result<(DetectionResult, CaptureStatus, Frame)> {
        let kernel = self.config.blur_kernel_size;
        let older = preprocessor::preprocess(&window.older, kernel)?;
        let newer = preprocessor::preprocess(&window.newer, kernel)?;
        let detection =
            motion_detector::detect(&older, &newer, self.config.threshold, self.config.min_area)?;

        let capture = if detection.motion_present() {
            self.stats.record_detection_cycle();
            let now = window.older.captured_at();
            match self.gate.try_capture(now, &window.older, self.config.capture_cooldown()) {
                CaptureDecision::Captured { artifact, .. } => self.persist(artifact),
                CaptureDecision::Suppressed => {
                    log::debug!("Capture suppressed by cooldown");
                    CaptureStatus::Suppressed
                }
            }
        } else {
            CaptureStatus::NoMotion
        };

        let display = annotate(&window.older, &detection);
        Ok((detection, capture, display))
    }

    /// Steps 5 and 6: read the next frame and slide the window.
    fn advance(&mut self, window: FrameWindow) -> (FrameWindow, Option<Error>) {
        let Some(handle) = self.handle.as_mut() else {
            return (window, Some(Error::StreamRead("no open device".into())));
        };
        match self.source.read(handle) {
            Ok(next) => (
                FrameWindow {
                    older: window.newer,
                    newer: next,
                },
                None,
            ),
            Err(err) if err.ends_run() => (window, Some(err)),
            Err(other) => (window, Some(Error::StreamRead(other.to_string()))),
        }
    }

    fn persist(&mut self, artifact: Frame) -> CaptureStatus {
        let name = artifact_name(&self.config.artifact_prefix, Local::now());

        if let Some(writer) = self.write_behind.as_mut() {
            return match writer.submit(artifact, name.clone()) {
                Ok(()) => {
                    self.stats.set_pending_writes(writer.in_flight());
                    log::debug!("Artifact {name} queued");
                    CaptureStatus::Queued(name)
                }
                Err(err) => {
                    log::warn!("Could not queue artifact {name}: {err}");
                    CaptureStatus::Failed(err)
                }
            };
        }

        match self.sink.write(&artifact, &name) {
            Ok(path) => {
                self.on_saved(&path);
                CaptureStatus::Saved(path)
            }
            Err(err) => {
                log::warn!("Artifact {name} was not saved: {err}");
                CaptureStatus::Failed(err)
            }
        }
    }

    fn collect_acks(&mut self) {
        let acks = match self.write_behind.as_mut() {
            Some(writer) => {
                let acks = writer.drain();
                self.stats.set_pending_writes(writer.in_flight());
                acks
            }
            None => return,
        };
        for ack in acks {
            self.handle_ack(ack);
        }
    }

    fn handle_ack(&mut self, ack: WriteAck) {
        match ack.result {
            Ok(path) => self.on_saved(&path),
            Err(err) => log::warn!("Background write of {} failed: {err}", ack.name),
        }
    }

    fn on_saved(&mut self, path: &StoredPath) {
        self.stats.record_artifact_saved();
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(err) = recorder.record(MOTION_EVENT, path) {
                log::warn!("Metadata for {path} not recorded: {err}");
            }
        }
    }
}

impl<F: FrameSource, S: PersistenceSink> Drop for SurveillanceSession<F, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.source.close(handle);
        }
    }
}
