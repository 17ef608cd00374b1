// THEORY:
// `watch_tester` drives a `motion_watch` session against a real camera (or a
// video file standing in for one) and shows what the engine sees. OpenCV does
// the device I/O and the on-screen preview; the engine only ever sees RGB
// `Frame`s.
//
// Threading:
// - The session loop is blocking (OpenCV reads, the preview window, the fixed
//   processing cadence) and runs on tokio's blocking pool.
// - A separate async task logs a statistics snapshot at a slower cadence.
// - Ctrl-C asks the session to stop through its stop handle; the loop then
//   flushes pending writes and releases the camera.

use anyhow::Context;
use clap::Parser;
use motion_watch::persistence::{DiskSink, JsonLinesRecorder, PersistenceSink};
use motion_watch::session::{CaptureStatus, FrameSource, SurveillanceSession};
use motion_watch::stats::{SessionStats, format_elapsed};
use motion_watch::{Error, Frame, SurveillanceConfig};
use opencv::{
    core::{self, Mat, Scalar},
    highgui, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const PREVIEW_WINDOW: &str = "motion_watch";
const ESC_KEY: i32 = 27;

#[derive(Parser, Debug)]
#[command(name = "watch_tester", about = "Watches a camera or video file for motion and saves evidence frames")]
struct Args {
    /// Camera device index, used when no input file is given.
    #[arg(short, long, default_value_t = 0)]
    device: u32,

    /// Read frames from this video file instead of a camera.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Write the annotated frames to this video file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file. Flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    threshold: Option<u8>,

    #[arg(long)]
    min_area: Option<f64>,

    /// Gaussian blur kernel size (odd, or 1 to disable).
    #[arg(long)]
    blur: Option<u32>,

    /// Minimum seconds between two saved artifacts.
    #[arg(long)]
    cooldown: Option<f64>,

    #[arg(long)]
    save_folder: Option<PathBuf>,

    /// Append one JSON line per saved artifact to this file.
    #[arg(long)]
    metadata_log: Option<PathBuf>,

    /// Show the annotated stream in a window. ESC stops.
    #[arg(long)]
    preview: bool,

    /// Target time between two cycles, in milliseconds.
    #[arg(long, default_value_t = 30)]
    interval_ms: u64,

    /// Save artifacts from a background task instead of inline.
    #[arg(long)]
    background_writes: bool,

    /// Seconds between two statistics log lines.
    #[arg(long, default_value_t = 10)]
    stats_every: u64,
}

impl Args {
    fn surveillance_config(&self) -> anyhow::Result<SurveillanceConfig> {
        let mut config = match &self.config {
            Some(path) => SurveillanceConfig::from_json_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => SurveillanceConfig::default(),
        };

        config.device_index = self.device;
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(min_area) = self.min_area {
            config.min_area = min_area;
        }
        if let Some(blur) = self.blur {
            config.blur_kernel_size = blur;
        }
        if let Some(cooldown) = self.cooldown {
            config.capture_cooldown_secs = cooldown;
        }
        if let Some(folder) = &self.save_folder {
            config.save_folder = folder.clone();
        }
        if self.metadata_log.is_some() {
            config.metadata_log = self.metadata_log.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

/// A camera device or a video file, read through OpenCV.
struct OpenCvCamera {
    input: Option<PathBuf>,
}

impl FrameSource for OpenCvCamera {
    type Handle = VideoCapture;

    fn open(&mut self, device_index: u32) -> motion_watch::Result<VideoCapture> {
        let open_error = |reason: String| Error::CameraOpen { device_index, reason };

        let capture = match &self.input {
            Some(path) => VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY),
            None => VideoCapture::new(device_index as i32, videoio::CAP_ANY),
        }
        .map_err(|e| open_error(e.to_string()))?;

        if !capture.is_opened().map_err(|e| open_error(e.to_string()))? {
            return Err(open_error("device is missing or busy".into()));
        }
        Ok(capture)
    }

    fn read(&mut self, handle: &mut VideoCapture) -> motion_watch::Result<Frame> {
        let mut bgr = Mat::default();
        let grabbed = handle
            .read(&mut bgr)
            .map_err(|e| Error::StreamRead(e.to_string()))?;
        if !grabbed || bgr.empty() {
            return Err(Error::EndOfStream);
        }
        bgr_to_frame(&bgr).map_err(|e| Error::StreamRead(e.to_string()))?
    }

    fn close(&mut self, mut handle: VideoCapture) {
        if let Err(e) = handle.release() {
            log::warn!("Camera did not release cleanly: {e}");
        }
    }
}

/// Converts an OpenCV BGR image into an engine frame stamped now.
fn bgr_to_frame(bgr: &Mat) -> opencv::Result<motion_watch::Result<Frame>> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let bytes = rgb.data_bytes()?.to_vec();
    Ok(Frame::from_rgb_bytes(
        rgb.cols() as u32,
        rgb.rows() as u32,
        bytes,
        Instant::now(),
    ))
}

fn frame_to_bgr(frame: &Frame) -> opencv::Result<Mat> {
    let mut rgb = Mat::new_rows_cols_with_default(
        frame.height() as i32,
        frame.width() as i32,
        core::CV_8UC3,
        Scalar::all(0.0),
    )?;
    rgb.data_bytes_mut()?.copy_from_slice(frame.image().as_raw());
    let mut bgr = Mat::default();
    imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

/// Where annotated frames go: a preview window, a video file, both or neither.
struct Display {
    preview: bool,
    output_path: Option<PathBuf>,
    writer: Option<VideoWriter>,
    fps: f64,
}

impl Display {
    fn new(preview: bool, output_path: Option<PathBuf>, interval: Duration) -> anyhow::Result<Self> {
        if preview {
            highgui::named_window(PREVIEW_WINDOW, highgui::WINDOW_AUTOSIZE)?;
        }
        let fps = 1.0 / interval.as_secs_f64().max(0.001);
        Ok(Self {
            preview,
            output_path,
            writer: None,
            fps,
        })
    }

    /// Shows one frame. Returns false when the viewer asked to quit.
    fn show(&mut self, frame: &Frame) -> anyhow::Result<bool> {
        if !self.preview && self.output_path.is_none() {
            return Ok(true);
        }
        let bgr = frame_to_bgr(frame)?;

        if let Some(path) = &self.output_path {
            if self.writer.is_none() {
                let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
                let size = core::Size::new(frame.width() as i32, frame.height() as i32);
                self.writer = Some(VideoWriter::new(&path.to_string_lossy(), fourcc, self.fps, size, true)?);
                log::info!("Writing annotated video to {}", path.display());
            }
            if let Some(writer) = self.writer.as_mut() {
                writer.write(&bgr)?;
            }
        }

        if self.preview {
            highgui::imshow(PREVIEW_WINDOW, &bgr)?;
            if highgui::wait_key(1)? == ESC_KEY {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.release() {
                log::warn!("Output video did not close cleanly: {e}");
            }
        }
        if self.preview {
            if let Err(e) = highgui::destroy_all_windows() {
                log::warn!("Preview window did not close cleanly: {e}");
            }
        }
    }
}

/// The blocking surveillance loop. Pending writes are flushed and the camera
/// released however the loop ends. Returns the final statistics.
fn run_session<F: FrameSource, S: PersistenceSink>(
    mut session: SurveillanceSession<F, S>,
    mut display: Display,
    interval: Duration,
) -> anyhow::Result<SessionStats> {
    session.init()?;
    session.start()?;

    let outcome = drive(&mut session, &mut display, interval);

    display.close();
    session.flush_writes();
    let stats = session.stats();
    let released = session.release();
    outcome?;
    released?;
    Ok(stats)
}

fn drive<F: FrameSource, S: PersistenceSink>(
    session: &mut SurveillanceSession<F, S>,
    display: &mut Display,
    interval: Duration,
) -> anyhow::Result<()> {
    loop {
        let cycle_start = Instant::now();

        match session.step() {
            Ok(report) => {
                log::debug!("Cycle: {} region(s)", report.region_count);
                if let CaptureStatus::Failed(err) = &report.capture {
                    log::warn!("Capture failed: {err}");
                }
                if !display.show(&report.display)? {
                    log::info!("Preview closed");
                    session.stop()?;
                    return Ok(());
                }
                if !report.continuation {
                    return Ok(());
                }
            }
            Err(Error::StopRequested) => return Ok(()),
            Err(err) if err.ends_run() => {
                log::info!("Frame stream ended: {err}");
                return Ok(());
            }
            Err(err) if err.is_algorithmic() => log::warn!("Skipping cycle: {err}"),
            Err(err) => return Err(err.into()),
        }

        if let Some(rest) = interval.checked_sub(cycle_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}

fn log_stats(stats: &SessionStats) {
    let elapsed = stats
        .elapsed(chrono::Local::now())
        .map(format_elapsed)
        .unwrap_or_else(|| "--:--:--".to_string());
    log::info!(
        "Running {elapsed}: {} detection cycle(s), {} artifact(s) saved, {} write(s) pending",
        stats.total_detection_cycles,
        stats.total_artifacts_saved,
        stats.pending_writes
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // --- 1. Configuration ---
    let args = Args::parse();
    let config = args.surveillance_config()?;
    let interval = Duration::from_millis(args.interval_ms);

    // --- 2. Session Assembly ---
    let sink = DiskSink::new(&config.save_folder, config.artifact_format)?;
    let camera = OpenCvCamera {
        input: args.input.clone(),
    };
    let metadata_log = config.metadata_log.clone();
    let mut session = SurveillanceSession::new(config, camera, sink)?;
    if let Some(path) = metadata_log {
        let recorder = JsonLinesRecorder::open(&path)?;
        log::info!("Recording saved artifacts in {}", recorder.path().display());
        session = session.with_recorder(recorder);
    }
    if args.background_writes {
        session = session.with_background_writes(&tokio::runtime::Handle::current());
    }

    // --- 3. Observers ---
    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, stopping");
            stop.request_stop();
        }
    });

    let live_stats = session.stats_handle();
    let every = Duration::from_secs(args.stats_every.max(1));
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            log_stats(&live_stats.snapshot());
        }
    });

    // --- 4. Main Loop ---
    let (preview, output) = (args.preview, args.output.clone());
    let outcome = tokio::task::spawn_blocking(move || {
        // The preview window belongs to the thread that draws into it.
        let display = Display::new(preview, output, interval)?;
        run_session(session, display, interval)
    })
    .await;
    reporter.abort();

    let stats = outcome.context("surveillance loop panicked")??;
    log_stats(&stats);
    log::info!("Surveillance finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_watch::persistence::StoredPath;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedCamera {
        frames: VecDeque<Frame>,
        closes: Arc<AtomicUsize>,
    }

    impl FrameSource for ScriptedCamera {
        type Handle = ();

        fn open(&mut self, _device_index: u32) -> motion_watch::Result<()> {
            Ok(())
        }

        fn read(&mut self, _handle: &mut ()) -> motion_watch::Result<Frame> {
            self.frames.pop_front().ok_or(Error::EndOfStream)
        }

        fn close(&mut self, _handle: ()) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NullSink;

    impl PersistenceSink for NullSink {
        fn write(&self, _artifact: &Frame, suggested_name: &str) -> motion_watch::Result<StoredPath> {
            Ok(StoredPath::new(format!("{suggested_name}.png")))
        }
    }

    fn frame(width: u32, height: u32, with_block: bool) -> Frame {
        let mut bytes = vec![0u8; (width * height * 3) as usize];
        if with_block {
            for y in 0..50 {
                for x in 0..50 {
                    let i = ((y * width + x) * 3) as usize;
                    bytes[i..i + 3].fill(255);
                }
            }
        }
        Frame::from_rgb_bytes(width, height, bytes, Instant::now()).unwrap()
    }

    fn scripted(frames: Vec<Frame>) -> (ScriptedCamera, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let camera = ScriptedCamera {
            frames: frames.into(),
            closes: Arc::clone(&closes),
        };
        (camera, closes)
    }

    fn headless() -> Display {
        Display::new(false, None, Duration::ZERO).unwrap()
    }

    #[test]
    fn end_of_stream_finishes_cleanly() {
        let (camera, closes) = scripted(vec![
            frame(160, 120, false),
            frame(160, 120, true),
            frame(160, 120, false),
        ]);
        let session = SurveillanceSession::new(SurveillanceConfig::default(), camera, NullSink).unwrap();

        let stats = run_session(session, headless(), Duration::ZERO).unwrap();

        assert_eq!(stats.total_detection_cycles, 2);
        assert_eq!(stats.total_artifacts_saved, 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stream_ending_on_a_failed_cycle_still_flushes_and_releases() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        // The last frame changes geometry, so the cycle that hits the end of
        // the stream also fails detection.
        let (camera, closes) = scripted(vec![
            frame(160, 120, false),
            frame(160, 120, true),
            frame(80, 60, false),
        ]);
        let session = SurveillanceSession::new(SurveillanceConfig::default(), camera, NullSink)
            .unwrap()
            .with_background_writes(runtime.handle());

        let stats = run_session(session, headless(), Duration::ZERO).unwrap();

        assert_eq!(stats.total_artifacts_saved, 1);
        assert_eq!(stats.pending_writes, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "watch_tester",
            "--device",
            "2",
            "--threshold",
            "40",
            "--blur",
            "1",
            "--cooldown",
            "2.5",
        ])
        .unwrap();

        let config = args.surveillance_config().unwrap();

        assert_eq!(config.device_index, 2);
        assert_eq!(config.threshold, 40);
        assert_eq!(config.blur_kernel_size, 1);
        assert_eq!(config.capture_cooldown(), Duration::from_millis(2500));
        assert_eq!(config.min_area, SurveillanceConfig::default().min_area);
    }

    #[test]
    fn even_blur_is_rejected() {
        let args = Args::try_parse_from(["watch_tester", "--blur", "4"]).unwrap();
        assert!(args.surveillance_config().is_err());
    }

    #[test]
    fn cadence_defaults_to_thirty_milliseconds() {
        let args = Args::try_parse_from(["watch_tester"]).unwrap();
        assert_eq!(args.interval_ms, 30);
        assert!(!args.preview);
    }
}
