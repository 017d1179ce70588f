//! FFmpeg-backed capture source for cameras and looping sample videos.
//!
//! FFmpeg decodes the input and writes raw RGB frames to stdout at a fixed
//! size; a background reader thread publishes each complete frame to the
//! source's [`Surface`]. `attach` returns only once the first frame has
//! arrived, so a device that FFmpeg cannot open fails the attach itself.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::types::{CaptureError, Frame, Resolution, Surface};
use super::CaptureSource;

/// What FFmpeg should read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfmpegInput {
    /// A live camera through a platform input format (v4l2, avfoundation, dshow).
    Camera {
        format: String,
        default_device: Option<String>,
    },
    /// A video file replayed in a loop at its native rate.
    SampleVideo { path: PathBuf },
}

/// Platform default FFmpeg input format for cameras.
pub fn default_input_format() -> &'static str {
    if cfg!(target_os = "macos") {
        "avfoundation"
    } else if cfg!(target_os = "windows") {
        "dshow"
    } else {
        "v4l2"
    }
}

/// Default wait for the first frame in `attach`.
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

const ATTACH_POLL: Duration = Duration::from_millis(20);

fn default_device_for(format: &str) -> &'static str {
    match format {
        "avfoundation" => "0",
        "dshow" => "video=0",
        _ => "/dev/video0",
    }
}

/// The device FFmpeg will open: the explicit one, else the configured
/// default, else the platform default. Sample videos resolve to their path.
pub fn resolve_device(input: &FfmpegInput, device: Option<&str>) -> String {
    match input {
        FfmpegInput::Camera {
            format,
            default_device,
        } => device
            .map(str::to_string)
            .or_else(|| default_device.clone())
            .unwrap_or_else(|| default_device_for(format).to_string()),
        FfmpegInput::SampleVideo { path } => path.display().to_string(),
    }
}

/// Build the FFmpeg argument list for an input and device.
pub fn build_ffmpeg_args(
    input: &FfmpegInput,
    device: Option<&str>,
    resolution: Resolution,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

    match input {
        FfmpegInput::Camera { format, .. } => {
            args.extend([
                "-f".into(),
                format.clone(),
                "-i".into(),
                resolve_device(input, device),
            ]);
        }
        FfmpegInput::SampleVideo { path } => {
            args.extend([
                "-stream_loop".into(),
                "-1".into(),
                "-re".into(),
                "-i".into(),
                path.display().to_string(),
            ]);
        }
    }

    args.extend([
        "-an".into(),
        "-vf".into(),
        format!("scale={}:{}", resolution.width, resolution.height),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-f".into(),
        "rawvideo".into(),
        "-".into(),
    ]);
    args
}

/// Capture source that runs an FFmpeg child process.
pub struct FfmpegSource {
    input: FfmpegInput,
    resolution: Resolution,
    program: PathBuf,
    attach_timeout: Duration,
    surface: Surface,
    child: Option<Child>,
    reader_thread: Option<JoinHandle<()>>,
    stderr_thread: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for FfmpegSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegSource")
            .field("input", &self.input)
            .field("resolution", &self.resolution)
            .field("is_attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

impl FfmpegSource {
    pub fn new(input: FfmpegInput, resolution: Resolution) -> Self {
        Self {
            input,
            resolution,
            program: PathBuf::from("ffmpeg"),
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
            surface: Surface::new(),
            child: None,
            reader_thread: None,
            stderr_thread: None,
            stop_signal: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Run this executable instead of `ffmpeg` from PATH.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// How long `attach` waits for the first frame before giving up.
    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    /// Camera source using the platform default input format.
    pub fn camera(resolution: Resolution) -> Self {
        Self::new(
            FfmpegInput::Camera {
                format: default_input_format().to_string(),
                default_device: None,
            },
            resolution,
        )
    }

    /// Looping sample video source.
    pub fn sample_video(path: impl Into<PathBuf>, resolution: Resolution) -> Self {
        Self::new(FfmpegInput::SampleVideo { path: path.into() }, resolution)
    }

    pub fn input(&self) -> &FfmpegInput {
        &self.input
    }

    fn check_input(&self, device: &str) -> Result<(), CaptureError> {
        let must_exist = match &self.input {
            FfmpegInput::SampleVideo { .. } => true,
            FfmpegInput::Camera { format, .. } => format == "v4l2" && device.starts_with("/dev/"),
        };
        if must_exist && !Path::new(device).exists() {
            return Err(CaptureError::DeviceNotFound(device.to_string()));
        }
        Ok(())
    }

    /// Block until the reader publishes a frame, FFmpeg exits, or the
    /// attach timeout passes.
    fn wait_for_first_frame(&mut self, device: &str) -> Result<(), CaptureError> {
        let deadline = Instant::now() + self.attach_timeout;
        loop {
            match self.surface.current() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {}
                Err(_) => return Err(self.startup_failure(device)),
            }

            let exited = match self.child.as_mut() {
                Some(child) => !matches!(child.try_wait(), Ok(None)),
                None => true,
            };
            if exited {
                return Err(self.startup_failure(device));
            }

            if Instant::now() >= deadline {
                return Err(CaptureError::StreamFailed(format!(
                    "no frame from '{}' within {} ms",
                    device,
                    self.attach_timeout.as_millis()
                )));
            }
            thread::sleep(ATTACH_POLL);
        }
    }

    /// Stop FFmpeg and turn its last stderr line into an error.
    fn startup_failure(&mut self, device: &str) -> CaptureError {
        self.kill_child();
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        let reason = self
            .last_error
            .lock()
            .ok()
            .and_then(|last| last.clone())
            .unwrap_or_else(|| "ffmpeg exited before producing a frame".to_string());
        classify_startup_failure(&reason, device)
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl CaptureSource for FfmpegSource {
    fn attach(&mut self, device: Option<&str>) -> Result<(), CaptureError> {
        self.detach();
        let device = resolve_device(&self.input, device);
        self.check_input(&device)?;

        let args = build_ffmpeg_args(&self.input, Some(&device), self.resolution);
        log::info!(
            "Starting capture: {} {}",
            self.program.display(),
            args.join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CaptureError::FfmpegNotFound
                } else {
                    CaptureError::SpawnFailed(e.to_string())
                }
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.child = Some(child);

        let Some(stdout) = stdout else {
            self.kill_child();
            return Err(CaptureError::SpawnFailed(
                "ffmpeg stdout unavailable".to_string(),
            ));
        };

        self.stop_signal.store(false, Ordering::SeqCst);
        let last_error = Arc::new(Mutex::new(None::<String>));
        self.last_error = Arc::clone(&last_error);

        if let Some(stderr) = stderr {
            let last_error = Arc::clone(&last_error);
            self.stderr_thread = Some(thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines().map_while(Result::ok) {
                    log::debug!("[ffmpeg] {}", line);
                    if let Ok(mut last) = last_error.lock() {
                        *last = Some(line);
                    }
                }
            }));
        }

        let surface = self.surface.clone();
        let stop = Arc::clone(&self.stop_signal);
        let resolution = self.resolution;
        let spawned = thread::Builder::new()
            .name("capture-reader".to_string())
            .spawn(move || run_reader_loop(stdout, resolution, surface, stop, last_error));

        match spawned {
            Ok(handle) => self.reader_thread = Some(handle),
            Err(e) => {
                self.detach();
                return Err(CaptureError::SpawnFailed(e.to_string()));
            }
        }

        if let Err(e) = self.wait_for_first_frame(&device) {
            log::warn!("Capture failed to start: {}", e);
            self.detach();
            return Err(e);
        }
        Ok(())
    }

    fn detach(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        let was_attached = self.child.is_some();
        self.kill_child();

        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        self.surface.clear();

        if was_attached {
            log::info!("Capture source released");
        }
    }

    fn is_attached(&self) -> bool {
        self.child.is_some()
    }

    fn surface(&self) -> Surface {
        self.surface.clone()
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Map FFmpeg's last complaint before any frame to an attach error.
fn classify_startup_failure(reason: &str, device: &str) -> CaptureError {
    let lower = reason.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        CaptureError::PermissionDenied
    } else if lower.contains("no such file")
        || lower.contains("not found")
        || lower.contains("does not exist")
        || lower.contains("cannot open")
        || lower.contains("could not open")
    {
        CaptureError::DeviceNotFound(device.to_string())
    } else {
        CaptureError::StreamFailed(reason.to_string())
    }
}

/// Read fixed-size RGB frames until EOF or stop.
fn run_reader_loop(
    mut stdout: ChildStdout,
    resolution: Resolution,
    surface: Surface,
    stop: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let frame_len = resolution.rgb_frame_len();
    let mut buf = vec![0u8; frame_len];

    while !stop.load(Ordering::Relaxed) {
        match stdout.read_exact(&mut buf) {
            Ok(()) => {
                surface.publish(Frame::new(buf.clone(), resolution.width, resolution.height));
            }
            Err(e) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let reason = last_error
                    .lock()
                    .ok()
                    .and_then(|last| last.clone())
                    .unwrap_or_else(|| e.to_string());
                let lower = reason.to_lowercase();
                let message = if lower.contains("permission") || lower.contains("denied") {
                    CaptureError::PermissionDenied.to_string()
                } else {
                    format!("ffmpeg stopped producing frames: {}", reason)
                };
                log::warn!("{}", message);
                surface.fail(message);
                break;
            }
        }
    }
}
