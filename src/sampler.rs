//! Timer-driven frame sampling.
//!
//! On every tick the sampler takes whatever frame is current on the capture
//! surface, encodes it as JPEG and hands it to a [`FrameSink`]. Nothing is
//! queued: a tick that finds no frame, or fails to encode, is skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::capture::{CaptureError, Frame, Surface};

/// Default sampling period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1500);

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Shortest period accepted; tokio rejects a zero interval.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A JPEG still ready to be sent to the detector.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
}

/// Errors encoding a single frame.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Encode an RGB frame as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<EncodedFrame, SampleError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected || expected == 0 {
        return Err(SampleError::FrameSize {
            expected,
            actual: frame.data.len(),
        });
    }

    let mut data = Vec::with_capacity(expected / 8);
    JpegEncoder::new_with_quality(&mut data, quality.clamp(1, 100)).encode(
        &frame.data,
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
    )?;

    Ok(EncodedFrame {
        data,
        width: frame.width,
        height: frame.height,
        captured_at: frame.timestamp,
    })
}

/// Receiver of sampled frames.
pub trait FrameSink: Send + 'static {
    fn on_frame(&mut self, frame: EncodedFrame);

    /// The capture stream died; the sampler stops after this call.
    fn on_source_failed(&mut self, error: CaptureError) {
        log::warn!("Capture source failed: {}", error);
    }
}

impl<F> FrameSink for F
where
    F: FnMut(EncodedFrame) + Send + 'static,
{
    fn on_frame(&mut self, frame: EncodedFrame) {
        self(frame)
    }
}

/// Periodic sampler bound to one surface at a time.
#[derive(Debug)]
pub struct FrameSampler {
    jpeg_quality: u8,
    task: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    // Held across each delivery and by `stop`
    gate: Arc<Mutex<()>>,
    ticks: Arc<AtomicU64>,
}

impl FrameSampler {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality,
            task: None,
            running: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(Mutex::new(())),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start firing every `interval`. A running timer is stopped first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S: FrameSink>(&mut self, surface: Surface, interval: Duration, sink: S) {
        self.stop();

        let running = Arc::new(AtomicBool::new(true));
        self.running = Arc::clone(&running);
        let gate = Arc::clone(&self.gate);
        let ticks = Arc::clone(&self.ticks);
        let quality = self.jpeg_quality;
        let interval = interval.max(MIN_INTERVAL);

        log::debug!("Frame sampler started ({:?} interval)", interval);
        self.task = Some(tokio::spawn(run_sampler(
            surface, interval, quality, running, gate, ticks, sink,
        )));
    }

    /// Stop firing. No frame is delivered after this returns.
    ///
    /// On a multi-threaded runtime a delivery may be in progress on another
    /// worker; `stop` blocks until that call returns.
    pub fn stop(&mut self) {
        {
            let _delivering = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            self.running.store(false, Ordering::SeqCst);
        }
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Frame sampler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Total frames delivered since creation.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Shared handle to the delivery counter, readable after the sampler is gone.
    pub fn tick_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.ticks)
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_sampler<S: FrameSink>(
    surface: Surface,
    interval: Duration,
    quality: u8,
    running: Arc<AtomicBool>,
    gate: Arc<Mutex<()>>,
    ticks: Arc<AtomicU64>,
    mut sink: S,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let frame = match surface.current() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::trace!("No frame yet, waiting for playback to start");
                continue;
            }
            Err(e) => {
                let _delivering = gate.lock().unwrap_or_else(PoisonError::into_inner);
                if running.swap(false, Ordering::SeqCst) {
                    sink.on_source_failed(e);
                }
                break;
            }
        };

        match encode_jpeg(&frame, quality) {
            Ok(encoded) => {
                let _delivering = gate.lock().unwrap_or_else(PoisonError::into_inner);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                ticks.fetch_add(1, Ordering::SeqCst);
                sink.on_frame(encoded);
            }
            Err(e) => log::warn!("Skipping frame: {}", e),
        }
    }
}
