//! Capture types and data structures.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Kind of capture device reported by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::VideoInput => write!(f, "videoinput"),
            DeviceKind::AudioInput => write!(f, "audioinput"),
        }
    }
}

/// Information about an available capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Identifier accepted by [`super::CaptureSource::attach`]
    pub id: String,
    /// Human-readable device name
    pub label: String,
    pub kind: DeviceKind,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.id, self.label, self.kind)
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Default capture size, matching the console's 600x460 preview.
    pub const PREVIEW: Resolution = Resolution {
        width: 600,
        height: 460,
    };

    /// Number of bytes in one RGB frame of this size.
    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::PREVIEW
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A raw RGB frame read from a capture source.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data, 3 bytes per pixel
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// When the frame was published to the surface
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Default)]
struct SurfaceState {
    frame: Option<Frame>,
    failure: Option<String>,
}

/// Shared slot holding the latest frame of an attached source.
///
/// The capture side publishes into it; the sampler reads whatever is current
/// at tick time. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct Surface {
    inner: Arc<Mutex<SurfaceState>>,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Frame) {
        if let Ok(mut state) = self.inner.lock() {
            state.frame = Some(frame);
        }
    }

    /// Mark the stream behind this surface as dead.
    pub fn fail(&self, message: impl Into<String>) {
        if let Ok(mut state) = self.inner.lock() {
            state.failure = Some(message.into());
        }
    }

    /// Drop the current frame and any recorded failure.
    pub fn clear(&self) {
        if let Ok(mut state) = self.inner.lock() {
            *state = SurfaceState::default();
        }
    }

    /// Latest frame, `Ok(None)` while playback has not started yet.
    pub fn current(&self) -> Result<Option<Frame>, CaptureError> {
        let state = self
            .inner
            .lock()
            .map_err(|_| CaptureError::StreamFailed("surface lock poisoned".to_string()))?;
        if let Some(message) = &state.failure {
            return Err(CaptureError::StreamFailed(message.clone()));
        }
        Ok(state.frame.clone())
    }

    /// Natural dimensions, known once the first frame has been published.
    pub fn dimensions(&self) -> Option<Resolution> {
        let state = self.inner.lock().ok()?;
        state.frame.as_ref().map(Frame::resolution)
    }
}

/// Errors that can occur while acquiring or reading a capture source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("FFmpeg not found. Install ffmpeg and make sure it is on PATH")]
    FfmpegNotFound,

    #[error("Failed to start capture process: {0}")]
    SpawnFailed(String),

    #[error("Capture device '{0}' not found. Run 'plate-console list-devices' to see available devices")]
    DeviceNotFound(String),

    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Failed to query capture devices: {0}")]
    QueryFailed(String),

    #[error("Failed to decode sample image: {0}")]
    DecodeFailed(String),

    #[error("Capture stream failed: {0}")]
    StreamFailed(String),

    #[error("No sample path configured")]
    MissingSamplePath,
}
