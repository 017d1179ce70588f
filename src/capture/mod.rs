//! Capture sources feeding the frame sampler.
//!
//! - Sources implement [`CaptureSource`] and publish into a shared [`Surface`]
//! - [`FfmpegSource`] drives a camera or looping sample video
//! - [`StillSource`] serves a single image
//! - Device enumeration via [`list_devices`]

mod devices;
mod ffmpeg;
mod still;
mod types;

pub use devices::{
    list_devices, list_v4l2_devices, parse_avfoundation_line, parse_avfoundation_list,
    print_devices, video_inputs,
};
pub use ffmpeg::{
    build_ffmpeg_args, default_input_format, resolve_device, FfmpegInput, FfmpegSource,
    DEFAULT_ATTACH_TIMEOUT,
};
pub use still::StillSource;
pub use types::{CaptureError, DeviceInfo, DeviceKind, Frame, Resolution, Surface};

/// A video input the session can attach to and read frames from.
pub trait CaptureSource: Send {
    /// Acquire the stream. On error nothing stays acquired.
    fn attach(&mut self, device: Option<&str>) -> Result<(), CaptureError>;

    /// Release the stream. Safe to call when nothing is attached.
    fn detach(&mut self);

    fn is_attached(&self) -> bool;

    /// Handle to the surface frames are published on.
    fn surface(&self) -> Surface;
}

impl<T: CaptureSource + ?Sized> CaptureSource for Box<T> {
    fn attach(&mut self, device: Option<&str>) -> Result<(), CaptureError> {
        (**self).attach(device)
    }

    fn detach(&mut self) {
        (**self).detach()
    }

    fn is_attached(&self) -> bool {
        (**self).is_attached()
    }

    fn surface(&self) -> Surface {
        (**self).surface()
    }
}
