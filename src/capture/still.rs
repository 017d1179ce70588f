//! Static image capture source.

use std::path::{Path, PathBuf};

use super::types::{CaptureError, Frame, Surface};
use super::CaptureSource;

/// Serves one decoded image file as a never-changing feed.
///
/// Useful for demos and for exercising a detector without a camera.
#[derive(Debug)]
pub struct StillSource {
    path: PathBuf,
    surface: Surface,
    attached: bool,
}

impl StillSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            surface: Surface::new(),
            attached: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureSource for StillSource {
    fn attach(&mut self, device: Option<&str>) -> Result<(), CaptureError> {
        self.detach();
        if let Some(device) = device {
            log::debug!("Still source ignores device '{}'", device);
        }
        if !self.path.exists() {
            return Err(CaptureError::DeviceNotFound(self.path.display().to_string()));
        }

        let image = image::open(&self.path)
            .map_err(|e| CaptureError::DecodeFailed(e.to_string()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        self.surface
            .publish(Frame::new(image.into_raw(), width, height));
        self.attached = true;
        log::info!(
            "Still source attached: {} ({}x{})",
            self.path.display(),
            width,
            height
        );
        Ok(())
    }

    fn detach(&mut self) {
        self.surface.clear();
        self.attached = false;
    }

    fn is_attached(&self) -> bool {
        self.attached
    }

    fn surface(&self) -> Surface {
        self.surface.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_png(dir: &Path) -> PathBuf {
        let path = dir.join("plate.png");
        let img = image::RgbImage::from_pixel(8, 4, image::Rgb([200, 200, 40]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_attach_publishes_image_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = StillSource::new(write_test_png(dir.path()));

        source.attach(None).unwrap();
        assert!(source.is_attached());
        let dims = source.surface().dimensions().unwrap();
        assert_eq!((dims.width, dims.height), (8, 4));

        source.detach();
        assert!(!source.is_attached());
        assert!(source.surface().dimensions().is_none());
    }

    #[test]
    fn test_attach_missing_file_fails() {
        let mut source = StillSource::new("/nonexistent/plate.png");
        assert!(matches!(
            source.attach(None),
            Err(CaptureError::DeviceNotFound(_))
        ));
        assert!(!source.is_attached());
    }

    #[test]
    fn test_attach_undecodable_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        let mut source = StillSource::new(path);
        assert!(matches!(
            source.attach(None),
            Err(CaptureError::DecodeFailed(_))
        ));
        assert!(!source.is_attached());
    }
}
