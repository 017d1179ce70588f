//! Capture device enumeration.
//!
//! macOS devices are discovered through FFmpeg's AVFoundation listing; on
//! Linux the V4L2 nodes under `/dev` are listed with names from sysfs.

use std::path::Path;
use std::process::{Command, Stdio};

use super::types::{CaptureError, DeviceInfo, DeviceKind};

/// List available capture devices on this machine.
///
/// Returns an empty list (not an error) when no device is present.
pub fn list_devices() -> Result<Vec<DeviceInfo>, CaptureError> {
    if cfg!(target_os = "macos") {
        list_avfoundation_devices()
    } else {
        list_v4l2_devices(Path::new("/dev"), Path::new("/sys/class/video4linux"))
    }
}

/// Only the entries usable as a video source.
pub fn video_inputs(devices: &[DeviceInfo]) -> Vec<&DeviceInfo> {
    devices
        .iter()
        .filter(|d| d.kind == DeviceKind::VideoInput && !d.id.is_empty())
        .collect()
}

fn list_avfoundation_devices() -> Result<Vec<DeviceInfo>, CaptureError> {
    let output = Command::new("ffmpeg")
        .args(["-f", "avfoundation", "-list_devices", "true", "-i", ""])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CaptureError::FfmpegNotFound
            } else {
                CaptureError::QueryFailed(e.to_string())
            }
        })?;

    // FFmpeg prints the listing to stderr
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(parse_avfoundation_list(&stderr))
}

/// Parse FFmpeg's AVFoundation device listing.
pub fn parse_avfoundation_list(stderr: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    let mut kind = None;

    for line in stderr.lines() {
        if line.contains("AVFoundation video devices:") {
            kind = Some(DeviceKind::VideoInput);
            continue;
        }
        if line.contains("AVFoundation audio devices:") {
            kind = Some(DeviceKind::AudioInput);
            continue;
        }

        if let (Some(kind), Some((id, label))) = (kind, parse_avfoundation_line(line)) {
            devices.push(DeviceInfo { id, label, kind });
        }
    }

    devices
}

/// Parse one `[AVFoundation indev @ 0x...] [index] name` line.
pub fn parse_avfoundation_line(line: &str) -> Option<(String, String)> {
    let bracket_idx = line.find("] [")?;
    let after_bracket = &line[bracket_idx + 3..];

    let close_bracket = after_bracket.find(']')?;
    let index: usize = after_bracket[..close_bracket].parse().ok()?;

    let label = after_bracket.get(close_bracket + 2..)?.trim().to_string();
    if label.is_empty() {
        return None;
    }

    Some((index.to_string(), label))
}

/// List `videoN` nodes in `dev_dir`, naming them from `sysfs_dir/videoN/name`.
pub fn list_v4l2_devices(dev_dir: &Path, sysfs_dir: &Path) -> Result<Vec<DeviceInfo>, CaptureError> {
    let entries = match std::fs::read_dir(dev_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CaptureError::QueryFailed(e.to_string())),
    };

    let mut devices: Vec<DeviceInfo> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = name.strip_prefix("video")?;
            if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let label = std::fs::read_to_string(sysfs_dir.join(&name).join("name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| name.clone());
            Some(DeviceInfo {
                id: entry.path().display().to_string(),
                label,
                kind: DeviceKind::VideoInput,
            })
        })
        .collect();

    devices.sort_by_key(|d| (video_index(&d.id), d.id.clone()));
    Ok(devices)
}

fn video_index(id: &str) -> u32 {
    id.rsplit_once("video")
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(u32::MAX)
}

/// Print devices to stdout.
pub fn print_devices(devices: &[DeviceInfo], video_only: bool) {
    let shown: Vec<&DeviceInfo> = if video_only {
        video_inputs(devices)
    } else {
        devices.iter().collect()
    };

    if shown.is_empty() {
        println!("No capture devices found.");
        println!();
        println!("Make sure a camera is connected and camera permission is granted.");
        return;
    }

    println!("Available devices:");
    for device in shown {
        println!("  {}", device);
    }
    println!();
    println!("Use --device <id> to select a camera.");
}
