//! Camera device enumeration.

use std::io::ErrorKind;
use std::process::Command;

use super::types::{CameraError, CameraInfo, CameraSettings};

/// List all available camera devices on the system.
///
/// Camera modules reported by `rpicam-vid --list-cameras` come first, then
/// (with the `native-camera` feature) whatever the OS camera API reports.
/// If no cameras are found, returns an empty vector (not an error).
pub fn list_devices(settings: &CameraSettings) -> Result<Vec<CameraInfo>, CameraError> {
    let mut devices = list_camera_modules(&settings.rpicam_command)?;

    #[cfg(feature = "native-camera")]
    devices.extend(super::native::list_devices()?);

    devices.dedup_by(|a, b| a.index == b.index && a.name == b.name);
    Ok(devices)
}

fn list_camera_modules(command: &str) -> Result<Vec<CameraInfo>, CameraError> {
    let output = match Command::new(command).arg("--list-cameras").output() {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::debug!("'{}' not installed, skipping camera module listing", command);
            return Ok(Vec::new());
        }
        Err(e) => return Err(CameraError::QueryFailed(e.to_string())),
    };

    // Older rpicam builds print the listing on stderr.
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(parse_camera_list(&text))
}

/// Parse `rpicam-vid --list-cameras` output.
///
/// Device lines look like
/// `0 : imx219 [3280x2464 10-bit RGGB] (/base/soc/i2c0mux/i2c@1/imx219@10)`;
/// mode lines and headers are ignored.
pub(crate) fn parse_camera_list(text: &str) -> Vec<CameraInfo> {
    text.lines()
        .filter_map(|line| {
            let (index, rest) = line.trim().split_once(" : ")?;
            let index = index.trim().parse::<u32>().ok()?;
            let rest = rest.trim();
            let (name, description) = match rest.find(' ') {
                Some(pos) => (&rest[..pos], rest[pos..].trim()),
                None => (rest, ""),
            };
            Some(CameraInfo {
                index,
                name: name.to_string(),
                description: description.to_string(),
            })
        })
        .collect()
}
