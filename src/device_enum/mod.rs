//! Device enumeration boundary
//!
//! ## Responsibilities
//!
//! - Capture/audio device descriptors for the current platform
//! - Fuzzy name matching for platforms that address devices by
//!   human-readable name (DirectShow) rather than index/path
//!
//! Enumeration itself is an external concern; the encoder command
//! builder only consumes a snapshot through the [`DeviceEnumerator`]
//! trait, so the admin layer (or tests) can substitute its own source.

use serde::{Deserialize, Serialize};

/// Device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Video,
    Audio,
}

/// One capture/audio device descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable name as reported by the platform
    pub name: String,
    /// Platform locator (index, /dev path, or driver device string)
    pub locator: String,
    pub kind: DeviceKind,
}

/// Snapshot source for device descriptors
pub trait DeviceEnumerator: Send + Sync {
    fn list(&self, kind: DeviceKind) -> Vec<DeviceInfo>;
}

/// Platform enumerator: ffmpeg DirectShow listing on Windows,
/// /dev/video* scan on Linux.
pub struct PlatformDeviceEnumerator {
    #[cfg_attr(not(windows), allow(dead_code))]
    ffmpeg_path: Option<std::path::PathBuf>,
}

impl PlatformDeviceEnumerator {
    pub fn new(ffmpeg_path: Option<std::path::PathBuf>) -> Self {
        Self { ffmpeg_path }
    }

    #[cfg(not(windows))]
    fn list_platform(&self, kind: DeviceKind) -> Vec<DeviceInfo> {
        match kind {
            DeviceKind::Video => {
                let mut devices = Vec::new();
                if let Ok(entries) = std::fs::read_dir("/dev") {
                    for entry in entries.flatten() {
                        let name = entry.file_name().to_string_lossy().to_string();
                        if name.starts_with("video") {
                            devices.push(DeviceInfo {
                                name: name.clone(),
                                locator: format!("/dev/{}", name),
                                kind: DeviceKind::Video,
                            });
                        }
                    }
                }
                devices.sort_by(|a, b| a.locator.cmp(&b.locator));
                devices
            }
            // ALSA enumeration needs no probing for command construction:
            // the builder passes hw: locators through verbatim.
            DeviceKind::Audio => vec![DeviceInfo {
                name: "default".to_string(),
                locator: "default".to_string(),
                kind: DeviceKind::Audio,
            }],
        }
    }

    #[cfg(windows)]
    fn list_platform(&self, kind: DeviceKind) -> Vec<DeviceInfo> {
        let Some(ref ffmpeg) = self.ffmpeg_path else {
            return Vec::new();
        };
        let output = std::process::Command::new(ffmpeg)
            .args([
                "-hide_banner",
                "-list_devices",
                "true",
                "-f",
                "dshow",
                "-i",
                "dummy",
            ])
            .output();
        let output = match output {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list DirectShow devices");
                return Vec::new();
            }
        };
        // ffmpeg prints the device list on stderr:
        //   [dshow @ ...] "Microsoft LifeCam HD-5000" (video)
        let stderr = String::from_utf8_lossy(&output.stderr);
        parse_dshow_listing(&stderr, kind)
    }
}

impl DeviceEnumerator for PlatformDeviceEnumerator {
    fn list(&self, kind: DeviceKind) -> Vec<DeviceInfo> {
        let devices = self.list_platform(kind);
        tracing::debug!(kind = ?kind, count = devices.len(), "Enumerated devices");
        devices
    }
}

/// Parse ffmpeg's `-list_devices` stderr output.
///
/// Lines look like `[dshow @ 0x...] "Device Name" (video)` where the
/// trailing type is `video`, `audio`, or `none` (which may be either).
#[allow(dead_code)]
fn parse_dshow_listing(output: &str, kind: DeviceKind) -> Vec<DeviceInfo> {
    let wanted = match kind {
        DeviceKind::Video => "video",
        DeviceKind::Audio => "audio",
    };
    let mut devices = Vec::new();
    for line in output.lines() {
        if !line.starts_with("[dshow @") {
            continue;
        }
        let Some(open) = line.find('"') else { continue };
        let rest = &line[open + 1..];
        let Some(close) = rest.find('"') else { continue };
        let name = &rest[..close];
        let tail = rest[close + 1..].trim();
        let detected = tail.trim_start_matches('(').trim_end_matches(')');
        if detected == wanted || detected == "none" {
            devices.push(DeviceInfo {
                name: name.to_string(),
                locator: name.to_string(),
                kind,
            });
        }
    }
    devices
}

/// Fixed snapshot enumerator for tests and headless setups.
pub struct StaticDeviceEnumerator {
    devices: Vec<DeviceInfo>,
}

impl StaticDeviceEnumerator {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self { devices }
    }

    pub fn empty() -> Self {
        Self {
            devices: Vec::new(),
        }
    }
}

impl DeviceEnumerator for StaticDeviceEnumerator {
    fn list(&self, kind: DeviceKind) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }
}

/// Normalize a device name for fuzzy comparison: fold to ASCII
/// (dropping marks like a registered-trademark sign), lowercase, trim.
pub fn normalize_device_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii())
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

/// Result of a fuzzy device-name match.
#[derive(Debug, Clone)]
pub struct DeviceMatch {
    /// Device name to hand to the encoder
    pub name: String,
    /// False when the match was normalized/partial or fell back to the
    /// literal requested string
    pub exact: bool,
}

/// Match a requested device name against an enumeration snapshot.
///
/// Ladder: exact match, then ASCII-folded match, then substring
/// containment in either direction. An unmatched name falls back to the
/// literal request with a warning; the encoder process reports the real
/// error if the device truly does not exist.
pub fn match_device_name(requested: &str, devices: &[DeviceInfo]) -> DeviceMatch {
    if devices.iter().any(|d| d.name == requested) {
        return DeviceMatch {
            name: requested.to_string(),
            exact: true,
        };
    }

    let normalized_search = normalize_device_name(requested);
    for device in devices {
        let normalized_device = normalize_device_name(&device.name);
        if normalized_search == normalized_device {
            tracing::info!(requested = %requested, matched = %device.name, "Matched device by normalized name");
            return DeviceMatch {
                name: device.name.clone(),
                exact: false,
            };
        }
    }
    for device in devices {
        let normalized_device = normalize_device_name(&device.name);
        if normalized_device.contains(&normalized_search)
            || normalized_search.contains(&normalized_device)
        {
            tracing::info!(requested = %requested, matched = %device.name, "Partial device name match");
            return DeviceMatch {
                name: device.name.clone(),
                exact: false,
            };
        }
    }

    tracing::warn!(
        requested = %requested,
        available = devices.len(),
        "No matching device found, using requested name as-is"
    );
    DeviceMatch {
        name: requested.to_string(),
        exact: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                name: "Microsoft\u{00ae} LifeCam HD-5000".to_string(),
                locator: "Microsoft\u{00ae} LifeCam HD-5000".to_string(),
                kind: DeviceKind::Video,
            },
            DeviceInfo {
                name: "Integrated Webcam".to_string(),
                locator: "Integrated Webcam".to_string(),
                kind: DeviceKind::Video,
            },
        ]
    }

    #[test]
    fn test_exact_match() {
        let m = match_device_name("Integrated Webcam", &snapshot());
        assert_eq!(m.name, "Integrated Webcam");
        assert!(m.exact);
    }

    #[test]
    fn test_normalized_match_strips_trademark() {
        let m = match_device_name("Microsoft LifeCam HD-5000", &snapshot());
        assert_eq!(m.name, "Microsoft\u{00ae} LifeCam HD-5000");
        assert!(!m.exact);
    }

    #[test]
    fn test_substring_match() {
        let m = match_device_name("LifeCam HD-5000", &snapshot());
        assert_eq!(m.name, "Microsoft\u{00ae} LifeCam HD-5000");
        assert!(!m.exact);
    }

    #[test]
    fn test_unmatched_falls_back_to_literal() {
        let m = match_device_name("Nonexistent Cam", &snapshot());
        assert_eq!(m.name, "Nonexistent Cam");
        assert!(!m.exact);
    }

    #[test]
    fn test_parse_dshow_listing() {
        let output = concat!(
            "[dshow @ 000001] DirectShow video devices\n",
            "[dshow @ 000001] \"Integrated Webcam\" (video)\n",
            "[dshow @ 000001]   Alternative name \"@device_pnp_x\"\n",
            "[dshow @ 000001] DirectShow audio devices\n",
            "[dshow @ 000001] \"Microphone Array\" (audio)\n",
            "[dshow @ 000001] \"Mystery Device\" (none)\n",
        );
        let video = parse_dshow_listing(output, DeviceKind::Video);
        assert_eq!(video.len(), 2); // video + none
        assert_eq!(video[0].name, "Integrated Webcam");
        let audio = parse_dshow_listing(output, DeviceKind::Audio);
        assert_eq!(audio.len(), 2); // audio + none
        assert_eq!(audio[0].name, "Microphone Array");
    }
}
