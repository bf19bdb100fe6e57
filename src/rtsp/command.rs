//! External encoder command construction
//!
//! ## Responsibilities
//!
//! - Resolve the ffmpeg executable once (PATH, then conventional
//!   install directories) and cache the result
//! - Translate an [`RtspStreamConfig`] plus a device-enumeration
//!   snapshot into a deterministic argv: same inputs, same argv,
//!   no side effects

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::device_enum::{match_device_name, DeviceEnumerator, DeviceKind};
use crate::error::{Error, Result};
use crate::rtsp::types::RtspStreamConfig;

/// Capture API selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformBackend {
    /// Linux: v4l2 video, ALSA audio
    V4l2Alsa,
    /// Windows: DirectShow for both legs
    DirectShow,
}

impl PlatformBackend {
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::DirectShow
        } else {
            Self::V4l2Alsa
        }
    }
}

/// A fully built encoder command, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub has_audio: bool,
    /// True when any device name was resolved by fuzzy/fallback match
    pub low_confidence: bool,
}

/// Builds ffmpeg command lines for RTSP push streams.
pub struct EncoderCommandBuilder {
    program: Option<PathBuf>,
    backend: PlatformBackend,
    enumerator: Arc<dyn DeviceEnumerator>,
}

impl EncoderCommandBuilder {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self {
            program: resolve_encoder_binary(),
            backend: PlatformBackend::native(),
            enumerator,
        }
    }

    /// Override the executable and backend, for configuration
    /// (`FFMPEG_PATH`) and tests.
    pub fn with_program(
        program: PathBuf,
        backend: PlatformBackend,
        enumerator: Arc<dyn DeviceEnumerator>,
    ) -> Self {
        Self {
            program: Some(program),
            backend,
            enumerator,
        }
    }

    /// Side-effect-free probe of the cached executable resolution.
    pub fn is_available(&self) -> bool {
        self.program.is_some()
    }

    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }

    /// Build the full argv for one stream.
    pub fn build(&self, config: &RtspStreamConfig) -> Result<EncoderInvocation> {
        let program = self
            .program
            .clone()
            .ok_or_else(|| Error::EncoderSpawn("ffmpeg executable not found".to_string()))?;

        let mut args: Vec<String> = Vec::new();
        let mut low_confidence = false;

        args.extend(["-hide_banner", "-loglevel", "error", "-y"].map(String::from));

        // Video input group
        match self.backend {
            PlatformBackend::V4l2Alsa => {
                args.extend(["-f".to_string(), "v4l2".to_string()]);
                args.extend(["-framerate".to_string(), config.framerate.to_string()]);
                args.extend(["-video_size".to_string(), config.resolution.clone()]);
                args.extend(["-i".to_string(), linux_video_locator(&config.device_path)]);
            }
            PlatformBackend::DirectShow => {
                let devices = self.enumerator.list(DeviceKind::Video);
                let matched = match_device_name(&config.device_path, &devices);
                low_confidence |= !matched.exact;
                args.extend(["-f".to_string(), "dshow".to_string()]);
                args.extend(["-framerate".to_string(), config.framerate.to_string()]);
                args.extend(["-video_size".to_string(), config.resolution.clone()]);
                args.extend(["-i".to_string(), format!("video={}", matched.name)]);
            }
        }

        // Optional audio input group
        let has_audio = if let Some(ref audio) = config.audio {
            match self.backend {
                PlatformBackend::V4l2Alsa => {
                    args.extend(["-f".to_string(), "alsa".to_string()]);
                    args.extend(["-sample_rate".to_string(), audio.sample_rate.to_string()]);
                    args.extend(["-channels".to_string(), audio.channels.to_string()]);
                    args.extend(["-i".to_string(), audio.device.clone()]);
                }
                PlatformBackend::DirectShow => {
                    let devices = self.enumerator.list(DeviceKind::Audio);
                    let matched = match_device_name(&audio.device, &devices);
                    low_confidence |= !matched.exact;
                    args.extend(["-f".to_string(), "dshow".to_string()]);
                    args.extend(["-sample_rate".to_string(), audio.sample_rate.to_string()]);
                    args.extend(["-channels".to_string(), audio.channels.to_string()]);
                    args.extend(["-i".to_string(), format!("audio={}", matched.name)]);
                }
            }
            true
        } else {
            false
        };

        // Encoding group: low-latency H.264, keyframe every 2s worth
        // of frames, constrained rate.
        args.extend(["-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency"].map(String::from));
        args.extend(["-b:v".to_string(), format!("{}k", config.video_bitrate)]);
        args.extend(["-maxrate".to_string(), format!("{}k", config.video_bitrate * 2)]);
        args.extend(["-bufsize".to_string(), format!("{}k", config.video_bitrate)]);
        args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]);
        args.extend(["-g".to_string(), (config.framerate * 2).to_string()]);

        if let Some(ref audio) = config.audio {
            let codec = match audio.codec.as_str() {
                "aac" => "aac",
                "opus" => "libopus",
                "mp3" => "libmp3lame",
                "pcm" => "pcm_s16le",
                other => {
                    tracing::warn!(codec = %other, "Unknown audio codec, defaulting to aac");
                    "aac"
                }
            };
            args.extend(["-c:a".to_string(), codec.to_string()]);
            if codec != "pcm_s16le" {
                args.extend(["-b:a".to_string(), format!("{}k", audio.bitrate)]);
            }
            args.extend(["-ar".to_string(), audio.sample_rate.to_string()]);
            args.extend(["-ac".to_string(), audio.channels.to_string()]);
        } else {
            args.push("-an".to_string());
        }

        // Network output group
        args.extend(["-f".to_string(), "rtsp".to_string()]);
        args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
        args.push(format!("rtsp://127.0.0.1:{}{}", config.port, config.path));

        Ok(EncoderInvocation {
            program,
            args,
            has_audio,
            low_confidence,
        })
    }
}

fn linux_video_locator(device_path: &str) -> String {
    // Numeric locators address /dev/videoN; anything else passes
    // through (path or URI).
    match device_path.parse::<u32>() {
        Ok(index) => format!("/dev/video{}", index),
        Err(_) => device_path.to_string(),
    }
}

/// Search PATH, then conventional install directories.
fn resolve_encoder_binary() -> Option<PathBuf> {
    let name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    let fallback_dirs: &[&str] = if cfg!(windows) {
        &["C:\\ffmpeg\\bin", "C:\\Program Files\\ffmpeg\\bin"]
    } else {
        &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"]
    };
    for dir in fallback_dirs {
        let candidate = Path::new(dir).join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    tracing::warn!("ffmpeg executable not found on this system");
    None
}
