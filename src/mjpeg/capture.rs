//! Capture loop and capture backends
//!
//! ## Responsibilities
//!
//! - Own the native capture handle for one camera on a dedicated
//!   blocking thread: acquire, resize, overlay, encode, publish,
//!   rate-limit
//! - Platform backend selection behind [`CaptureBackend`], with a
//!   synthetic test-pattern backend for development and tests
//!
//! All failures inside the loop become state on the [`DeviceStream`]
//! (`error` field, `running` flag); nothing propagates across the
//! thread boundary.

use bytes::Bytes;
use opencv::core::{Mat, Point, Rect, Scalar, Size, Vector};
use opencv::videoio::{self, VideoCapture};
use opencv::{imgcodecs, imgproc, prelude::*};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::mjpeg::stream::DeviceStream;
use crate::mjpeg::types::{CameraStreamConfig, OverlaySource};

/// Back-off after a failed frame read.
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A live handle on one capture device. Exclusive to the loop thread.
pub trait FrameGrabber: Send {
    /// Acquire one frame. Transient failures return
    /// [`Error::FrameAcquisition`] and are retried by the loop.
    fn grab_frame(&mut self) -> Result<Mat>;
}

impl std::fmt::Debug for dyn FrameGrabber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FrameGrabber")
    }
}

/// Capture device factory, selected once at startup.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, config: &CameraStreamConfig) -> Result<Box<dyn FrameGrabber>>;
}

/// OpenCV-backed capture: index-based open for numeric locators,
/// path/URI-based otherwise.
pub struct OpencvBackend;

impl CaptureBackend for OpencvBackend {
    fn open(&self, config: &CameraStreamConfig) -> Result<Box<dyn FrameGrabber>> {
        let mut cap = match config.device_path.parse::<i32>() {
            Ok(index) => VideoCapture::new(index, videoio::CAP_ANY)?,
            Err(_) => VideoCapture::from_file(&config.device_path, videoio::CAP_ANY)?,
        };
        if !cap.is_opened()? {
            return Err(Error::DeviceOpen(format!(
                "cannot open capture device '{}'",
                config.device_path
            )));
        }

        // Hints only. Devices may silently clamp; we log what was
        // actually negotiated.
        cap.set(videoio::CAP_PROP_FRAME_WIDTH, config.capture_width as f64)?;
        cap.set(videoio::CAP_PROP_FRAME_HEIGHT, config.capture_height as f64)?;
        cap.set(videoio::CAP_PROP_FPS, config.target_fps)?;
        let actual_width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)?;
        let actual_height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)?;
        tracing::info!(
            camera_id = %config.camera_id,
            device = %config.device_path,
            requested = %format!("{}x{}", config.capture_width, config.capture_height),
            negotiated = %format!("{}x{}", actual_width, actual_height),
            "Opened capture device"
        );

        Ok(Box::new(OpencvGrabber { cap }))
    }
}

struct OpencvGrabber {
    cap: VideoCapture,
}

impl FrameGrabber for OpencvGrabber {
    fn grab_frame(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        let ok = self.cap.read(&mut frame)?;
        if !ok || frame.empty() {
            return Err(Error::FrameAcquisition("empty frame from device".to_string()));
        }
        Ok(frame)
    }
}

/// Synthetic backend producing a moving test pattern without touching
/// hardware. Used by tests and headless development. The sentinel
/// device path `"fail"` simulates an open failure for one camera while
/// others keep working.
pub struct TestPatternBackend {
    fail_open: bool,
}

impl TestPatternBackend {
    pub fn new() -> Self {
        Self { fail_open: false }
    }

    /// Backend whose `open` always fails, for device-fault tests.
    pub fn failing() -> Self {
        Self { fail_open: true }
    }
}

impl Default for TestPatternBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for TestPatternBackend {
    fn open(&self, config: &CameraStreamConfig) -> Result<Box<dyn FrameGrabber>> {
        if self.fail_open || config.device_path == "fail" {
            return Err(Error::DeviceOpen(format!(
                "simulated open failure for '{}'",
                config.device_path
            )));
        }
        Ok(Box::new(TestPatternGrabber {
            width: config.capture_width as i32,
            height: config.capture_height as i32,
            tick: 0,
        }))
    }
}

struct TestPatternGrabber {
    width: i32,
    height: i32,
    tick: u32,
}

impl FrameGrabber for TestPatternGrabber {
    fn grab_frame(&mut self) -> Result<Mat> {
        self.tick = self.tick.wrapping_add(1);
        let shade = ((self.tick * 8) % 200 + 30) as f64;
        let mut frame = Mat::new_rows_cols_with_default(
            self.height,
            self.width,
            opencv::core::CV_8UC3,
            Scalar::new(shade, 48.0, 32.0, 0.0),
        )?;
        // Moving block so consecutive frames differ.
        let block = 24.min(self.width / 4).max(1);
        let x = ((self.tick as i32 * 7) % (self.width - block).max(1)).max(0);
        imgproc::rectangle(
            &mut frame,
            Rect::new(x, self.height / 2 - block / 2, block, block),
            Scalar::new(255.0, 255.0, 255.0, 0.0),
            -1,
            imgproc::LINE_8,
            0,
        )?;
        Ok(frame)
    }
}

/// Run one camera's capture loop until `stop` is raised. Blocking;
/// always invoked on a dedicated thread.
pub fn capture_loop(stream: Arc<DeviceStream>, backend: Arc<dyn CaptureBackend>, stop: Arc<AtomicBool>) {
    let config = stream.config();
    let camera_id = config.camera_id.clone();

    let mut grabber = match backend.open(&config) {
        Ok(g) => g,
        Err(e) => {
            tracing::error!(camera_id = %camera_id, error = %e, "Capture device open failed");
            stream.set_error(e.to_string());
            stream.set_running(false);
            return;
        }
    };

    stream.set_running(true);
    tracing::info!(camera_id = %camera_id, "Capture loop started");

    while !stop.load(Ordering::SeqCst) {
        let loop_start = Instant::now();
        // Re-read each iteration: overlay changes apply live.
        let config = stream.config();

        let frame = match grabber.grab_frame() {
            Ok(f) => f,
            Err(e) => {
                stream.set_error(e.to_string());
                std::thread::sleep(READ_RETRY_DELAY);
                continue;
            }
        };

        match process_frame(frame, &config, &stream) {
            Ok(jpeg) => stream.record_frame(jpeg),
            Err(e) => {
                tracing::warn!(camera_id = %camera_id, error = %e, "Frame processing failed");
                stream.set_error(e.to_string());
            }
        }

        let budget = Duration::from_secs_f64(config.frame_interval());
        let elapsed = loop_start.elapsed();
        if elapsed < budget {
            std::thread::sleep(budget - elapsed);
        }
    }

    drop(grabber);
    stream.set_running(false);
    tracing::info!(camera_id = %camera_id, "Capture loop stopped");
}

/// Resize, overlay, encode one frame.
fn process_frame(frame: Mat, config: &CameraStreamConfig, stream: &DeviceStream) -> Result<Bytes> {
    let (out_w, out_h) = config.output_size();
    let mut frame = if frame.cols() != out_w as i32 || frame.rows() != out_h as i32 {
        let mut resized = Mat::default();
        imgproc::resize(
            &frame,
            &mut resized,
            Size::new(out_w as i32, out_h as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
        resized
    } else {
        frame
    };

    // Overlay draws after resize so coordinates match delivered frames.
    let left = overlay_text(config.overlay_left, config, &config.overlay_left_text, stream);
    if !left.is_empty() {
        draw_overlay(&mut frame, &left, config.overlay_scale, OverlayCorner::Left)?;
    }
    let right = overlay_text(
        config.overlay_right,
        config,
        &config.overlay_right_text,
        stream,
    );
    if !right.is_empty() {
        draw_overlay(&mut frame, &right, config.overlay_scale, OverlayCorner::Right)?;
    }

    let mut buf = Vector::<u8>::new();
    let params = Vector::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, config.jpeg_quality]);
    imgcodecs::imencode(".jpg", &frame, &mut buf, &params)?;
    Ok(Bytes::from(buf.to_vec()))
}

/// Resolve one overlay slot to the string to draw.
fn overlay_text(
    source: OverlaySource,
    config: &CameraStreamConfig,
    custom: &str,
    stream: &DeviceStream,
) -> String {
    match source {
        OverlaySource::Disabled => String::new(),
        OverlaySource::CameraName => config.display_name.clone(),
        OverlaySource::Timestamp => chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        OverlaySource::Custom => custom.to_string(),
        OverlaySource::CaptureInfo => {
            let (w, h) = config.output_size();
            format!("{}x{} @ {:.1}fps", w, h, stream.status().real_fps)
        }
    }
}

enum OverlayCorner {
    Left,
    Right,
}

const OVERLAY_FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;
const OVERLAY_MARGIN: i32 = 8;

/// Draw one overlay string with an opaque backing rectangle.
///
/// Font scale follows frame height (baseline 720p) times the 1-10
/// slider; text wider than the frame is ellipsized.
fn draw_overlay(frame: &mut Mat, text: &str, scale_slider: u32, corner: OverlayCorner) -> Result<()> {
    let width = frame.cols();
    let height = frame.rows();
    let font_scale = (height as f64 / 720.0) * (scale_slider.clamp(1, 10) as f64 / 5.0) * 0.7;
    let font_scale = font_scale.max(0.3);
    let thickness = if font_scale > 0.8 { 2 } else { 1 };

    let max_width = width - 2 * OVERLAY_MARGIN;
    let text = fit_text(text, font_scale, thickness, max_width)?;
    let mut baseline = 0;
    let size = imgproc::get_text_size(&text, OVERLAY_FONT, font_scale, thickness, &mut baseline)?;

    let x = match corner {
        OverlayCorner::Left => OVERLAY_MARGIN,
        OverlayCorner::Right => (width - size.width - OVERLAY_MARGIN).max(OVERLAY_MARGIN),
    };
    let y = height - OVERLAY_MARGIN - baseline;

    imgproc::rectangle(
        frame,
        Rect::new(
            x - 4,
            y - size.height - 4,
            size.width + 8,
            size.height + baseline + 8,
        ),
        Scalar::new(0.0, 0.0, 0.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::put_text(
        frame,
        &text,
        Point::new(x, y),
        OVERLAY_FONT,
        font_scale,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        thickness,
        imgproc::LINE_AA,
        false,
    )?;
    Ok(())
}

/// Ellipsize `text` so its rendered width fits `max_width`.
fn fit_text(text: &str, font_scale: f64, thickness: i32, max_width: i32) -> Result<String> {
    let mut baseline = 0;
    let size = imgproc::get_text_size(text, OVERLAY_FONT, font_scale, thickness, &mut baseline)?;
    if size.width <= max_width {
        return Ok(text.to_string());
    }
    let mut truncated = text.to_string();
    while truncated.pop().is_some() {
        let candidate = format!("{}...", truncated);
        let size =
            imgproc::get_text_size(&candidate, OVERLAY_FONT, font_scale, thickness, &mut baseline)?;
        if size.width <= max_width {
            return Ok(candidate);
        }
    }
    Ok("...".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mjpeg::types::CameraStreamConfig;

    fn config() -> CameraStreamConfig {
        CameraStreamConfig {
            camera_id: "t1".to_string(),
            display_name: "Test Cam".to_string(),
            device_path: "0".to_string(),
            capture_width: 320,
            capture_height: 240,
            target_fps: 30.0,
            jpeg_quality: 80,
            output_width: 0,
            output_height: 0,
            mjpeg_port: 9100,
            auth_enabled: false,
            overlay_left: OverlaySource::CameraName,
            overlay_right: OverlaySource::Timestamp,
            overlay_left_text: String::new(),
            overlay_right_text: String::new(),
            overlay_scale: 5,
        }
    }

    #[test]
    fn test_pattern_backend_produces_jpeg_frames() {
        let config = config();
        let stream = DeviceStream::new(config.clone());
        let mut grabber = TestPatternBackend::new().open(&config).unwrap();
        let frame = grabber.grab_frame().unwrap();
        let jpeg = process_frame(frame, &config, &stream).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn test_consecutive_pattern_frames_differ() {
        let config = config();
        let mut grabber = TestPatternBackend::new().open(&config).unwrap();
        let stream = DeviceStream::new(config.clone());
        let a = process_frame(grabber.grab_frame().unwrap(), &config, &stream).unwrap();
        let b = process_frame(grabber.grab_frame().unwrap(), &config, &stream).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_failing_backend_reports_device_open() {
        let err = TestPatternBackend::failing().open(&config()).unwrap_err();
        assert!(matches!(err, Error::DeviceOpen(_)));
    }

    #[test]
    fn test_fit_text_ellipsizes_overflow() {
        let long = "a very long overlay string that cannot possibly fit".repeat(4);
        let fitted = fit_text(&long, 0.7, 1, 200).unwrap();
        assert!(fitted.ends_with("..."));
        assert!(fitted.len() < long.len());
    }

    #[test]
    fn test_overlay_text_sources() {
        let config = config();
        let stream = DeviceStream::new(config.clone());
        assert_eq!(
            overlay_text(OverlaySource::Disabled, &config, "x", &stream),
            ""
        );
        assert_eq!(
            overlay_text(OverlaySource::CameraName, &config, "x", &stream),
            "Test Cam"
        );
        assert_eq!(
            overlay_text(OverlaySource::Custom, &config, "hello", &stream),
            "hello"
        );
        let info = overlay_text(OverlaySource::CaptureInfo, &config, "", &stream);
        assert!(info.starts_with("320x240 @ "));
    }

    #[test]
    fn test_capture_loop_runs_and_stops() {
        let stream = Arc::new(DeviceStream::new(config()));
        let backend: Arc<dyn CaptureBackend> = Arc::new(TestPatternBackend::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let (stream, backend, stop) = (stream.clone(), backend.clone(), stop.clone());
            std::thread::spawn(move || capture_loop(stream, backend, stop))
        };
        std::thread::sleep(Duration::from_millis(300));
        assert!(stream.is_running());
        assert!(stream.frame_count() > 0);
        assert_eq!(&stream.last_frame().unwrap()[..2], &[0xff, 0xd8]);

        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(!stream.is_running());
    }

    #[test]
    fn test_open_failure_sets_error_not_panic() {
        let stream = Arc::new(DeviceStream::new(config()));
        let backend: Arc<dyn CaptureBackend> = Arc::new(TestPatternBackend::failing());
        let stop = Arc::new(AtomicBool::new(false));
        capture_loop(stream.clone(), backend, stop);
        assert!(!stream.is_running());
        assert!(stream.error().unwrap().contains("simulated open failure"));
    }
}
