//! Internal MJPEG capture and serving
//!
//! One pipeline per camera: a dedicated capture thread pulls frames
//! from the device, encodes JPEG, and fans out through a bounded
//! drop-oldest bus to a dedicated per-camera HTTP listener. The
//! supervisor owns the registry and serializes lifecycle operations.

pub mod capture;
pub mod frame_bus;
pub mod http_server;
pub mod stream;
pub mod supervisor;
pub mod types;

pub use capture::{CaptureBackend, OpencvBackend, TestPatternBackend};
pub use frame_bus::FrameBus;
pub use stream::DeviceStream;
pub use supervisor::MjpegSupervisor;
pub use types::{CameraStatus, CameraStreamConfig, CameraUpdate, OverlaySource};
