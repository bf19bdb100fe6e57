//! RTSP streaming via external encoder processes
//!
//! Each camera with RTSP enabled gets one supervised ffmpeg process
//! pushing to a local relay (MediaMTX). The command builder is a pure
//! config-to-argv translation; the supervisor owns process lifecycle
//! and lazy liveness reconciliation.

pub mod command;
pub mod process;
pub mod relay;
pub mod supervisor;
pub mod types;

pub use command::{EncoderCommandBuilder, EncoderInvocation, PlatformBackend};
pub use process::ProcessHandle;
pub use relay::RelayMonitor;
pub use supervisor::RtspSupervisor;
pub use types::{AudioConfig, RtspStreamConfig, RtspStreamStatus};
