//! # meshcall Media
//!
//! Local media sources for meshcall: microphone capture, the synthetic
//! placeholder video source, screen capture, and the switching of the
//! current video source across every peer connection's video sender.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod blank_video;
pub mod device_capture;
pub mod error;
pub mod source_manager;
pub mod tracks;

// Re-export main types
pub use blank_video::{BlankVideoConfig, BlankVideoSourceFactory, SyntheticBlankVideo};
pub use device_capture::{CaptureCapability, DeviceCapture, MockDeviceCapture};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use source_manager::{MediaSourceManager, VideoSenders};
pub use tracks::{VideoFrame, VideoResolution};
