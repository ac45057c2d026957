//! Synthetic placeholder video
//!
//! Every peer connection always sends *some* video so the video transceiver
//! stays negotiated and screen sharing can be toggled with a plain track
//! replacement. When nothing is shared, that video is a black, very low
//! resolution, very low frame-rate placeholder.

use crate::error::{MediaError, MediaResult};
use crate::tracks::{VideoFrame, VideoResolution};
use bytes::Bytes;
use meshcall_core::{MediaTrack, TrackKind, TrackSource};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Parameters of the placeholder source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlankVideoConfig {
    /// Frame size
    pub resolution: VideoResolution,
    /// Frames per second
    pub framerate: f64,
}

impl Default for BlankVideoConfig {
    fn default() -> Self {
        Self {
            resolution: VideoResolution::QQVGA,
            framerate: 1.0,
        }
    }
}

impl BlankVideoConfig {
    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "Invalid blank video resolution".to_string(),
            });
        }
        if self.framerate <= 0.0 || self.framerate > 30.0 {
            return Err(MediaError::InvalidConfiguration {
                message: format!("Invalid blank video framerate {}", self.framerate),
            });
        }
        Ok(())
    }
}

/// Produces the placeholder video track
pub trait BlankVideoSourceFactory: Send + Sync {
    /// Build a fresh placeholder track
    fn create_blank_track(&self) -> MediaResult<MediaTrack>;
}

/// Default placeholder source: solid black I420 frames
#[derive(Debug, Clone, Default)]
pub struct SyntheticBlankVideo {
    config: BlankVideoConfig,
}

impl SyntheticBlankVideo {
    /// Create a placeholder source with `config`
    pub fn new(config: BlankVideoConfig) -> MediaResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Source configuration
    pub fn config(&self) -> &BlankVideoConfig {
        &self.config
    }

    /// One black frame (full-range Y = 0, U = V = 128)
    pub fn black_frame(&self) -> VideoFrame {
        let resolution = self.config.resolution;
        let luma = resolution.pixel_count() as usize;
        let total = resolution.i420_frame_size();
        let mut data = vec![128u8; total];
        data[..luma].fill(0);

        VideoFrame {
            width: resolution.width,
            height: resolution.height,
            data: Bytes::from(data),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            is_keyframe: true,
        }
    }
}

impl BlankVideoSourceFactory for SyntheticBlankVideo {
    fn create_blank_track(&self) -> MediaResult<MediaTrack> {
        let resolution = self.config.resolution;
        Ok(MediaTrack::new(
            TrackKind::Video,
            TrackSource::BlankVideo,
            format!(
                "blank {}x{}@{}",
                resolution.width, resolution.height, self.config.framerate
            ),
        ))
    }
}
