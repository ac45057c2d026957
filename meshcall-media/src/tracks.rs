//! Frame and resolution types for synthetic sources

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Video resolution information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoResolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl VideoResolution {
    /// Create a resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Quarter-QVGA, the placeholder default
    pub const QQVGA: Self = Self::new(160, 120);
    /// VGA
    pub const VGA: Self = Self::new(640, 480);

    /// Number of pixels in one frame
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }

    /// Size in bytes of one I420 frame at this resolution
    pub fn i420_frame_size(&self) -> usize {
        let luma = self.pixel_count() as usize;
        let chroma_w = (self.width as usize).div_ceil(2);
        let chroma_h = (self.height as usize).div_ceil(2);
        luma + 2 * chroma_w * chroma_h
    }
}

/// Raw I420 video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Planar Y, U, V data
    pub data: Bytes,
    /// Timestamp in milliseconds
    pub timestamp: u64,
    /// Whether this is a keyframe
    pub is_keyframe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_frame_size() {
        assert_eq!(VideoResolution::QQVGA.i420_frame_size(), 160 * 120 * 3 / 2);
        // odd sizes round chroma planes up
        assert_eq!(VideoResolution::new(3, 3).i420_frame_size(), 9 + 2 * 4);
    }
}
