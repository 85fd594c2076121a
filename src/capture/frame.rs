use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One preview delivery, owned by whichever stage is processing it
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Copied out of the driver's buffer, so it outlives buffer recycling
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            meta: Arc::new(FrameMetadata {
                sequence: 0,
                width,
                height,
                stride: width,
                format,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Pixels per row including padding; at least `width`
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats we can pull a luminance plane from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Y plane then interleaved VU
    Nv21,
    /// Y plane then interleaved UV
    Nv12,
    /// Y, U and V planes
    Yuv420p,
    /// Packed Y0 U Y1 V
    Yuyv,
    Gray8,
    Rgb24,
    Mjpeg,
}

impl PixelFormat {
    /// Whether the luminance plane sits at the start of the buffer
    pub fn has_leading_luma_plane(self) -> bool {
        matches!(self, Self::Nv21 | Self::Nv12 | Self::Yuv420p | Self::Gray8)
    }
}
