use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::v4l2::pixel_format;
use crate::capture::PixelFormat;

/// Formats in order of preference; planar luma first since it needs no conversion
const FORMAT_PREFERENCE: [PixelFormat; 7] = [
    PixelFormat::Gray8,
    PixelFormat::Nv12,
    PixelFormat::Nv21,
    PixelFormat::Yuv420p,
    PixelFormat::Yuyv,
    PixelFormat::Mjpeg,
    PixelFormat::Rgb24,
];

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Best supported pixel format of a capture device, if it is one
pub fn probe_device(path: &str) -> Result<FoundDevice> {
    let dev = Device::with_path(path)?;
    let caps = dev.query_caps()?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Err(eyre!("{path} is not a capture device"));
    }

    let offered: Vec<PixelFormat> = dev
        .enum_formats()?
        .into_iter()
        .filter_map(|desc| pixel_format(desc.fourcc))
        .collect();
    debug!(path, ?offered, "Probed formats");

    let format = best_format(&offered)
        .ok_or_else(|| eyre!("{path} offers no format with a luminance plane"))?;
    info!("Found {:?} device: {} - {}", format, path, caps.card);
    Ok(FoundDevice::new(path.to_string(), format))
}

/// Auto-detect best capture device
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }
        match probe_device(&path) {
            Ok(found) => return Ok(found),
            Err(e) => debug!("Skipping {path}: {e}"),
        }
    }

    Err(eyre!("No suitable capture device found"))
}

fn best_format(offered: &[PixelFormat]) -> Option<PixelFormat> {
    FORMAT_PREFERENCE
        .into_iter()
        .find(|format| offered.contains(format))
}
