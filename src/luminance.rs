//! Cropped luminance views and the small pixel helpers decode engines need

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::geometry::{Rect, Resolution};
use crate::transform::LumaBuffer;

/// Thumbnails keep every other pixel in each direction
const THUMBNAIL_SCALE_FACTOR: u32 = 2;
const THUMBNAIL_JPEG_QUALITY: u8 = 50;

/// Borrowed window onto a luminance plane.
///
/// Engines see the crop as a standalone image: coordinates passed to
/// [`LuminanceView::pixel`] are relative to the crop's top-left corner.
#[derive(Debug, Clone, Copy)]
pub struct LuminanceView<'a> {
    buffer: &'a LumaBuffer,
    crop: Rect,
}

impl<'a> LuminanceView<'a> {
    /// Whole-buffer view, used for still images which have no framing rect
    pub fn full(buffer: &'a LumaBuffer) -> Self {
        Self {
            buffer,
            crop: Rect::bounds(buffer.width(), buffer.height()),
        }
    }

    /// View restricted to `crop`, clipped to the buffer. A crop that is empty
    /// or lies entirely outside the buffer is rejected.
    pub fn cropped(buffer: &'a LumaBuffer, crop: Rect) -> ScanResult<Self> {
        if crop.is_degenerate() {
            return Err(ScanError::DegenerateGeometry(crop));
        }
        let crop = Rect::bounds(buffer.width(), buffer.height())
            .intersect(&crop)
            .ok_or(ScanError::DegenerateGeometry(crop))?;
        Ok(Self { buffer, crop })
    }

    pub fn width(&self) -> u32 {
        self.crop.width() as u32
    }

    pub fn height(&self) -> u32 {
        self.crop.height() as u32
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Crop rectangle in buffer coordinates
    pub fn crop(&self) -> Rect {
        self.crop
    }

    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.buffer
            .pixel(self.crop.left as u32 + x, self.crop.top as u32 + y)
    }

    pub fn row(&self, y: u32) -> &'a [u8] {
        let stride = self.buffer.width() as usize;
        let start = (self.crop.top as usize + y as usize) * stride + self.crop.left as usize;
        &self.buffer.data()[start..start + self.width() as usize]
    }

    /// Packed copy of the cropped pixels
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width() as usize * self.height() as usize);
        for y in 0..self.height() {
            out.extend_from_slice(self.row(y));
        }
        out
    }

    /// Packed copy of the cropped pixels as an owned buffer
    pub fn to_buffer(&self) -> ScanResult<LumaBuffer> {
        LumaBuffer::new(self.to_vec(), self.width(), self.height())
    }
}

/// Downscaled greyscale snapshot of the region that produced a result
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    /// JPEG-compressed greyscale image
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Thumbnail pixels per source pixel
    pub scale_factor: f32,
}

/// Render and compress a half-resolution thumbnail of `view`
pub fn render_thumbnail(view: &LuminanceView<'_>) -> ScanResult<Thumbnail> {
    let width = (view.width() / THUMBNAIL_SCALE_FACTOR).max(1);
    let height = (view.height() / THUMBNAIL_SCALE_FACTOR).max(1);

    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let row = view.row((y * THUMBNAIL_SCALE_FACTOR).min(view.height() - 1));
        for x in 0..width {
            pixels.push(row[((x * THUMBNAIL_SCALE_FACTOR) as usize).min(row.len() - 1)]);
        }
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, THUMBNAIL_JPEG_QUALITY).encode(
        &pixels,
        width,
        height,
        ExtendedColorType::L8,
    )?;

    Ok(Thumbnail {
        jpeg,
        width,
        height,
        scale_factor: width as f32 / view.width() as f32,
    })
}

/// Collapse an RGBA image to one byte per pixel.
///
/// Takes the blue sample, falling back to green and then red when the
/// preceding channel is zero. This approximates luminance for the mostly
/// black-on-white symbols found in stills without a weighted conversion.
pub fn luma_from_rgba(image: &RgbaImage) -> ScanResult<LumaBuffer> {
    let data = image
        .pixels()
        .map(|pixel| {
            let [red, green, blue, _] = pixel.0;
            if blue != 0 {
                blue
            } else if green != 0 {
                green
            } else {
                red
            }
        })
        .collect();
    LumaBuffer::new(data, image.width(), image.height())
}

/// BT.601 studio-swing luma from 8-bit RGB
pub fn luma_from_rgb(red: u8, green: u8, blue: u8) -> u8 {
    let y = ((66 * red as i32 + 129 * green as i32 + 25 * blue as i32 + 128) >> 8) + 16;
    y.clamp(0, 255) as u8
}

/// Brightness/contrast/gamma correction applied before decoding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneAdjust {
    /// -255..=255; negative darkens
    pub brightness: i32,
    /// -100..=100; 0 is neutral
    pub contrast: i32,
    /// 0.1..=5.0; 1.0 is neutral
    pub gamma: f32,
}

impl Default for ToneAdjust {
    fn default() -> Self {
        Self {
            brightness: 0,
            contrast: 0,
            gamma: 1.0,
        }
    }
}

impl ToneAdjust {
    pub fn is_identity(&self) -> bool {
        self.brightness == 0 && self.contrast == 0 && (self.gamma - 1.0).abs() < f32::EPSILON
    }

    /// Combined lookup table: brightness/contrast first, then gamma
    pub fn table(&self) -> ToneTable {
        let light = ToneTable::brightness_contrast(self.brightness, self.contrast);
        match ToneTable::gamma(self.gamma) {
            Some(gamma) => light.then(&gamma),
            None => light,
        }
    }
}

/// 256-entry intensity remapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneTable([u8; 256]);

impl ToneTable {
    pub fn identity() -> Self {
        let mut table = [0u8; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = i as u8;
        }
        Self(table)
    }

    pub fn brightness_contrast(brightness: i32, contrast: i32) -> Self {
        let brightness = brightness.clamp(-255, 255) as f32 + 128.0;
        let contrast = (100 + contrast.clamp(-100, 100)) as f32 / 100.0;
        let mut table = [0u8; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let value = (i as f32 - 128.0) * contrast + brightness + 0.5;
            *entry = (value as i32).clamp(0, 255) as u8;
        }
        Self(table)
    }

    /// `None` for a non-positive gamma
    pub fn gamma(gamma: f32) -> Option<Self> {
        if gamma <= 0.0 {
            return None;
        }
        let inverse = 1.0 / gamma as f64;
        let max = 255f64.powf(inverse) / 255.0;
        let mut table = [0u8; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = ((i as f64).powf(inverse) / max).clamp(0.0, 255.0) as u8;
        }
        Some(Self(table))
    }

    /// Table equivalent to applying `self` then `next`
    pub fn then(&self, next: &ToneTable) -> ToneTable {
        let mut table = [0u8; 256];
        for (entry, &value) in table.iter_mut().zip(self.0.iter()) {
            *entry = next.0[value as usize];
        }
        ToneTable(table)
    }

    pub fn map(&self, value: u8) -> u8 {
        self.0[value as usize]
    }

    pub fn apply(&self, buffer: &LumaBuffer) -> LumaBuffer {
        buffer.map_pixels(|value| self.map(value))
    }
}
