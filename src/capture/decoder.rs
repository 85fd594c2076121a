use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use super::frame::{PixelFormat, RawFrame};
use crate::error::{ScanError, ScanResult};
use crate::luminance::luma_from_rgb;
use crate::transform::LumaBuffer;

/// Extract the single-channel luminance plane of a preview frame.
///
/// Chroma is discarded; only luminance takes part in decoding.
pub fn luminance_plane(frame: &RawFrame) -> ScanResult<LumaBuffer> {
    let width = frame.width();
    let height = frame.height();
    if width == 0 || height == 0 {
        return Err(ScanError::Frame(format!("empty frame {}x{}", width, height)));
    }
    let stride = frame.meta.stride.max(width) as usize;
    let data = &frame.data[..];

    match frame.format() {
        format if format.has_leading_luma_plane() => {
            if stride == width as usize {
                return LumaBuffer::from_plane(data, width, height);
            }
            let rows = packed_rows(data, stride, width as usize, height as usize, 1)?;
            LumaBuffer::new(rows.concat(), width, height)
        }
        PixelFormat::Yuyv => {
            let rows = packed_rows(data, stride * 2, width as usize * 2, height as usize, 2)?;
            let luma = rows
                .iter()
                .flat_map(|row| row.iter().step_by(2).copied())
                .collect();
            LumaBuffer::new(luma, width, height)
        }
        PixelFormat::Rgb24 => {
            let rows = packed_rows(data, stride * 3, width as usize * 3, height as usize, 3)?;
            let luma = rows
                .iter()
                .flat_map(|row| row.chunks_exact(3).map(|px| luma_from_rgb(px[0], px[1], px[2])))
                .collect();
            LumaBuffer::new(luma, width, height)
        }
        PixelFormat::Mjpeg => decode_mjpeg(data),
        other => Err(ScanError::Frame(format!("no luminance plane in {other:?}"))),
    }
}

/// Row slices of a packed image, `row_bytes` wide, `pitch` bytes apart
fn packed_rows(
    data: &[u8],
    pitch: usize,
    row_bytes: usize,
    height: usize,
    bytes_per_pixel: usize,
) -> ScanResult<Vec<&[u8]>> {
    let needed = pitch * (height - 1) + row_bytes;
    if data.len() < needed {
        return Err(ScanError::Frame(format!(
            "buffer of {} bytes is too short for {} rows of {} pixels",
            data.len(),
            height,
            row_bytes / bytes_per_pixel
        )));
    }
    Ok((0..height)
        .map(|row| &data[row * pitch..row * pitch + row_bytes])
        .collect())
}

fn decode_mjpeg(data: &[u8]) -> ScanResult<LumaBuffer> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| ScanError::Frame(format!("MJPEG decode failed: {e}")))?;
    let info = decoder
        .info()
        .ok_or_else(|| ScanError::Frame("MJPEG frame without header".into()))?;
    let (width, height) = (info.width as u32, info.height as u32);

    match info.pixel_format {
        JpegPixelFormat::L8 => LumaBuffer::new(pixels, width, height),
        JpegPixelFormat::RGB24 => {
            let luma = pixels
                .chunks_exact(3)
                .map(|px| luma_from_rgb(px[0], px[1], px[2]))
                .collect();
            LumaBuffer::new(luma, width, height)
        }
        other => Err(ScanError::Frame(format!(
            "unsupported MJPEG pixel format {other:?}"
        ))),
    }
}
