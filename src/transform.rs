//! Rotation and mirroring of single-channel luminance planes
//!
//! Every transform produces a fresh buffer. Preview buffers belong to the
//! capture layer and may be recycled as soon as the frame callback returns,
//! so nothing here mutates or aliases its input.

use std::time::Instant;

use crate::error::{ScanError, ScanResult};
use crate::geometry::{Orientation, Resolution};

/// Owned luminance plane, one byte per pixel, rows packed without padding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl LumaBuffer {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> ScanResult<Self> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(ScanError::Frame(format!(
                "luminance plane of {} bytes does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Copy the leading luminance plane out of a larger buffer (e.g. the Y
    /// plane of NV21); trailing chroma bytes are ignored
    pub fn from_plane(plane: &[u8], width: u32, height: u32) -> ScanResult<Self> {
        let len = width as usize * height as usize;
        let Some(luma) = plane.get(..len) else {
            return Err(ScanError::Frame(format!(
                "buffer of {} bytes is too short for a {}x{} plane",
                plane.len(),
                width,
                height
            )));
        };
        Self::new(luma.to_vec(), width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// 90° clockwise; width and height swap
    pub fn rotate90(&self) -> LumaBuffer {
        let (data, width, height) = rotate_plane(&self.data, self.width, self.height);
        LumaBuffer {
            data,
            width,
            height,
        }
    }

    pub fn rotate180(&self) -> LumaBuffer {
        let mut data = self.data.clone();
        data.reverse();
        LumaBuffer {
            data,
            width: self.width,
            height: self.height,
        }
    }

    pub fn rotate270(&self) -> LumaBuffer {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut rotated = vec![0u8; self.data.len()];
        // (x, y) -> (y, w - x - 1) in a buffer h pixels wide
        for y in 0..h {
            let row = &self.data[y * w..(y + 1) * w];
            for (x, &value) in row.iter().enumerate() {
                rotated[(w - x - 1) * h + y] = value;
            }
        }
        LumaBuffer {
            data: rotated,
            width: self.height,
            height: self.width,
        }
    }

    pub fn rotate(&self, orientation: Orientation) -> LumaBuffer {
        let start = Instant::now();
        let rotated = match orientation {
            Orientation::Deg0 => self.clone(),
            Orientation::Deg90 => self.rotate90(),
            Orientation::Deg180 => self.rotate180(),
            Orientation::Deg270 => self.rotate270(),
        };
        metrics::histogram!("frame_transform_us").record(start.elapsed().as_micros() as f64);
        rotated
    }

    /// Per-pixel remap with unchanged dimensions
    pub fn map_pixels(&self, f: impl Fn(u8) -> u8) -> LumaBuffer {
        LumaBuffer {
            data: self.data.iter().map(|&value| f(value)).collect(),
            width: self.width,
            height: self.height,
        }
    }

    /// Left-right flip, for optics that deliver a mirrored image
    pub fn mirror_horizontal(&self) -> LumaBuffer {
        let mut data = self.data.clone();
        for row in data.chunks_exact_mut(self.width as usize) {
            row.reverse();
        }
        LumaBuffer {
            data,
            width: self.width,
            height: self.height,
        }
    }
}

/// Rotate a packed `width` x `height` plane 90° clockwise.
///
/// Source pixel `(x, y)` lands at `(new_width - y - 1, x)` where
/// `new_width == height`. Only the first `width * height` bytes are read;
/// a shorter plane is an error.
pub fn rotate90(plane: &[u8], width: u32, height: u32) -> ScanResult<(Vec<u8>, u32, u32)> {
    let len = width as usize * height as usize;
    if plane.len() < len {
        return Err(ScanError::Frame(format!(
            "buffer of {} bytes is too short to rotate a {}x{} plane",
            plane.len(),
            width,
            height
        )));
    }
    Ok(rotate_plane(plane, width, height))
}

/// Caller guarantees `plane.len() >= width * height`
fn rotate_plane(plane: &[u8], width: u32, height: u32) -> (Vec<u8>, u32, u32) {
    let w = width as usize;
    let h = height as usize;
    let mut rotated = vec![0u8; w * h];
    for y in 0..h {
        let row = &plane[y * w..(y + 1) * w];
        for (x, &value) in row.iter().enumerate() {
            rotated[x * h + h - y - 1] = value;
        }
    }
    (rotated, height, width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> LumaBuffer {
        // 3x2
        // 1 2 3
        // 4 5 6
        LumaBuffer::new(vec![1, 2, 3, 4, 5, 6], 3, 2).unwrap()
    }

    #[test]
    fn test_rotate90_clockwise_layout() {
        let rotated = sample().rotate90();
        assert_eq!((rotated.width(), rotated.height()), (2, 3));
        // 4 1
        // 5 2
        // 6 3
        assert_eq!(rotated.data(), &[4, 1, 5, 2, 6, 3]);
    }

    #[test]
    fn test_rotate270_is_inverse_of_rotate90() {
        let buffer = sample();
        assert_eq!(buffer.rotate90().rotate270(), buffer);
        assert_eq!(buffer.rotate270().data(), &[3, 6, 2, 5, 1, 4]);
    }

    #[test]
    fn test_rotate180_matches_two_quarter_turns() {
        let buffer = sample();
        assert_eq!(buffer.rotate180(), buffer.rotate90().rotate90());
    }

    #[test]
    fn test_mirror_horizontal() {
        let mirrored = sample().mirror_horizontal();
        assert_eq!(mirrored.data(), &[3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_from_plane_ignores_chroma() {
        // 2x2 luma followed by NV21 interleaved VU
        let nv21 = [10, 20, 30, 40, 128, 128];
        let luma = LumaBuffer::from_plane(&nv21, 2, 2).unwrap();
        assert_eq!(luma.data(), &[10, 20, 30, 40]);
        assert!(LumaBuffer::from_plane(&nv21[..3], 2, 2).is_err());
    }

    #[test]
    fn test_rotate_leaves_source_untouched() {
        let source = vec![1u8, 2, 3, 4, 5, 6];
        let (rotated, w, h) = rotate90(&source, 3, 2).unwrap();
        assert_eq!(source, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!((w, h), (2, 3));
        assert_eq!(rotated.len(), 6);
    }

    #[test]
    fn test_short_plane_is_rejected() {
        assert!(matches!(
            rotate90(&[1, 2, 3, 4, 5], 3, 2),
            Err(ScanError::Frame(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_four_quarter_turns_round_trip(
            (width, height, data) in (1u32..24, 1u32..24).prop_flat_map(|(w, h)| {
                (Just(w), Just(h), proptest::collection::vec(any::<u8>(), (w * h) as usize))
            })
        ) {
            let original = LumaBuffer::new(data, width, height).unwrap();
            let turned = original.rotate90().rotate90().rotate90().rotate90();
            prop_assert_eq!(turned, original);
        }

        #[test]
        fn prop_rotate_by_orientation_matches_quarter_turns(
            (width, height, data) in (1u32..12, 1u32..12).prop_flat_map(|(w, h)| {
                (Just(w), Just(h), proptest::collection::vec(any::<u8>(), (w * h) as usize))
            }),
            turns in 0u32..4
        ) {
            let original = LumaBuffer::new(data, width, height).unwrap();
            let orientation = Orientation::from_degrees(turns as i32 * 90).unwrap();
            let mut expected = original.clone();
            for _ in 0..turns {
                expected = expected.rotate90();
            }
            prop_assert_eq!(original.rotate(orientation), expected);
        }
    }
}
