//! Scan window in screen space and its mapping into preview-buffer space

use tracing::debug;

use crate::geometry::{Rect, Resolution};

pub const MIN_FRAME_WIDTH: u32 = 240;
pub const MIN_FRAME_HEIGHT: u32 = 240;
/// 5/8 of 1920
pub const MAX_FRAME_WIDTH: u32 = 1200;
/// 5/8 of 1080
pub const MAX_FRAME_HEIGHT: u32 = 675;

/// Centred window covering 5/8 of each screen dimension within hard bounds
pub fn compute_framing_rect(screen: Resolution) -> Rect {
    let width = desired_dimension(screen.width, MIN_FRAME_WIDTH, MAX_FRAME_WIDTH);
    let height = desired_dimension(screen.height, MIN_FRAME_HEIGHT, MAX_FRAME_HEIGHT);
    let rect = Rect::centered(screen, width, height);
    debug!(%rect, "Calculated framing rect");
    rect
}

/// Centred window of a caller-chosen size, shrunk to fit the screen
pub fn manual_framing_rect(screen: Resolution, width: u32, height: u32) -> Rect {
    let rect = Rect::centered(screen, width.min(screen.width), height.min(screen.height));
    debug!(%rect, "Calculated manual framing rect");
    rect
}

fn desired_dimension(resolution: u32, hard_min: u32, hard_max: u32) -> u32 {
    (5 * resolution / 8).clamp(hard_min, hard_max)
}

/// Inputs that fully determine the preview-space rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramingInputs {
    pub framing: Rect,
    pub camera: Resolution,
    pub screen: Resolution,
    pub portrait: bool,
}

/// Map a screen-space rect into preview-buffer coordinates.
///
/// In portrait the sensor's long axis runs along the screen's vertical axis,
/// so horizontal edges scale by camera height over screen width and
/// vertical edges by camera width over screen height. The result is in the
/// coordinates of the buffer after it has been rotated upright. A zero-sized
/// screen yields an empty rect.
pub fn compute_framing_rect_in_preview(inputs: &FramingInputs) -> Rect {
    let FramingInputs {
        framing,
        camera,
        screen,
        portrait,
    } = *inputs;
    if screen.is_empty() {
        return Rect::default();
    }

    let (x_num, y_num) = if portrait {
        (camera.height, camera.width)
    } else {
        (camera.width, camera.height)
    };
    let scale_x = |v: i32| (v as i64 * x_num as i64 / screen.width as i64) as i32;
    let scale_y = |v: i32| (v as i64 * y_num as i64 / screen.height as i64) as i32;

    Rect::new(
        scale_x(framing.left),
        scale_y(framing.top),
        scale_x(framing.right),
        scale_y(framing.bottom),
    )
}

/// Memoized preview-space rect, recomputed whenever any input changes
#[derive(Debug, Clone, Default)]
pub struct PreviewRectCache {
    entry: Option<(FramingInputs, Rect)>,
}

impl PreviewRectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, inputs: FramingInputs) -> Rect {
        match self.entry {
            Some((cached, rect)) if cached == inputs => rect,
            _ => {
                let rect = compute_framing_rect_in_preview(&inputs);
                debug!(%rect, "Calculated framing rect in preview");
                self.entry = Some((inputs, rect));
                rect
            }
        }
    }

    /// Cached rect, only if it was derived from exactly these inputs
    pub fn peek(&self, inputs: &FramingInputs) -> Option<Rect> {
        self.entry
            .filter(|(cached, _)| cached == inputs)
            .map(|(_, rect)| rect)
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_rect_is_clamped_and_centred() {
        // 5/8 of 1080x1920 is 675x1200, clamped to 675x675
        let rect = compute_framing_rect(Resolution::new(1080, 1920));
        assert_eq!((rect.width(), rect.height()), (675, 675));
        assert_eq!(rect, Rect::new(202, 622, 877, 1297));

        // Small screens get the hard minimum
        let rect = compute_framing_rect(Resolution::new(320, 240));
        assert_eq!((rect.width(), rect.height()), (240, 240));
    }

    #[test]
    fn test_manual_rect_fits_screen() {
        let rect = manual_framing_rect(Resolution::new(800, 600), 1000, 300);
        assert_eq!(rect, Rect::new(0, 150, 800, 450));
    }

    #[test]
    fn test_portrait_mapping_swaps_axes() {
        let inputs = FramingInputs {
            framing: Rect::new(202, 622, 877, 1297),
            camera: Resolution::new(1280, 720),
            screen: Resolution::new(1080, 1920),
            portrait: true,
        };
        // x scales by 720/1080, y by 1280/1920
        assert_eq!(
            compute_framing_rect_in_preview(&inputs),
            Rect::new(134, 414, 584, 864)
        );
    }

    #[test]
    fn test_landscape_mapping_is_straight() {
        let inputs = FramingInputs {
            framing: Rect::new(100, 50, 700, 550),
            camera: Resolution::new(1600, 1200),
            screen: Resolution::new(800, 600),
            portrait: false,
        };
        assert_eq!(
            compute_framing_rect_in_preview(&inputs),
            Rect::new(200, 100, 1400, 1100)
        );
    }

    #[test]
    fn test_empty_screen_gives_degenerate_rect() {
        let inputs = FramingInputs {
            framing: Rect::new(0, 0, 10, 10),
            camera: Resolution::new(640, 480),
            screen: Resolution::new(0, 0),
            portrait: false,
        };
        assert!(compute_framing_rect_in_preview(&inputs).is_degenerate());
    }

    #[test]
    fn test_cache_invalidated_by_screen_change() {
        let mut cache = PreviewRectCache::new();
        let inputs = FramingInputs {
            framing: Rect::new(100, 100, 300, 300),
            camera: Resolution::new(1280, 720),
            screen: Resolution::new(1280, 720),
            portrait: false,
        };
        let first = cache.get(inputs);
        assert_eq!(cache.peek(&inputs), Some(first));

        let rotated_screen = FramingInputs {
            screen: Resolution::new(640, 360),
            ..inputs
        };
        assert_eq!(cache.peek(&rotated_screen), None);
        let second = cache.get(rotated_screen);
        assert_ne!(first, second);
        assert_eq!(cache.peek(&inputs), None);

        cache.invalidate();
        assert_eq!(cache.peek(&rotated_screen), None);
    }

    proptest! {
        #[test]
        fn prop_mapping_is_deterministic(
            left in 0i32..500, top in 0i32..500, w in 1i32..500, h in 1i32..500,
            cam in (1u32..4000, 1u32..4000),
            screen in (1u32..4000, 1u32..4000),
            portrait in any::<bool>(),
        ) {
            let inputs = FramingInputs {
                framing: Rect::from_size(left, top, w, h),
                camera: Resolution::new(cam.0, cam.1),
                screen: Resolution::new(screen.0, screen.1),
                portrait,
            };
            let mut cache = PreviewRectCache::new();
            let cached = cache.get(inputs);
            prop_assert_eq!(cached, compute_framing_rect_in_preview(&inputs));
            prop_assert_eq!(cache.get(inputs), cached);
        }
    }
}
