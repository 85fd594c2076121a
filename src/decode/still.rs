//! Single-shot decoding of still images

use std::path::Path;

use image::DynamicImage;
use tracing::{debug, info, instrument};

use super::{run_engine, DecodeEngine, DecodeResult, FallbackEngine, RxingEngine, ScanHints};
use crate::error::ScanResult;
use crate::geometry::Rect;
use crate::luminance::{luma_from_rgba, LuminanceView};
use crate::transform::LumaBuffer;

/// Quarter turns tried after the upright attempt fails
const MAX_ROTATION_RETRIES: usize = 4;

/// Decodes photos and screenshots, which have no framing rectangle and may
/// hold the symbol at any right angle.
pub struct StaticImageDecoder {
    primary: Box<dyn DecodeEngine>,
    fallback: Box<dyn DecodeEngine>,
}

impl StaticImageDecoder {
    pub fn new(hints: &ScanHints) -> Self {
        Self::with_engines(
            Box::new(RxingEngine::new(hints)),
            Box::new(FallbackEngine::new(hints)),
        )
    }

    pub fn with_engines(primary: Box<dyn DecodeEngine>, fallback: Box<dyn DecodeEngine>) -> Self {
        Self { primary, fallback }
    }

    pub fn decode_file(&mut self, path: &Path) -> ScanResult<Option<DecodeResult>> {
        let image = image::open(path)?;
        info!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "Decoding still image"
        );
        self.decode(&image)
    }

    pub fn decode(&mut self, image: &DynamicImage) -> ScanResult<Option<DecodeResult>> {
        let luma = luma_from_rgba(&image.to_rgba8())?;
        Ok(self.decode_luma(&luma))
    }

    /// Both engines on the upright buffer, then the primary engine alone on
    /// successive quarter turns of it.
    #[instrument(skip_all, fields(width = luma.width(), height = luma.height()))]
    pub fn decode_luma(&mut self, luma: &LumaBuffer) -> Option<DecodeResult> {
        let view = LuminanceView::full(luma);
        for engine in [&mut self.primary, &mut self.fallback] {
            if let Some(payload) = run_engine(engine.as_mut(), &view) {
                return Some(DecodeResult {
                    payload,
                    source_region: Some(view.crop()),
                    engine: engine.kind(),
                    thumbnail: None,
                });
            }
        }

        let mut rotated = luma.rotate90();
        for turn in 1..=MAX_ROTATION_RETRIES {
            let view = LuminanceView::full(&rotated);
            if let Some(payload) = run_engine(self.primary.as_mut(), &view) {
                debug!(quarter_turns = turn, "Found code after rotating");
                return Some(DecodeResult {
                    payload,
                    source_region: Some(Rect::bounds(rotated.width(), rotated.height())),
                    engine: self.primary.kind(),
                    thumbnail: None,
                });
            }
            if turn < MAX_ROTATION_RETRIES {
                rotated = rotated.rotate90();
            }
        }

        debug!("No code in still image");
        None
    }
}
