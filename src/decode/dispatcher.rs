//! Per-frame orientation, cropping and engine arbitration

use std::time::Instant;

use tracing::{debug, instrument, trace, warn};

use super::{
    run_engine, DecodeEngine, DecodeModePolicy, DecodeResult, FallbackEngine, FrameOutcome,
    RxingEngine, ScanHints, SkipReason,
};
use crate::capture::{luminance_plane, RawFrame};
use crate::geometry::{Orientation, Rect};
use crate::luminance::{render_thumbnail, LuminanceView, ToneTable};
use crate::transform::LumaBuffer;
use crate::DecodeConfig;

/// Frame geometry published by the camera session and read per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanGeometry {
    /// Scan window in upright preview-buffer coordinates
    pub crop: Rect,
    /// Rotate the raw buffer 90° clockwise before cropping
    pub rotate_upright: bool,
    /// Flip the buffer left-right before cropping
    pub mirror: bool,
}

/// Turns raw frames into decode outcomes.
///
/// Holds one engine per slot; engines are reused across frames and reset
/// after every attempt. Not shared between threads.
pub struct DecodeDispatcher {
    engines: Vec<Box<dyn DecodeEngine>>,
    tone: Option<ToneTable>,
    diagnostics: bool,
}

impl DecodeDispatcher {
    /// rxing in the primary slot, rqrr plus a linear row scanner as fallback
    pub fn new(config: &DecodeConfig) -> Self {
        let hints = ScanHints::from_config(config);
        let engines: Vec<Box<dyn DecodeEngine>> = vec![
            Box::new(RxingEngine::new(&hints)),
            Box::new(FallbackEngine::new(&hints)),
        ];
        let mut dispatcher = Self::with_engines(engines).with_diagnostics(config.diagnostics);
        if let Some(tone) = config.tone.filter(|tone| !tone.is_identity()) {
            dispatcher.tone = Some(tone.table());
        }
        dispatcher
    }

    pub fn with_engines(engines: Vec<Box<dyn DecodeEngine>>) -> Self {
        Self {
            engines,
            tone: None,
            diagnostics: false,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_tone(mut self, tone: ToneTable) -> Self {
        self.tone = Some(tone);
        self
    }

    /// Process one delivered frame. Never fails: engine errors count as
    /// "nothing found" and unusable frames are skipped.
    #[instrument(skip_all, fields(seq = frame.meta.sequence))]
    pub fn dispatch(
        &mut self,
        frame: &RawFrame,
        geometry: Option<&ScanGeometry>,
        policy: DecodeModePolicy,
    ) -> FrameOutcome {
        let Some(geometry) = geometry else {
            trace!("Camera geometry not ready, skipping frame");
            return FrameOutcome::Skipped(SkipReason::GeometryUnset);
        };
        if geometry.crop.is_degenerate() {
            debug!(crop = %geometry.crop, "Degenerate scan region, skipping frame");
            return FrameOutcome::Skipped(SkipReason::DegenerateCrop);
        }

        let mut luma = match luminance_plane(frame) {
            Ok(luma) => luma,
            Err(e) => {
                debug!("Unusable frame: {e}");
                return FrameOutcome::Skipped(SkipReason::BadFrame);
            }
        };
        if geometry.rotate_upright {
            luma = luma.rotate(Orientation::Deg90);
        }
        if geometry.mirror {
            luma = luma.mirror_horizontal();
        }

        self.decode_luminance(&luma, geometry.crop, policy)
    }

    /// Decode the `crop` region of an upright luminance buffer
    pub fn decode_luminance(
        &mut self,
        luma: &LumaBuffer,
        crop: Rect,
        policy: DecodeModePolicy,
    ) -> FrameOutcome {
        let view = match LuminanceView::cropped(luma, crop) {
            Ok(view) => view,
            Err(e) => {
                debug!("{e}, skipping frame");
                return FrameOutcome::Skipped(SkipReason::DegenerateCrop);
            }
        };

        let region = view.crop();
        let toned;
        let view = match &self.tone {
            Some(table) => match view.to_buffer() {
                Ok(cropped) => {
                    toned = table.apply(&cropped);
                    LuminanceView::full(&toned)
                }
                Err(_) => view,
            },
            None => view,
        };

        let start = Instant::now();
        for &kind in policy.engine_order() {
            let Some(engine) = self.engines.iter_mut().find(|e| e.kind() == kind) else {
                warn!(engine = %kind, "No engine registered for slot");
                continue;
            };
            let Some(payload) = run_engine(engine.as_mut(), &view) else {
                continue;
            };

            debug!(
                engine = %kind,
                symbology = ?payload.symbology,
                elapsed_us = start.elapsed().as_micros() as u64,
                "Found code"
            );
            let thumbnail = if self.diagnostics {
                render_thumbnail(&view)
                    .map_err(|e| warn!("Thumbnail failed: {e}"))
                    .ok()
            } else {
                None
            };
            return FrameOutcome::Decoded(DecodeResult {
                payload,
                source_region: Some(region),
                engine: kind,
                thumbnail,
            });
        }

        trace!(elapsed_us = start.elapsed().as_micros() as u64, "No code in frame");
        FrameOutcome::NoCodeFound
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::capture::PixelFormat;
    use crate::decode::{DecodedPayload, EngineKind, Symbology};
    use crate::error::EngineError;

    struct Scripted {
        kind: EngineKind,
        answer: Option<&'static str>,
        calls: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
        seen: Arc<std::sync::Mutex<Vec<(u32, u32)>>>,
    }

    impl Scripted {
        fn new(kind: EngineKind, answer: Option<&'static str>) -> Self {
            Self {
                kind,
                answer,
                calls: Arc::default(),
                resets: Arc::default(),
                seen: Arc::default(),
            }
        }
    }

    impl DecodeEngine for Scripted {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn configure(&mut self, _hints: &ScanHints) {}

        fn decode(
            &mut self,
            view: &LuminanceView<'_>,
        ) -> Result<Option<DecodedPayload>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((view.width(), view.height()));
            Ok(self.answer.map(|text| DecodedPayload {
                text: text.to_string(),
                symbology: Symbology::QrCode,
                points: Vec::new(),
            }))
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(width: u32, height: u32) -> RawFrame {
        let len = (width * height * 3 / 2) as usize;
        RawFrame::new(vec![200u8; len], width, height, PixelFormat::Nv21)
    }

    fn geometry(crop: Rect) -> ScanGeometry {
        ScanGeometry {
            crop,
            rotate_upright: false,
            mirror: false,
        }
    }

    #[test]
    fn test_zero_width_crop_calls_no_engine() {
        let primary = Scripted::new(EngineKind::Zxing, Some("x"));
        let calls = primary.calls.clone();
        let mut dispatcher = DecodeDispatcher::with_engines(vec![Box::new(primary)]);

        let outcome = dispatcher.dispatch(
            &frame(64, 48),
            Some(&geometry(Rect::new(10, 10, 10, 40))),
            DecodeModePolicy::DualRace,
        );

        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::DegenerateCrop));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_geometry_skips() {
        let mut dispatcher = DecodeDispatcher::with_engines(Vec::new());
        let outcome = dispatcher.dispatch(&frame(64, 48), None, DecodeModePolicy::ZxingOnly);
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::GeometryUnset));
    }

    #[test]
    fn test_dual_race_stops_at_primary_success() {
        let primary = Scripted::new(EngineKind::Zxing, Some("primary"));
        let fallback = Scripted::new(EngineKind::Zbar, Some("fallback"));
        let (primary_resets, fallback_calls) = (primary.resets.clone(), fallback.calls.clone());
        let mut dispatcher =
            DecodeDispatcher::with_engines(vec![Box::new(fallback), Box::new(primary)]);

        let outcome = dispatcher.dispatch(
            &frame(64, 48),
            Some(&geometry(Rect::new(8, 8, 40, 40))),
            DecodeModePolicy::DualRace,
        );

        let result = outcome.decoded().unwrap();
        assert_eq!(result.engine, EngineKind::Zxing);
        assert_eq!(result.payload.text, "primary");
        assert_eq!(result.source_region, Some(Rect::new(8, 8, 40, 40)));
        assert!(result.thumbnail.is_none());
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
        assert_eq!(primary_resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dual_race_falls_back() {
        let primary = Scripted::new(EngineKind::Zxing, None);
        let fallback = Scripted::new(EngineKind::Zbar, Some("fallback"));
        let primary_resets = primary.resets.clone();
        let mut dispatcher =
            DecodeDispatcher::with_engines(vec![Box::new(primary), Box::new(fallback)]);

        let outcome = dispatcher.dispatch(
            &frame(64, 48),
            Some(&geometry(Rect::new(0, 0, 64, 48))),
            DecodeModePolicy::DualRace,
        );

        assert_eq!(outcome.decoded().unwrap().engine, EngineKind::Zbar);
        assert_eq!(primary_resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_engine_policies() {
        let primary = Scripted::new(EngineKind::Zxing, None);
        let fallback = Scripted::new(EngineKind::Zbar, Some("fallback"));
        let (primary_calls, fallback_calls) = (primary.calls.clone(), fallback.calls.clone());
        let mut dispatcher =
            DecodeDispatcher::with_engines(vec![Box::new(primary), Box::new(fallback)]);
        let crop = geometry(Rect::new(0, 0, 32, 32));

        let outcome = dispatcher.dispatch(&frame(64, 48), Some(&crop), DecodeModePolicy::ZxingOnly);
        assert_eq!(outcome, FrameOutcome::NoCodeFound);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);

        let outcome = dispatcher.dispatch(&frame(64, 48), Some(&crop), DecodeModePolicy::ZbarOnly);
        assert_eq!(outcome.decoded().unwrap().engine, EngineKind::Zbar);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_portrait_frames_are_rotated_before_cropping() {
        let primary = Scripted::new(EngineKind::Zxing, None);
        let seen = primary.seen.clone();
        let mut dispatcher = DecodeDispatcher::with_engines(vec![Box::new(primary)]);
        let upright = ScanGeometry {
            // Only fits once the 64x48 frame is turned to 48x64
            crop: Rect::new(0, 0, 48, 64),
            rotate_upright: true,
            mirror: false,
        };

        dispatcher.dispatch(&frame(64, 48), Some(&upright), DecodeModePolicy::ZxingOnly);

        assert_eq!(seen.lock().unwrap().as_slice(), &[(48, 64)]);
    }

    #[test]
    fn test_crop_is_clipped_to_frame() {
        let primary = Scripted::new(EngineKind::Zxing, None);
        let seen = primary.seen.clone();
        let mut dispatcher = DecodeDispatcher::with_engines(vec![Box::new(primary)]);

        dispatcher.dispatch(
            &frame(64, 48),
            Some(&geometry(Rect::new(40, 30, 100, 100))),
            DecodeModePolicy::ZxingOnly,
        );

        assert_eq!(seen.lock().unwrap().as_slice(), &[(24, 18)]);
    }

    #[test]
    fn test_diagnostics_attach_thumbnail() {
        let primary = Scripted::new(EngineKind::Zxing, Some("x"));
        let mut dispatcher =
            DecodeDispatcher::with_engines(vec![Box::new(primary)]).with_diagnostics(true);

        let outcome = dispatcher.dispatch(
            &frame(64, 48),
            Some(&geometry(Rect::new(0, 0, 40, 20))),
            DecodeModePolicy::ZxingOnly,
        );

        let thumbnail = outcome.decoded().unwrap().thumbnail.clone().unwrap();
        assert_eq!((thumbnail.width, thumbnail.height), (20, 10));
        assert!((thumbnail.scale_factor - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_toned_view_reports_requested_region() {
        let primary = Scripted::new(EngineKind::Zxing, Some("x"));
        let mut dispatcher = DecodeDispatcher::with_engines(vec![Box::new(primary)])
            .with_tone(ToneTable::brightness_contrast(10, 20));

        let outcome = dispatcher.dispatch(
            &frame(64, 48),
            Some(&geometry(Rect::new(16, 8, 48, 40))),
            DecodeModePolicy::ZxingOnly,
        );

        assert_eq!(
            outcome.decoded().unwrap().source_region,
            Some(Rect::new(16, 8, 48, 40))
        );
    }
}
