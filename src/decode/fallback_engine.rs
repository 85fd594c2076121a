//! Fallback engine: rqrr for QR symbols plus a row scanner for linear codes

use rqrr::PreparedImage;
use rxing::{DecodeHints, MultiFormatReader, Reader};

use super::rxing_engine::{read, reader_hints};
use super::{DecodeEngine, DecodedPayload, EngineKind, ScanHints, Symbology};
use crate::error::EngineError;
use crate::luminance::LuminanceView;

/// Fills the fallback slot.
///
/// QR grids go through rqrr's own finder, which copes with perspective and
/// uneven light differently from the primary engine. Linear symbologies are
/// read row by row. Either half stays idle when none of its formats are
/// enabled.
pub struct FallbackEngine {
    qr: bool,
    /// `None` when no linear symbology is enabled
    linear: Option<LinearReader>,
}

struct LinearReader {
    reader: MultiFormatReader,
    hints: DecodeHints,
}

impl Default for FallbackEngine {
    fn default() -> Self {
        Self::new(&ScanHints::default())
    }
}

impl FallbackEngine {
    pub fn new(hints: &ScanHints) -> Self {
        let mut engine = Self {
            qr: false,
            linear: None,
        };
        engine.configure(hints);
        engine
    }

    fn decode_qr(view: &LuminanceView<'_>) -> Option<DecodedPayload> {
        let mut prepared = PreparedImage::prepare_from_greyscale(
            view.width() as usize,
            view.height() as usize,
            |x, y| view.pixel(x as u32, y as u32),
        );

        // Grids that fail to decode are just damaged candidates
        prepared.detect_grids().into_iter().find_map(|grid| {
            let (_meta, text) = grid.decode().ok()?;
            let points = grid
                .bounds
                .iter()
                .map(|p| (p.x as f32, p.y as f32))
                .collect();
            Some(DecodedPayload {
                text,
                symbology: Symbology::QrCode,
                points,
            })
        })
    }
}

impl DecodeEngine for FallbackEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Zbar
    }

    fn configure(&mut self, hints: &ScanHints) {
        let symbologies = hints.formats.symbologies();
        self.qr = symbologies.contains(&Symbology::QrCode);

        let linear: Vec<Symbology> = symbologies
            .into_iter()
            .filter(Symbology::is_linear)
            .collect();
        self.linear = (!linear.is_empty()).then(|| LinearReader {
            reader: MultiFormatReader::default(),
            hints: reader_hints(linear, hints.character_set.as_deref()),
        });
    }

    fn decode(&mut self, view: &LuminanceView<'_>) -> Result<Option<DecodedPayload>, EngineError> {
        if self.qr {
            if let Some(payload) = Self::decode_qr(view) {
                return Ok(Some(payload));
            }
        }
        match &mut self.linear {
            Some(linear) => read(&mut linear.reader, &linear.hints, view),
            None => Ok(None),
        }
    }

    fn reset(&mut self) {
        // rqrr keeps no state between calls
        if let Some(linear) = &mut self.linear {
            linear.reader.reset();
        }
    }
}
