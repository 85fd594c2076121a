//! Multi-format engine backed by the rxing port of ZXing

use std::collections::HashSet;

use rxing::common::HybridBinarizer;
use rxing::{
    BarcodeFormat, BinaryBitmap, DecodeHintValue, DecodeHints, Exceptions, Luma8LuminanceSource,
    MultiFormatReader, Reader,
};

use super::{DecodeEngine, DecodedPayload, EngineKind, ScanHints, Symbology};
use crate::error::EngineError;
use crate::luminance::LuminanceView;

/// Fills the primary slot: validates formats and reports corner points
pub struct RxingEngine {
    reader: MultiFormatReader,
    hints: DecodeHints,
}

impl Default for RxingEngine {
    fn default() -> Self {
        Self::new(&ScanHints::default())
    }
}

impl RxingEngine {
    pub fn new(hints: &ScanHints) -> Self {
        let mut engine = Self {
            reader: MultiFormatReader::default(),
            hints: DecodeHints::default(),
        };
        engine.configure(hints);
        engine
    }
}

impl DecodeEngine for RxingEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Zxing
    }

    fn configure(&mut self, hints: &ScanHints) {
        self.hints = reader_hints(hints.formats.symbologies(), hints.character_set.as_deref());
    }

    fn decode(&mut self, view: &LuminanceView<'_>) -> Result<Option<DecodedPayload>, EngineError> {
        read(&mut self.reader, &self.hints, view)
    }

    fn reset(&mut self) {
        self.reader.reset();
    }
}

/// Reader hints restricted to `symbologies`
pub(super) fn reader_hints(
    symbologies: impl IntoIterator<Item = Symbology>,
    character_set: Option<&str>,
) -> DecodeHints {
    let formats: HashSet<BarcodeFormat> = symbologies
        .into_iter()
        .filter_map(|s| barcode_format(&s))
        .collect();
    let hints = DecodeHints::default()
        .with(DecodeHintValue::TryHarder(true))
        .with(DecodeHintValue::PossibleFormats(formats));
    match character_set {
        Some(charset) => hints.with(DecodeHintValue::CharacterSet(charset.to_string())),
        None => hints,
    }
}

/// One attempt with `reader`; not-found style errors mean nothing was there
pub(super) fn read(
    reader: &mut MultiFormatReader,
    hints: &DecodeHints,
    view: &LuminanceView<'_>,
) -> Result<Option<DecodedPayload>, EngineError> {
    let source = Luma8LuminanceSource::new(view.to_vec(), view.width(), view.height());
    let mut bitmap = BinaryBitmap::new(HybridBinarizer::new(source));

    match reader.decode_with_hints(&mut bitmap, hints) {
        Ok(result) => Ok(Some(DecodedPayload {
            text: result.getText().to_string(),
            symbology: symbology(result.getBarcodeFormat()),
            points: result.getPoints().iter().map(|p| (p.x, p.y)).collect(),
        })),
        Err(Exceptions::NotFoundException(_))
        | Err(Exceptions::ChecksumException(_))
        | Err(Exceptions::FormatException(_)) => Ok(None),
        Err(e) => Err(EngineError::Internal(e.to_string())),
    }
}

fn symbology(format: &BarcodeFormat) -> Symbology {
    match format {
        BarcodeFormat::QR_CODE => Symbology::QrCode,
        BarcodeFormat::DATA_MATRIX => Symbology::DataMatrix,
        BarcodeFormat::AZTEC => Symbology::Aztec,
        BarcodeFormat::PDF_417 => Symbology::Pdf417,
        BarcodeFormat::CODE_128 => Symbology::Code128,
        BarcodeFormat::CODE_39 => Symbology::Code39,
        BarcodeFormat::CODE_93 => Symbology::Code93,
        BarcodeFormat::CODABAR => Symbology::Codabar,
        BarcodeFormat::EAN_8 => Symbology::Ean8,
        BarcodeFormat::EAN_13 => Symbology::Ean13,
        BarcodeFormat::UPC_A => Symbology::UpcA,
        BarcodeFormat::UPC_E => Symbology::UpcE,
        BarcodeFormat::ITF => Symbology::Itf,
        BarcodeFormat::RSS_14 => Symbology::Rss14,
        BarcodeFormat::RSS_EXPANDED => Symbology::RssExpanded,
        other => Symbology::Other(format!("{other:?}")),
    }
}

fn barcode_format(symbology: &Symbology) -> Option<BarcodeFormat> {
    Some(match symbology {
        Symbology::QrCode => BarcodeFormat::QR_CODE,
        Symbology::DataMatrix => BarcodeFormat::DATA_MATRIX,
        Symbology::Aztec => BarcodeFormat::AZTEC,
        Symbology::Pdf417 => BarcodeFormat::PDF_417,
        Symbology::Code128 => BarcodeFormat::CODE_128,
        Symbology::Code39 => BarcodeFormat::CODE_39,
        Symbology::Code93 => BarcodeFormat::CODE_93,
        Symbology::Codabar => BarcodeFormat::CODABAR,
        Symbology::Ean8 => BarcodeFormat::EAN_8,
        Symbology::Ean13 => BarcodeFormat::EAN_13,
        Symbology::UpcA => BarcodeFormat::UPC_A,
        Symbology::UpcE => BarcodeFormat::UPC_E,
        Symbology::Itf => BarcodeFormat::ITF,
        Symbology::Rss14 => BarcodeFormat::RSS_14,
        Symbology::RssExpanded => BarcodeFormat::RSS_EXPANDED,
        Symbology::Other(_) => return None,
    })
}
