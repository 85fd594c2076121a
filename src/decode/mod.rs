//! Decode engines and the per-frame dispatch between them

pub mod dispatcher;
pub mod fallback_engine;
pub mod rxing_engine;
pub mod still;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::EngineError;
use crate::geometry::Rect;
use crate::luminance::{LuminanceView, Thumbnail};

pub use dispatcher::DecodeDispatcher;
pub use fallback_engine::FallbackEngine;
pub use rxing_engine::RxingEngine;
pub use still::StaticImageDecoder;

/// Engine slot a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    /// Primary, format-validated multi-format engine
    Zxing,
    /// Fallback engine
    Zbar,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zxing => "zxing",
            Self::Zbar => "zbar",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which engines run on each frame, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeModePolicy {
    ZxingOnly,
    ZbarOnly,
    /// Primary first; the fallback runs only when the primary finds nothing
    #[default]
    DualRace,
}

impl DecodeModePolicy {
    pub fn engine_order(self) -> &'static [EngineKind] {
        match self {
            Self::ZxingOnly => &[EngineKind::Zxing],
            Self::ZbarOnly => &[EngineKind::Zbar],
            Self::DualRace => &[EngineKind::Zxing, EngineKind::Zbar],
        }
    }
}

/// Symbol family of a decoded payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbology {
    QrCode,
    DataMatrix,
    Aztec,
    Pdf417,
    Code128,
    Code39,
    Code93,
    Codabar,
    Ean8,
    Ean13,
    UpcA,
    UpcE,
    Itf,
    Rss14,
    RssExpanded,
    Other(String),
}

impl Symbology {
    pub fn is_linear(&self) -> bool {
        !matches!(
            self,
            Self::QrCode | Self::DataMatrix | Self::Aztec | Self::Pdf417 | Self::Other(_)
        )
    }
}

/// Which symbol families engines should look for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeFormats {
    /// UPC, EAN and RSS
    pub product_1d: bool,
    /// Code 39/93/128, ITF and Codabar
    pub industrial_1d: bool,
    pub qr: bool,
    pub data_matrix: bool,
    pub aztec: bool,
    pub pdf417: bool,
}

impl Default for DecodeFormats {
    fn default() -> Self {
        Self {
            product_1d: true,
            industrial_1d: true,
            qr: true,
            data_matrix: true,
            aztec: false,
            pdf417: false,
        }
    }
}

impl DecodeFormats {
    pub fn symbologies(&self) -> Vec<Symbology> {
        let mut out = Vec::new();
        if self.product_1d {
            out.extend([
                Symbology::UpcA,
                Symbology::UpcE,
                Symbology::Ean13,
                Symbology::Ean8,
                Symbology::Rss14,
                Symbology::RssExpanded,
            ]);
        }
        if self.industrial_1d {
            out.extend([
                Symbology::Code39,
                Symbology::Code93,
                Symbology::Code128,
                Symbology::Itf,
                Symbology::Codabar,
            ]);
        }
        if self.qr {
            out.push(Symbology::QrCode);
        }
        if self.data_matrix {
            out.push(Symbology::DataMatrix);
        }
        if self.aztec {
            out.push(Symbology::Aztec);
        }
        if self.pdf417 {
            out.push(Symbology::Pdf417);
        }
        out
    }
}

/// Engine configuration shared by both slots
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanHints {
    pub formats: DecodeFormats,
    pub character_set: Option<String>,
}

impl ScanHints {
    pub fn from_config(config: &crate::DecodeConfig) -> Self {
        Self {
            formats: config.formats,
            character_set: config.character_set.clone(),
        }
    }
}

/// What an engine found, in the coordinates of the view it was given
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPayload {
    pub text: String,
    pub symbology: Symbology,
    /// Finder or corner points reported by the engine
    pub points: Vec<(f32, f32)>,
}

/// A successful decode with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResult {
    pub payload: DecodedPayload,
    /// Region of the (upright) buffer that was decoded
    pub source_region: Option<Rect>,
    pub engine: EngineKind,
    /// Only attached when diagnostics are enabled
    pub thumbnail: Option<Thumbnail>,
}

/// Why a frame was not handed to any engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Camera geometry not initialised yet
    GeometryUnset,
    /// Crop region has no area or lies outside the frame
    DegenerateCrop,
    /// Zero-sized or malformed buffer
    BadFrame,
}

/// Result of processing one frame. `NoCodeFound` is an explicit failure
/// signal, distinct from a skipped frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Decoded(DecodeResult),
    NoCodeFound,
    Skipped(SkipReason),
}

impl FrameOutcome {
    pub fn decoded(&self) -> Option<&DecodeResult> {
        match self {
            Self::Decoded(result) => Some(result),
            _ => None,
        }
    }
}

/// A symbol decoder over a luminance view.
///
/// Engines keep reusable reader state and are not safe to call from more
/// than one thread; each lives on the processing thread that owns it.
pub trait DecodeEngine: Send {
    fn kind(&self) -> EngineKind;

    fn configure(&mut self, hints: &ScanHints);

    /// `Ok(None)` when nothing was found
    fn decode(&mut self, view: &LuminanceView<'_>) -> Result<Option<DecodedPayload>, EngineError>;

    /// Clear per-attempt reader state
    fn reset(&mut self);
}

/// Run one engine attempt, absorbing failures and panics as "nothing found".
/// The engine is always reset afterwards.
pub(crate) fn run_engine(
    engine: &mut dyn DecodeEngine,
    view: &LuminanceView<'_>,
) -> Option<DecodedPayload> {
    let kind = engine.kind();
    let start = Instant::now();
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| engine.decode(view)))
        .unwrap_or_else(|panic| Err(EngineError::Panicked(panic_message(panic.as_ref()))));
    engine.reset();
    metrics::histogram!("decode_time_us", "engine" => kind.as_str())
        .record(start.elapsed().as_micros() as f64);

    match attempt {
        Ok(Some(payload)) => {
            trace!(engine = %kind, symbology = ?payload.symbology, "Engine found a code");
            Some(payload)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(engine = %kind, "Decode engine failed: {e}");
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
