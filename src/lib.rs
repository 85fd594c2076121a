pub mod camera;
pub mod capture;
pub mod decode;
pub mod error;
pub mod geometry;
pub mod luminance;
pub mod pipeline;
pub mod transform;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use error::{DeviceError, EngineError, ScanError, ScanResult};
pub use geometry::{Orientation, Rect, Resolution};

use crate::camera::{Facing, FpsRange};
use crate::decode::{DecodeFormats, DecodeModePolicy};
use crate::luminance::ToneAdjust;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub display: DisplayConfig,
    pub framing: FramingConfig,
    pub decode: DecodeConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Defaults, then `barscan.toml` (or `path` when given), then
    /// `BARSCAN_<SECTION>__<KEY>` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("barscan").required(false),
        };
        config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("BARSCAN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device path; empty means auto-detect
    pub device: String,
    pub facing: Facing,
    /// Sensor mount rotation for drivers that cannot report it
    pub mount_orientation: Orientation,
    pub buffer_count: u32,
    pub auto_focus: bool,
    pub disable_continuous_focus: bool,
    /// Ask the sensor for a negative image, for light-on-dark codes
    pub invert_scan: bool,
    pub disable_barcode_scene_mode: bool,
    /// Also disables focus areas and video stabilisation
    pub disable_metering: bool,
    pub disable_exposure: bool,
    pub torch: bool,
    /// Desired zoom factor times ten
    pub desired_zoom_x10: u32,
    pub preview_fps_range: FpsBounds,
    pub mirror_front_camera: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            facing: Facing::Back,
            mount_orientation: Orientation::Deg0,
            buffer_count: 4,
            auto_focus: true,
            disable_continuous_focus: true,
            invert_scan: false,
            disable_barcode_scene_mode: false,
            disable_metering: false,
            disable_exposure: true,
            torch: false,
            desired_zoom_x10: 10,
            preview_fps_range: FpsBounds::default(),
            mirror_front_camera: false,
        }
    }
}

/// Acceptable preview frame rates in whole frames per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FpsBounds {
    pub min: u32,
    pub max: u32,
}

impl Default for FpsBounds {
    fn default() -> Self {
        Self { min: 10, max: 20 }
    }
}

impl FpsBounds {
    /// Whether a hardware range lies entirely inside these bounds
    pub fn contains(&self, range: &FpsRange) -> bool {
        range.min_millis >= self.min * 1000 && range.max_millis <= self.max * 1000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub rotation: Orientation,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            rotation: Orientation::Deg0,
        }
    }
}

impl DisplayConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Fixed scan window size in screen pixels; computed from the screen when unset
    pub manual_size: Option<Resolution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub policy: DecodeModePolicy,
    pub formats: DecodeFormats,
    pub character_set: Option<String>,
    /// Attach a JPEG thumbnail of the decoded region to each result
    pub diagnostics: bool,
    /// Keep scanning after the first result
    pub bulk_mode: bool,
    pub tone: Option<ToneAdjust>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            policy: DecodeModePolicy::DualRace,
            formats: DecodeFormats::default(),
            character_set: None,
            diagnostics: false,
            bulk_mode: false,
            tone: None,
        }
    }
}

/// Whether captured frames must be turned upright before cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientationLock {
    /// Follow the screen's shape
    #[default]
    Auto,
    Portrait,
    Landscape,
}

impl OrientationLock {
    pub fn is_portrait(self, screen: Resolution) -> bool {
        match self {
            Self::Auto => screen.is_portrait(),
            Self::Portrait => true,
            Self::Landscape => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pin the decode thread to this CPU core
    pub decode_core: Option<usize>,
    pub orientation_lock: OrientationLock,
    /// How long the capture loop waits for the decoder before re-checking shutdown
    pub pump_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode_core: None,
            orientation_lock: OrientationLock::Auto,
            pump_timeout_ms: 500,
        }
    }
}
