//! Hardware boundary: what a camera reports and what can be written back

use serde::{Deserialize, Serialize};

use crate::capture::RawFrame;
use crate::error::DeviceError;
use crate::geometry::{Orientation, Rect, Resolution};

/// Which way the camera faces relative to the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    Back,
    Front,
}

/// Display geometry read once per camera open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub resolution: Resolution,
    /// Clockwise rotation of the display from its natural orientation
    pub rotation: Orientation,
}

impl ScreenGeometry {
    pub fn new(resolution: Resolution, rotation: Orientation) -> Self {
        Self {
            resolution,
            rotation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusMode {
    Auto,
    ContinuousPicture,
    ContinuousVideo,
    Macro,
    /// Extended depth of field
    Edof,
    Fixed,
    Infinity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlashMode {
    Off,
    On,
    Auto,
    Torch,
    RedEye,
}

impl FlashMode {
    /// Modes that keep the scene lit
    pub fn is_lit(self) -> bool {
        matches!(self, Self::On | Self::Torch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneMode {
    Auto,
    Barcode,
    Action,
    Night,
    Sports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorEffect {
    None,
    Negative,
    Mono,
    Sepia,
}

/// Weighted region in driver space, where the sensor spans -1000..=1000 on both axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringArea {
    pub rect: Rect,
    pub weight: u32,
}

/// Preview frame-rate range in frames per 1000 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub min_millis: u32,
    pub max_millis: u32,
}

impl FpsRange {
    pub fn from_fps(min: u32, max: u32) -> Self {
        Self {
            min_millis: min * 1000,
            max_millis: max * 1000,
        }
    }
}

/// Exposure compensation range in hardware steps
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureRange {
    pub min: i32,
    pub max: i32,
    /// EV per step
    pub step: f32,
}

impl ExposureRange {
    pub fn is_supported(&self) -> bool {
        (self.min != 0 || self.max != 0) && self.step > 0.0
    }
}

/// Immutable snapshot of what an opened camera supports
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraCapabilities {
    pub preview_sizes: Vec<Resolution>,
    pub picture_sizes: Vec<Resolution>,
    pub focus_modes: Vec<FocusMode>,
    pub flash_modes: Vec<FlashMode>,
    pub scene_modes: Vec<SceneMode>,
    pub color_effects: Vec<ColorEffect>,
    pub zoom_supported: bool,
    pub max_zoom: u32,
    /// Zoom ratio per zoom index, x100 (100 == 1.0x)
    pub zoom_ratios: Vec<u32>,
    pub exposure: ExposureRange,
    pub fps_ranges: Vec<FpsRange>,
    pub max_focus_areas: u32,
    pub max_metering_areas: u32,
    pub video_stabilization: bool,
    pub facing: Facing,
    /// Clockwise rotation of the sensor readout from the natural device orientation
    pub mount_orientation: Orientation,
}

/// Parameter set read from and written to the hardware
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraParameters {
    pub preview_size: Option<Resolution>,
    pub picture_size: Option<Resolution>,
    pub focus_mode: Option<FocusMode>,
    pub flash_mode: Option<FlashMode>,
    pub scene_mode: Option<SceneMode>,
    pub color_effect: Option<ColorEffect>,
    pub zoom_index: u32,
    pub exposure_compensation: i32,
    pub focus_areas: Vec<MeteringArea>,
    pub metering_areas: Vec<MeteringArea>,
    pub video_stabilization: bool,
    pub preview_fps_range: Option<FpsRange>,
}

/// A camera driver. Implementations own the hardware handle; the session
/// owning the device is the only caller.
pub trait CameraDevice: Send {
    fn capabilities(&self) -> Result<CameraCapabilities, DeviceError>;

    /// Currently active parameters
    fn parameters(&self) -> Result<CameraParameters, DeviceError>;

    /// Write a full parameter set. A rejected set may leave the hardware
    /// partially configured.
    fn set_parameters(&mut self, parameters: &CameraParameters) -> Result<(), DeviceError>;

    fn start_preview(&mut self) -> Result<(), DeviceError>;

    fn stop_preview(&mut self) -> Result<(), DeviceError>;

    /// Block until the next preview frame is available and copy it out
    fn request_frame(&mut self) -> Result<RawFrame, DeviceError>;

    /// Release the hardware. Further calls are invalid.
    fn release(&mut self);
}
