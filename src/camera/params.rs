//! Desired-parameter construction and the safe-mode fallback

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::device::{
    CameraCapabilities, CameraDevice, CameraParameters, ColorEffect, ExposureRange, FlashMode,
    FocusMode, FpsRange, MeteringArea, SceneMode,
};
use super::negotiate::ChosenCameraConfig;
use crate::geometry::Rect;
use crate::{CameraConfig, FpsBounds};

/// Exposure compensation targets in EV
const EXPOSURE_WITH_LIGHT: f32 = 0.0;
const EXPOSURE_WITHOUT_LIGHT: f32 = 1.5;
/// Half-size of the centred focus/metering area in driver space
const AREA_PER_1000: i32 = 400;

/// Which path parameter application took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigureOutcome {
    /// Full parameter set accepted
    Full,
    /// Full set rejected; the minimal subset was accepted
    SafeMode,
    /// Both rejected; the camera runs with whatever it had before
    Unconfigured,
}

/// Builds and writes camera parameters from the user's camera settings
#[derive(Debug, Clone)]
pub struct ParameterApplier {
    settings: CameraConfig,
}

impl ParameterApplier {
    pub fn new(settings: CameraConfig) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CameraConfig {
        &self.settings
    }

    /// Apply the full set, falling back to safe mode, then to nothing.
    ///
    /// Rejections never escape: the camera stays usable even when none of the
    /// desired parameters could be written.
    #[instrument(skip_all)]
    pub fn configure(
        &self,
        device: &mut dyn CameraDevice,
        capabilities: &CameraCapabilities,
        chosen: &ChosenCameraConfig,
    ) -> ConfigureOutcome {
        let snapshot = match device.parameters() {
            Ok(parameters) => parameters,
            Err(e) => {
                warn!("No camera parameters available ({e}), proceeding without configuration");
                return ConfigureOutcome::Unconfigured;
            }
        };
        debug!(?snapshot, "Initial camera parameters");

        let full = self.desired_parameters(&snapshot, capabilities, chosen, false);
        let Err(e) = device.set_parameters(&full) else {
            return ConfigureOutcome::Full;
        };
        warn!("Camera rejected parameters ({e}), retrying with safe-mode parameters");

        if let Err(e) = device.set_parameters(&snapshot) {
            warn!("Could not restore initial camera parameters ({e})");
        }
        let safe = self.desired_parameters(&snapshot, capabilities, chosen, true);
        match device.set_parameters(&safe) {
            Ok(()) => ConfigureOutcome::SafeMode,
            Err(e) => {
                warn!("Camera rejected even safe-mode parameters ({e}), no configuration");
                ConfigureOutcome::Unconfigured
            }
        }
    }

    /// Parameter set for this camera, starting from `base`.
    ///
    /// Safe mode keeps only the preview size, single-shot focus and the
    /// torch; everything unsupported is left untouched.
    pub fn desired_parameters(
        &self,
        base: &CameraParameters,
        capabilities: &CameraCapabilities,
        chosen: &ChosenCameraConfig,
        safe_mode: bool,
    ) -> CameraParameters {
        if safe_mode {
            warn!("In camera config safe mode, most settings will not be honored");
        }
        let settings = &self.settings;
        let mut parameters = base.clone();

        parameters.preview_size = Some(chosen.preview_resolution);
        parameters.picture_size = Some(chosen.picture_resolution);

        if let Some(mode) = select_focus_mode(
            &capabilities.focus_modes,
            settings.auto_focus,
            settings.disable_continuous_focus,
            safe_mode,
        ) {
            parameters.focus_mode = Some(mode);
        }

        self.set_torch(&mut parameters, capabilities, settings.torch, safe_mode);

        if safe_mode {
            return parameters;
        }

        if settings.invert_scan {
            if let Some(effect) =
                find_settable_value("color effect", &capabilities.color_effects, &[ColorEffect::Negative])
            {
                parameters.color_effect = Some(effect);
            }
        }

        if !settings.disable_barcode_scene_mode {
            if let Some(scene) =
                find_settable_value("scene mode", &capabilities.scene_modes, &[SceneMode::Barcode])
            {
                parameters.scene_mode = Some(scene);
            }
        }

        if !settings.disable_metering {
            if capabilities.video_stabilization {
                parameters.video_stabilization = true;
            } else {
                debug!("Video stabilization not supported");
            }
            if capabilities.max_focus_areas > 0 {
                parameters.focus_areas = middle_area(AREA_PER_1000);
            }
            if capabilities.max_metering_areas > 0 {
                parameters.metering_areas = middle_area(AREA_PER_1000);
            }
        }

        if let Some(range) =
            select_fps_range(&capabilities.fps_ranges, &settings.preview_fps_range)
        {
            parameters.preview_fps_range = Some(range);
        }

        if let Some(index) = zoom_index(capabilities, settings.desired_zoom_x10) {
            parameters.zoom_index = index;
        }

        parameters
    }

    /// Switch the light and re-derive exposure unless exposure tuning is off
    pub fn set_torch(
        &self,
        parameters: &mut CameraParameters,
        capabilities: &CameraCapabilities,
        on: bool,
        safe_mode: bool,
    ) {
        if let Some(mode) = select_flash_mode(&capabilities.flash_modes, on) {
            if parameters.flash_mode == Some(mode) {
                debug!(?mode, "Flash mode already set");
            } else {
                info!(?mode, "Setting flash mode");
                parameters.flash_mode = Some(mode);
            }
        }
        if !safe_mode && !self.settings.disable_exposure {
            if let Some(steps) = exposure_steps(&capabilities.exposure, on) {
                parameters.exposure_compensation = steps;
            }
        }
    }
}

/// Whether the active flash mode keeps the scene lit
pub fn torch_state(parameters: &CameraParameters) -> bool {
    parameters.flash_mode.is_some_and(FlashMode::is_lit)
}

/// First of `desired` that the hardware supports
pub fn find_settable_value<T: Copy + PartialEq + Debug>(
    name: &str,
    supported: &[T],
    desired: &[T],
) -> Option<T> {
    let found = desired.iter().copied().find(|value| supported.contains(value));
    match found {
        Some(value) => debug!("Can set {name} to {value:?}"),
        None => debug!("No supported {name} among {desired:?} (supported: {supported:?})"),
    }
    found
}

pub fn select_focus_mode(
    supported: &[FocusMode],
    auto_focus: bool,
    disable_continuous: bool,
    safe_mode: bool,
) -> Option<FocusMode> {
    let mut mode = None;
    if auto_focus {
        mode = if safe_mode || disable_continuous {
            find_settable_value("focus mode", supported, &[FocusMode::Auto])
        } else {
            find_settable_value(
                "focus mode",
                supported,
                &[
                    FocusMode::ContinuousPicture,
                    FocusMode::ContinuousVideo,
                    FocusMode::Auto,
                ],
            )
        };
    }
    // Auto-focus requested but unavailable falls through here too
    if mode.is_none() && !safe_mode {
        mode = find_settable_value("focus mode", supported, &[FocusMode::Macro, FocusMode::Edof]);
    }
    mode
}

pub fn select_flash_mode(supported: &[FlashMode], on: bool) -> Option<FlashMode> {
    if on {
        find_settable_value("flash mode", supported, &[FlashMode::Torch, FlashMode::On])
    } else {
        find_settable_value("flash mode", supported, &[FlashMode::Off])
    }
}

/// Compensation in hardware steps: low with the light on, high without
pub fn exposure_steps(range: &ExposureRange, light_on: bool) -> Option<i32> {
    if !range.is_supported() {
        debug!("Camera does not support exposure compensation");
        return None;
    }
    let target = if light_on {
        EXPOSURE_WITH_LIGHT
    } else {
        EXPOSURE_WITHOUT_LIGHT
    };
    let steps = (target / range.step).round() as i32;
    Some(steps.clamp(range.min, range.max))
}

/// Index into the zoom-ratio table closest to `ten_desired / 10` x.
///
/// The request is clamped to the largest ratio first. Ties keep the lowest
/// index. `None` when zoom is unsupported or the table is inconsistent.
pub fn zoom_index(capabilities: &CameraCapabilities, ten_desired: u32) -> Option<u32> {
    if !capabilities.zoom_supported {
        debug!("Zoom is not supported");
        return None;
    }
    let ratios = &capabilities.zoom_ratios;
    if ratios.is_empty() || ratios.len() != capabilities.max_zoom as usize + 1 {
        warn!(
            table = ratios.len(),
            max_zoom = capabilities.max_zoom,
            "Invalid zoom ratios"
        );
        return None;
    }
    let ten_max = ratios.iter().max().copied().unwrap_or(100) / 10;
    let target100 = ten_desired.min(ten_max) as i64 * 10;

    let mut closest = 0usize;
    let mut smallest = i64::MAX;
    for (index, &ratio) in ratios.iter().enumerate() {
        let diff = (ratio as i64 - target100).abs();
        if diff < smallest {
            smallest = diff;
            closest = index;
        }
    }
    debug!("Chose zoom ratio of {:.2}", ratios[closest] as f32 / 100.0);
    Some(closest as u32)
}

/// First hardware range that lies within `bounds`
pub fn select_fps_range(ranges: &[FpsRange], bounds: &FpsBounds) -> Option<FpsRange> {
    let range = ranges.iter().copied().find(|range| bounds.contains(range));
    if range.is_none() && !ranges.is_empty() {
        debug!(?ranges, "No suitable FPS range");
    }
    range
}

fn middle_area(half_size: i32) -> Vec<MeteringArea> {
    vec![MeteringArea {
        rect: Rect::new(-half_size, -half_size, half_size, half_size),
        weight: 1,
    }]
}
