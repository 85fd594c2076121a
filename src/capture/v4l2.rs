//! V4L2 camera backend with MMAP streaming

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Description as ControlDescription, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{FrameMetadata, PixelFormat, RawFrame};
use crate::camera::{
    CameraCapabilities, CameraDevice, CameraParameters, ColorEffect, ExposureRange, FlashMode,
    FocusMode, FpsRange, SceneMode,
};
use crate::error::DeviceError;
use crate::geometry::Resolution;
use crate::utils::FoundDevice;
use crate::CameraConfig;

// Control ids from linux/v4l2-controls.h
const CID_FOCUS_AUTO: u32 = 0x009a_090c;
const CID_AUTO_FOCUS_START: u32 = 0x009a_091c;
const CID_ZOOM_ABSOLUTE: u32 = 0x009a_090d;
const CID_AUTO_EXPOSURE_BIAS: u32 = 0x009a_0913;
const CID_SCENE_MODE: u32 = 0x009a_091a;
const CID_IMAGE_STABILIZATION: u32 = 0x009a_0916;
const CID_COLORFX: u32 = 0x0098_091f;
const CID_FLASH_LED_MODE: u32 = 0x009c_0901;

/// Exposure bias is reported in thousandths of an EV
const EXPOSURE_BIAS_UNIT_EV: f32 = 0.001;

/// A V4L2 capture device driven as a one-frame-at-a-time preview camera
pub struct V4l2Camera {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    format: PixelFormat,
    fourcc: FourCC,
    buffer_count: u32,
    controls: Vec<ControlDescription>,
    capabilities: CameraCapabilities,
    /// Last parameter set the driver accepted
    current: CameraParameters,
    /// Frame geometry of the active format
    resolution: Resolution,
    stride: u32,
    sequence: u64,
}

impl V4l2Camera {
    /// Open the device and enumerate what it supports for `found.format`
    #[instrument(skip(config))]
    pub fn open(found: &FoundDevice, config: &CameraConfig) -> Result<Self, DeviceError> {
        let device = Device::with_path(&found.path)
            .map_err(|e| DeviceError::NotFound(format!("{}: {e}", found.path)))?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(DeviceError::NotFound(format!(
                "{} does not support video capture",
                found.path
            )));
        }

        let fourcc = fourcc(found.format);
        let controls = device.query_controls().unwrap_or_else(|e| {
            warn!("Could not enumerate controls: {e}");
            Vec::new()
        });

        let sizes = frame_sizes(&device, fourcc)?;
        let mut active = device.format()?;
        if active.fourcc != fourcc {
            active.fourcc = fourcc;
            active = device.set_format(&active)?;
        }
        let resolution = Resolution::new(active.width, active.height);
        let fps_ranges = frame_rates(&device, fourcc, resolution);

        let capabilities = CameraCapabilities {
            picture_sizes: sizes.clone(),
            preview_sizes: sizes,
            focus_modes: focus_modes(&controls),
            flash_modes: flash_modes(&controls),
            scene_modes: scene_modes(&controls),
            color_effects: color_effects(&controls),
            exposure: exposure_range(&controls),
            fps_ranges,
            video_stabilization: find_control(&controls, CID_IMAGE_STABILIZATION).is_some(),
            facing: config.facing,
            mount_orientation: config.mount_orientation,
            ..zoom_capabilities(&controls)
        };
        debug!(?capabilities, "Camera capabilities");

        let mut camera = Self {
            device: Box::new(device),
            stream: None,
            format: found.format,
            fourcc,
            buffer_count: config.buffer_count.max(1),
            controls,
            capabilities,
            current: CameraParameters::default(),
            resolution,
            stride: stride_pixels(found.format, &active),
            sequence: 0,
        };
        camera.current = camera.read_parameters();
        Ok(camera)
    }

    fn read_parameters(&self) -> CameraParameters {
        let integer = |id| match self.device.control(id) {
            Ok(Control {
                value: Value::Integer(v),
                ..
            }) => Some(v),
            Ok(Control {
                value: Value::Boolean(b),
                ..
            }) => Some(b as i64),
            _ => None,
        };

        let focus_mode = integer(CID_FOCUS_AUTO).map(|v| {
            if v != 0 {
                FocusMode::ContinuousVideo
            } else {
                FocusMode::Auto
            }
        });
        let zoom_index = integer(CID_ZOOM_ABSOLUTE)
            .zip(find_control(&self.controls, CID_ZOOM_ABSOLUTE))
            .map(|(v, d)| ((v - d.minimum) / d.step.max(1) as i64).max(0) as u32)
            .unwrap_or(0);
        let exposure_compensation = integer(CID_AUTO_EXPOSURE_BIAS)
            .zip(find_control(&self.controls, CID_AUTO_EXPOSURE_BIAS))
            .map(|(v, d)| (v / d.step.max(1) as i64) as i32)
            .unwrap_or(0);

        CameraParameters {
            preview_size: Some(self.resolution),
            picture_size: Some(self.resolution),
            focus_mode,
            flash_mode: integer(CID_FLASH_LED_MODE).and_then(flash_from_v4l2),
            scene_mode: integer(CID_SCENE_MODE).and_then(scene_from_v4l2),
            color_effect: integer(CID_COLORFX).and_then(effect_from_v4l2),
            zoom_index,
            exposure_compensation,
            video_stabilization: integer(CID_IMAGE_STABILIZATION).is_some_and(|v| v != 0),
            ..Default::default()
        }
    }

    fn write_control(&self, id: u32, value: i64) -> Result<(), DeviceError> {
        let Some(description) = find_control(&self.controls, id) else {
            return Err(DeviceError::Rejected(format!("control {id:#x} not present")));
        };
        let value = if matches!(description.typ, v4l::control::Type::Boolean) {
            Value::Boolean(value != 0)
        } else {
            Value::Integer(value)
        };
        self.device
            .set_control(Control { id, value })
            .map_err(|e| DeviceError::Rejected(format!("{}: {e}", description.name)))
    }

    fn apply_size(&mut self, size: Resolution) -> Result<(), DeviceError> {
        if size == self.resolution {
            return Ok(());
        }
        if self.stream.is_some() {
            return Err(DeviceError::Rejected(
                "cannot change preview size while streaming".into(),
            ));
        }

        let mut fmt = self.device.format()?;
        fmt.width = size.width;
        fmt.height = size.height;
        fmt.fourcc = self.fourcc;
        let applied = self.device.set_format(&fmt)?;
        if applied.width != size.width || applied.height != size.height {
            return Err(DeviceError::Rejected(format!(
                "driver chose {}x{} instead of {size}",
                applied.width, applied.height
            )));
        }

        self.resolution = size;
        self.stride = stride_pixels(self.format, &applied);
        info!(%size, stride = self.stride, "Capture format set");
        Ok(())
    }
}

impl CameraDevice for V4l2Camera {
    fn capabilities(&self) -> Result<CameraCapabilities, DeviceError> {
        Ok(self.capabilities.clone())
    }

    fn parameters(&self) -> Result<CameraParameters, DeviceError> {
        Ok(self.current.clone())
    }

    fn set_parameters(&mut self, parameters: &CameraParameters) -> Result<(), DeviceError> {
        if let Some(size) = parameters.preview_size {
            self.apply_size(size)?;
            self.current.preview_size = Some(size);
            self.current.picture_size = Some(size);
        }

        // `current` follows every accepted write so a later restore diffs
        // against what the driver really holds
        let writes = plan_writes(&self.current, parameters, &self.controls)?;
        let mut current = self.current.clone();
        let result = apply_writes(&mut current, parameters, &writes, |id, value| {
            self.write_control(id, value)
        });
        self.current = current;
        result?;

        if parameters.preview_fps_range != self.current.preview_fps_range {
            if let Some(range) = parameters.preview_fps_range {
                let fps = (range.max_millis / 1000).max(1);
                self.device.set_params(&Parameters::with_fps(fps))?;
            }
        }

        // V4L2 has no focus or metering regions
        if !parameters.focus_areas.is_empty() || !parameters.metering_areas.is_empty() {
            debug!("Ignoring focus/metering areas");
        }

        self.current = parameters.clone();
        Ok(())
    }

    fn start_preview(&mut self) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;
        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }

    fn stop_preview(&mut self) -> Result<(), DeviceError> {
        if self.stream.take().is_some() {
            info!(frames = self.sequence, "Capture stream stopped");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(seq = self.sequence))]
    fn request_frame(&mut self) -> Result<RawFrame, DeviceError> {
        let timestamp = Instant::now();
        let stream = self.stream.as_mut().ok_or(DeviceError::NotStreaming)?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };

        // Copied out because the driver recycles the buffer on the next dequeue
        let data = Bytes::copy_from_slice(&buf[..used]);
        self.sequence += 1;

        let frame_meta = Arc::new(FrameMetadata {
            sequence: self.sequence,
            width: self.resolution.width,
            height: self.resolution.height,
            stride: self.stride,
            format: self.format,
        });

        Ok(RawFrame {
            data,
            meta: frame_meta,
            timestamp,
        })
    }

    fn release(&mut self) {
        self.stream = None;
        debug!("Camera released");
    }
}

/// Parameter field a control write carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Setting {
    Focus,
    Flash,
    Scene,
    Effect,
    Zoom,
    Exposure,
    Stabilization,
}

impl Setting {
    fn copy(self, from: &CameraParameters, to: &mut CameraParameters) {
        match self {
            Self::Focus => to.focus_mode = from.focus_mode,
            Self::Flash => to.flash_mode = from.flash_mode,
            Self::Scene => to.scene_mode = from.scene_mode,
            Self::Effect => to.color_effect = from.color_effect,
            Self::Zoom => to.zoom_index = from.zoom_index,
            Self::Exposure => to.exposure_compensation = from.exposure_compensation,
            Self::Stabilization => to.video_stabilization = from.video_stabilization,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ControlWrite {
    id: u32,
    value: i64,
    setting: Setting,
}

/// Control writes that take the driver from `old` to `new`
fn plan_writes(
    old: &CameraParameters,
    new: &CameraParameters,
    controls: &[ControlDescription],
) -> Result<Vec<ControlWrite>, DeviceError> {
    let mut writes = Vec::new();
    let mut push = |id, value, setting| writes.push(ControlWrite { id, value, setting });

    if new.focus_mode != old.focus_mode {
        match new.focus_mode {
            Some(FocusMode::ContinuousPicture | FocusMode::ContinuousVideo) => {
                push(CID_FOCUS_AUTO, 1, Setting::Focus)
            }
            Some(FocusMode::Auto | FocusMode::Macro) => {
                push(CID_FOCUS_AUTO, 0, Setting::Focus);
                if find_control(controls, CID_AUTO_FOCUS_START).is_some() {
                    push(CID_AUTO_FOCUS_START, 1, Setting::Focus);
                }
            }
            Some(FocusMode::Fixed | FocusMode::Infinity | FocusMode::Edof) => {
                push(CID_FOCUS_AUTO, 0, Setting::Focus)
            }
            None => {}
        }
    }

    if new.flash_mode != old.flash_mode {
        if let Some(value) = new.flash_mode.and_then(flash_to_v4l2) {
            push(CID_FLASH_LED_MODE, value, Setting::Flash);
        }
    }
    if new.scene_mode != old.scene_mode {
        if let Some(value) = new.scene_mode.and_then(scene_to_v4l2) {
            push(CID_SCENE_MODE, value, Setting::Scene);
        }
    }
    if new.color_effect != old.color_effect {
        if let Some(effect) = new.color_effect {
            push(CID_COLORFX, effect_to_v4l2(effect), Setting::Effect);
        }
    }

    if new.zoom_index != old.zoom_index {
        let description = find_control(controls, CID_ZOOM_ABSOLUTE)
            .ok_or_else(|| DeviceError::Rejected("zoom not supported".into()))?;
        let value = description.minimum + new.zoom_index as i64 * description.step.max(1) as i64;
        push(CID_ZOOM_ABSOLUTE, value, Setting::Zoom);
    }

    if new.exposure_compensation != old.exposure_compensation {
        let description = find_control(controls, CID_AUTO_EXPOSURE_BIAS)
            .ok_or_else(|| DeviceError::Rejected("exposure bias not supported".into()))?;
        let value = new.exposure_compensation as i64 * description.step.max(1) as i64;
        push(CID_AUTO_EXPOSURE_BIAS, value, Setting::Exposure);
    }

    if new.video_stabilization != old.video_stabilization
        && find_control(controls, CID_IMAGE_STABILIZATION).is_some()
    {
        push(
            CID_IMAGE_STABILIZATION,
            new.video_stabilization as i64,
            Setting::Stabilization,
        );
    }

    Ok(writes)
}

/// Perform `writes` in order, copying each accepted setting from `target`
/// into `current`. Stops at the first rejected write.
fn apply_writes(
    current: &mut CameraParameters,
    target: &CameraParameters,
    writes: &[ControlWrite],
    mut write: impl FnMut(u32, i64) -> Result<(), DeviceError>,
) -> Result<(), DeviceError> {
    for w in writes {
        write(w.id, w.value)?;
        w.setting.copy(target, current);
    }
    Ok(())
}

/// Driver row pitch converted from bytes to pixels
fn stride_pixels(format: PixelFormat, fmt: &v4l::Format) -> u32 {
    match format {
        PixelFormat::Yuyv => fmt.stride / 2,
        PixelFormat::Rgb24 => fmt.stride / 3,
        PixelFormat::Mjpeg => fmt.width,
        _ => fmt.stride,
    }
    .max(fmt.width)
}

pub fn fourcc(format: PixelFormat) -> FourCC {
    FourCC::new(match format {
        PixelFormat::Nv21 => b"NV21",
        PixelFormat::Nv12 => b"NV12",
        PixelFormat::Yuv420p => b"YU12",
        PixelFormat::Yuyv => b"YUYV",
        PixelFormat::Gray8 => b"GREY",
        PixelFormat::Rgb24 => b"RGB3",
        PixelFormat::Mjpeg => b"MJPG",
    })
}

pub fn pixel_format(fourcc: FourCC) -> Option<PixelFormat> {
    Some(match &fourcc.repr {
        b"NV21" => PixelFormat::Nv21,
        b"NV12" => PixelFormat::Nv12,
        b"YU12" => PixelFormat::Yuv420p,
        b"YUYV" => PixelFormat::Yuyv,
        b"GREY" => PixelFormat::Gray8,
        b"RGB3" => PixelFormat::Rgb24,
        b"MJPG" => PixelFormat::Mjpeg,
        _ => return None,
    })
}

fn frame_sizes(device: &Device, fourcc: FourCC) -> Result<Vec<Resolution>, DeviceError> {
    let mut sizes = Vec::new();
    for size in device.enum_framesizes(fourcc)? {
        match size.size {
            FrameSizeEnum::Discrete(d) => sizes.push(Resolution::new(d.width, d.height)),
            FrameSizeEnum::Stepwise(s) => {
                sizes.push(Resolution::new(s.min_width, s.min_height));
                sizes.push(Resolution::new(s.max_width, s.max_height));
            }
        }
    }
    sizes.dedup();
    Ok(sizes)
}

fn frame_rates(device: &Device, fourcc: FourCC, size: Resolution) -> Vec<FpsRange> {
    let Ok(intervals) = device.enum_frameintervals(fourcc, size.width, size.height) else {
        return Vec::new();
    };
    intervals
        .into_iter()
        .filter_map(|interval| match interval.interval {
            FrameIntervalEnum::Discrete(f) if f.numerator > 0 => {
                let fps = f.denominator / f.numerator;
                Some(FpsRange::from_fps(fps, fps))
            }
            FrameIntervalEnum::Stepwise(s) if s.min.numerator > 0 && s.max.numerator > 0 => {
                Some(FpsRange::from_fps(
                    s.max.denominator / s.max.numerator,
                    s.min.denominator / s.min.numerator,
                ))
            }
            _ => None,
        })
        .collect()
}

fn find_control(controls: &[ControlDescription], id: u32) -> Option<&ControlDescription> {
    controls.iter().find(|c| c.id == id)
}

/// Menu values the driver lists for a control, or its whole integer range
fn control_values(controls: &[ControlDescription], id: u32) -> Vec<i64> {
    let Some(description) = find_control(controls, id) else {
        return Vec::new();
    };
    match &description.items {
        Some(items) => items.iter().map(|(index, _)| *index as i64).collect(),
        None => (description.minimum..=description.maximum).collect(),
    }
}

fn focus_modes(controls: &[ControlDescription]) -> Vec<FocusMode> {
    if find_control(controls, CID_FOCUS_AUTO).is_some() {
        vec![FocusMode::Auto, FocusMode::ContinuousVideo, FocusMode::Fixed]
    } else {
        vec![FocusMode::Fixed]
    }
}

fn flash_modes(controls: &[ControlDescription]) -> Vec<FlashMode> {
    control_values(controls, CID_FLASH_LED_MODE)
        .into_iter()
        .filter_map(flash_from_v4l2)
        .collect()
}

fn scene_modes(controls: &[ControlDescription]) -> Vec<SceneMode> {
    control_values(controls, CID_SCENE_MODE)
        .into_iter()
        .filter_map(scene_from_v4l2)
        .collect()
}

fn color_effects(controls: &[ControlDescription]) -> Vec<ColorEffect> {
    control_values(controls, CID_COLORFX)
        .into_iter()
        .filter_map(effect_from_v4l2)
        .collect()
}

fn exposure_range(controls: &[ControlDescription]) -> ExposureRange {
    find_control(controls, CID_AUTO_EXPOSURE_BIAS)
        .map(|d| {
            let step = d.step.max(1) as i64;
            ExposureRange {
                min: (d.minimum / step) as i32,
                max: (d.maximum / step) as i32,
                step: step as f32 * EXPOSURE_BIAS_UNIT_EV,
            }
        })
        .unwrap_or_default()
}

/// Zoom table from the absolute zoom control, ratios relative to its minimum
fn zoom_capabilities(controls: &[ControlDescription]) -> CameraCapabilities {
    let Some(d) = find_control(controls, CID_ZOOM_ABSOLUTE).filter(|d| d.minimum > 0) else {
        return CameraCapabilities::default();
    };
    let step = d.step.max(1) as usize;
    let zoom_ratios: Vec<u32> = (d.minimum..=d.maximum)
        .step_by(step)
        .map(|value| (value * 100 / d.minimum) as u32)
        .collect();
    CameraCapabilities {
        zoom_supported: zoom_ratios.len() > 1,
        max_zoom: zoom_ratios.len().saturating_sub(1) as u32,
        zoom_ratios,
        ..Default::default()
    }
}

fn flash_from_v4l2(value: i64) -> Option<FlashMode> {
    match value {
        0 => Some(FlashMode::Off),
        1 => Some(FlashMode::On),
        2 => Some(FlashMode::Torch),
        _ => None,
    }
}

fn flash_to_v4l2(mode: FlashMode) -> Option<i64> {
    match mode {
        FlashMode::Off => Some(0),
        FlashMode::On => Some(1),
        FlashMode::Torch => Some(2),
        FlashMode::Auto | FlashMode::RedEye => None,
    }
}

// V4L2 has no barcode scene; the text scene is the closest match
fn scene_from_v4l2(value: i64) -> Option<SceneMode> {
    match value {
        0 => Some(SceneMode::Auto),
        8 => Some(SceneMode::Night),
        11 => Some(SceneMode::Sports),
        13 => Some(SceneMode::Barcode),
        _ => None,
    }
}

fn scene_to_v4l2(mode: SceneMode) -> Option<i64> {
    match mode {
        SceneMode::Auto => Some(0),
        SceneMode::Night => Some(8),
        SceneMode::Sports | SceneMode::Action => Some(11),
        SceneMode::Barcode => Some(13),
    }
}

fn effect_from_v4l2(value: i64) -> Option<ColorEffect> {
    match value {
        0 => Some(ColorEffect::None),
        1 => Some(ColorEffect::Mono),
        2 => Some(ColorEffect::Sepia),
        3 => Some(ColorEffect::Negative),
        _ => None,
    }
}

fn effect_to_v4l2(effect: ColorEffect) -> i64 {
    match effect {
        ColorEffect::None => 0,
        ColorEffect::Mono => 1,
        ColorEffect::Sepia => 2,
        ColorEffect::Negative => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping_round_trips() {
        for format in [
            PixelFormat::Nv21,
            PixelFormat::Nv12,
            PixelFormat::Yuv420p,
            PixelFormat::Yuyv,
            PixelFormat::Gray8,
            PixelFormat::Rgb24,
            PixelFormat::Mjpeg,
        ] {
            assert_eq!(pixel_format(fourcc(format)), Some(format));
        }
        assert_eq!(pixel_format(FourCC::new(b"H264")), None);
    }

    #[test]
    fn test_control_value_mappings() {
        assert_eq!(flash_to_v4l2(FlashMode::Torch), Some(2));
        assert_eq!(flash_from_v4l2(2), Some(FlashMode::Torch));
        assert_eq!(effect_to_v4l2(ColorEffect::Negative), 3);
        assert_eq!(scene_to_v4l2(SceneMode::Barcode), Some(13));
        assert_eq!(scene_from_v4l2(13), Some(SceneMode::Barcode));
    }

    #[test]
    fn test_partial_write_keeps_track_of_accepted_controls() {
        let before = CameraParameters {
            focus_mode: Some(FocusMode::Fixed),
            flash_mode: Some(FlashMode::Off),
            scene_mode: Some(SceneMode::Auto),
            ..Default::default()
        };
        let wanted = CameraParameters {
            focus_mode: Some(FocusMode::ContinuousVideo),
            flash_mode: Some(FlashMode::Torch),
            scene_mode: Some(SceneMode::Barcode),
            ..Default::default()
        };

        let writes = plan_writes(&before, &wanted, &[]).unwrap();
        assert_eq!(writes.len(), 3);

        let mut current = before.clone();
        let mut written = Vec::new();
        let result = apply_writes(&mut current, &wanted, &writes, |id, value| {
            if id == CID_FLASH_LED_MODE {
                return Err(DeviceError::Rejected("flash busy".into()));
            }
            written.push((id, value));
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(written, vec![(CID_FOCUS_AUTO, 1)]);
        assert_eq!(current.focus_mode, Some(FocusMode::ContinuousVideo));
        assert_eq!(current.flash_mode, Some(FlashMode::Off));
        assert_eq!(current.scene_mode, Some(SceneMode::Auto));

        // Restoring the snapshot has to undo the focus write
        let restore = plan_writes(&current, &before, &[]).unwrap();
        assert_eq!(
            restore.iter().map(|w| (w.id, w.value)).collect::<Vec<_>>(),
            vec![(CID_FOCUS_AUTO, 0)]
        );
    }
}
