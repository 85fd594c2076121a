//! Exclusive ownership of one opened camera and its scan geometry

use std::time::Duration;

use flume::Receiver;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::device::{CameraCapabilities, CameraDevice, Facing, ScreenGeometry};
use super::framing::{compute_framing_rect, manual_framing_rect, FramingInputs, PreviewRectCache};
use super::negotiate::{negotiate, ChosenCameraConfig};
use super::params::{torch_state, ConfigureOutcome, ParameterApplier};
use crate::decode::{DecodeDispatcher, DecodeModePolicy, FrameOutcome};
use crate::error::{ScanError, ScanResult};
use crate::geometry::{Rect, Resolution};
use crate::pipeline::{ScanControl, ScanGeometry, ScanWorker, StatsSnapshot};
use crate::{Config, PipelineConfig};

/// Camera lifecycle. Calls that need a later state than the current one
/// fail with [`ScanError::InvalidState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Closed,
    Open,
    Configured,
    Previewing,
}

/// Everything known about the camera while it is open
struct Opened {
    capabilities: CameraCapabilities,
    chosen: ChosenCameraConfig,
    outcome: Option<ConfigureOutcome>,
    framing: Rect,
}

/// Owns a camera device from open to close.
///
/// Geometry derived here is published to the decode thread through a
/// [`ScanControl`]; the thread itself is started with
/// [`CameraSession::start_decoding`] and fed one frame at a time by
/// [`CameraSession::pump_frame`].
pub struct CameraSession<D: CameraDevice> {
    device: Option<D>,
    state: SessionState,
    applier: ParameterApplier,
    pipeline: PipelineConfig,
    opened: Option<Opened>,
    /// Manual framing size requested before the screen was known
    pending_manual_size: Option<Resolution>,
    preview_rect: PreviewRectCache,
    control: ScanControl,
    worker: Option<ScanWorker>,
}

impl<D: CameraDevice> CameraSession<D> {
    pub fn new(config: &Config) -> Self {
        Self {
            device: None,
            state: SessionState::Closed,
            applier: ParameterApplier::new(config.camera.clone()),
            pipeline: config.pipeline.clone(),
            opened: None,
            pending_manual_size: config.framing.manual_size,
            preview_rect: PreviewRectCache::new(),
            control: ScanControl::new(config.decode.policy),
            worker: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn control(&self) -> &ScanControl {
        &self.control
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn chosen_config(&self) -> Option<&ChosenCameraConfig> {
        self.opened.as_ref().map(|o| &o.chosen)
    }

    pub fn capabilities(&self) -> Option<&CameraCapabilities> {
        self.opened.as_ref().map(|o| &o.capabilities)
    }

    pub fn configure_outcome(&self) -> Option<ConfigureOutcome> {
        self.opened.as_ref().and_then(|o| o.outcome)
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> ScanResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ScanError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Take ownership of `device`, negotiate sizes and rotation against the
    /// screen and compute the scan window.
    #[instrument(skip(self, device))]
    pub fn open(&mut self, mut device: D, screen: ScreenGeometry) -> ScanResult<ChosenCameraConfig> {
        self.require("open", &[SessionState::Closed])?;

        let capabilities = match device.capabilities() {
            Ok(capabilities) => capabilities,
            Err(e) => {
                device.release();
                return Err(ScanError::HardwareUnavailable(e));
            }
        };
        let chosen = negotiate(&capabilities, &screen, capabilities.facing);
        let framing = match self.pending_manual_size {
            Some(size) => manual_framing_rect(screen.resolution, size.width, size.height),
            None => compute_framing_rect(screen.resolution),
        };
        info!(%framing, facing = ?chosen.facing, "Camera opened");

        self.device = Some(device);
        self.opened = Some(Opened {
            capabilities,
            chosen,
            outcome: None,
            framing,
        });
        self.preview_rect.invalidate();
        self.state = SessionState::Open;
        self.publish_geometry();

        Ok(chosen)
    }

    /// Write the desired camera parameters, degrading to safe mode or to no
    /// configuration when the hardware refuses. Never fails on rejection.
    pub fn configure(&mut self) -> ScanResult<ConfigureOutcome> {
        self.require("configure", &[SessionState::Open, SessionState::Configured])?;
        let (Some(device), Some(opened)) = (self.device.as_mut(), self.opened.as_mut()) else {
            return Err(ScanError::InvalidState {
                operation: "configure",
                state: self.state,
            });
        };

        let outcome = self
            .applier
            .configure(device, &opened.capabilities, &opened.chosen);
        info!(?outcome, "Camera configured");
        opened.outcome = Some(outcome);
        self.state = SessionState::Configured;
        Ok(outcome)
    }

    pub fn start_preview(&mut self) -> ScanResult<()> {
        self.require("start_preview", &[SessionState::Configured])?;
        let device = self.device.as_mut().ok_or(ScanError::InvalidState {
            operation: "start_preview",
            state: self.state,
        })?;
        device.start_preview().map_err(ScanError::HardwareUnavailable)?;
        self.state = SessionState::Previewing;
        debug!("Preview started");
        Ok(())
    }

    /// Stop decoding and the preview stream; the camera stays configured
    pub fn stop_preview(&mut self) -> ScanResult<()> {
        self.require("stop_preview", &[SessionState::Previewing])?;
        self.stop_decoding();
        if let Some(device) = self.device.as_mut() {
            device.stop_preview().map_err(ScanError::HardwareUnavailable)?;
        }
        self.state = SessionState::Configured;
        debug!("Preview stopped");
        Ok(())
    }

    /// Start the decode thread, replacing any previous one
    pub fn start_decoding(
        &mut self,
        dispatcher: DecodeDispatcher,
    ) -> ScanResult<Receiver<FrameOutcome>> {
        self.require("start_decoding", &[SessionState::Previewing])?;
        self.stop_decoding();
        let (worker, outcomes) =
            ScanWorker::spawn(dispatcher, self.control.clone(), self.pipeline.decode_core)?;
        self.worker = Some(worker);
        Ok(outcomes)
    }

    fn stop_decoding(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    /// Grab one frame for the decode thread once it is idle.
    ///
    /// Returns `Ok(false)` when the thread stayed busy for `timeout`.
    pub fn pump_frame(&mut self, timeout: Duration) -> ScanResult<bool> {
        self.require("pump_frame", &[SessionState::Previewing])?;
        let (Some(worker), Some(device)) = (self.worker.as_ref(), self.device.as_mut()) else {
            return Err(ScanError::InvalidState {
                operation: "pump_frame",
                state: self.state,
            });
        };

        if !worker.wait_ready(timeout)? {
            return Ok(false);
        }
        let frame = device
            .request_frame()
            .map_err(ScanError::HardwareUnavailable)?;
        worker.submit(frame)?;
        Ok(true)
    }

    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.worker.as_ref().map(ScanWorker::stats)
    }

    /// Scan window in screen coordinates
    pub fn framing_rect(&self) -> Option<Rect> {
        self.opened.as_ref().map(|o| o.framing)
    }

    /// Scan window in upright preview-buffer coordinates
    pub fn framing_rect_in_preview(&mut self) -> Option<Rect> {
        let opened = self.opened.as_ref()?;
        let screen = opened.chosen.screen.resolution;
        Some(self.preview_rect.get(FramingInputs {
            framing: opened.framing,
            camera: opened.chosen.preview_resolution,
            screen,
            portrait: self.pipeline.orientation_lock.is_portrait(screen),
        }))
    }

    /// Replace the scan window. It must have area and lie on the screen.
    pub fn set_framing_rect(&mut self, rect: Rect) -> ScanResult<()> {
        let opened = self.opened.as_mut().ok_or(ScanError::InvalidState {
            operation: "set_framing_rect",
            state: self.state,
        })?;
        let screen = opened.chosen.screen.resolution;
        if Rect::bounds(screen.width, screen.height).intersect(&rect) != Some(rect) {
            return Err(ScanError::DegenerateGeometry(rect));
        }
        opened.framing = rect;
        debug!(%rect, "Framing rect set");
        self.publish_geometry();
        Ok(())
    }

    /// Centre a window of this size on the screen, clamped to fit. Before
    /// the camera is open the size is kept and applied on open.
    pub fn set_manual_framing_size(&mut self, width: u32, height: u32) {
        match self.opened.as_mut() {
            Some(opened) => {
                opened.framing =
                    manual_framing_rect(opened.chosen.screen.resolution, width, height);
                self.publish_geometry();
            }
            None => self.pending_manual_size = Some(Resolution::new(width, height)),
        }
    }

    pub fn set_decode_mode_policy(&self, policy: DecodeModePolicy) {
        info!(?policy, "Decode mode policy changed");
        self.control.set_policy(policy);
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    /// Switch the light, re-deriving exposure compensation with it
    pub fn set_torch(&mut self, on: bool) -> ScanResult<()> {
        self.require("set_torch", &[SessionState::Configured, SessionState::Previewing])?;
        let (Some(device), Some(opened)) = (self.device.as_mut(), self.opened.as_ref()) else {
            return Err(ScanError::InvalidState {
                operation: "set_torch",
                state: self.state,
            });
        };

        let mut parameters = device.parameters().map_err(ScanError::ParameterRejected)?;
        if torch_state(&parameters) == on {
            return Ok(());
        }
        let safe_mode = opened.outcome == Some(ConfigureOutcome::SafeMode);
        self.applier
            .set_torch(&mut parameters, &opened.capabilities, on, safe_mode);
        device
            .set_parameters(&parameters)
            .map_err(ScanError::ParameterRejected)
    }

    pub fn torch_state(&self) -> ScanResult<bool> {
        let device = self.device.as_ref().ok_or(ScanError::InvalidState {
            operation: "torch_state",
            state: self.state,
        })?;
        let parameters = device.parameters().map_err(ScanError::ParameterRejected)?;
        Ok(torch_state(&parameters))
    }

    /// Halt the decode thread, then stop and release the camera. Forgets the
    /// framing rectangle. Safe to call in any state.
    pub fn close(&mut self) {
        self.stop_decoding();
        if let Some(mut device) = self.device.take() {
            if self.state == SessionState::Previewing {
                if let Err(e) = device.stop_preview() {
                    warn!("Failed to stop preview on close: {e}");
                }
            }
            device.release();
            info!("Camera closed");
        }
        self.opened = None;
        self.preview_rect.invalidate();
        self.state = SessionState::Closed;
        self.control.publish_geometry(None);
    }

    fn publish_geometry(&mut self) {
        let geometry = self.framing_rect_in_preview().and_then(|crop| {
            let opened = self.opened.as_ref()?;
            let screen = opened.chosen.screen.resolution;
            Some(ScanGeometry {
                crop,
                rotate_upright: self.pipeline.orientation_lock.is_portrait(screen),
                mirror: opened.chosen.facing == Facing::Front
                    && self.applier.settings().mirror_front_camera,
            })
        });
        debug!(?geometry, "Publishing scan geometry");
        self.control.publish_geometry(geometry);
    }
}

impl<D: CameraDevice> Drop for CameraSession<D> {
    fn drop(&mut self) {
        self.close();
    }
}
