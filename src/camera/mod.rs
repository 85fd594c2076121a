pub mod device;
pub mod framing;
pub mod negotiate;
pub mod params;
pub mod session;

pub use device::{
    CameraCapabilities, CameraDevice, CameraParameters, ColorEffect, ExposureRange, Facing,
    FlashMode, FocusMode, FpsRange, MeteringArea, SceneMode, ScreenGeometry,
};
pub use framing::{compute_framing_rect, compute_framing_rect_in_preview, FramingInputs, PreviewRectCache};
pub use negotiate::{negotiate, ChosenCameraConfig};
pub use params::{ConfigureOutcome, ParameterApplier};
pub use session::{CameraSession, SessionState};
