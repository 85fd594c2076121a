//! Error types for camera negotiation, frame handling and decoding

use thiserror::Error;

use crate::camera::SessionState;
use crate::geometry::Rect;

/// Result type alias using ScanError
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors surfaced by the scanning library
#[derive(Debug, Error)]
pub enum ScanError {
    /// Camera could not be opened or stopped answering; fatal to the session
    #[error("camera unavailable: {0}")]
    HardwareUnavailable(#[source] DeviceError),

    /// Hardware refused a parameter set, including the safe-mode subset
    #[error("camera rejected parameters: {0}")]
    ParameterRejected(#[source] DeviceError),

    #[error("degenerate scan region {0}")]
    DegenerateGeometry(Rect),

    #[error("operation `{operation}` not allowed while camera is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("rotation of {0} degrees is not a multiple of 90")]
    InvalidRotation(i32),

    #[error("bad frame: {0}")]
    Frame(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("decode worker stopped unexpectedly")]
    WorkerGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors reported by a camera driver behind the hardware boundary
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("parameter rejected: {0}")]
    Rejected(String),

    #[error("preview is not running")]
    NotStreaming,

    #[error("device i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure inside a decode engine, as opposed to "nothing found"
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine failure: {0}")]
    Internal(String),

    #[error("engine panicked: {0}")]
    Panicked(String),
}
