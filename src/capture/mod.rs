pub mod decoder;
pub mod frame;
pub mod v4l2;

pub use decoder::luminance_plane;
pub use frame::{FrameMetadata, PixelFormat, RawFrame};
pub use v4l2::V4l2Camera;
