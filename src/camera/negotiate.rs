//! Preview size selection and rotation computation

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::device::{CameraCapabilities, Facing, ScreenGeometry};
use crate::geometry::{Orientation, Resolution};

/// Used when the hardware reports no sizes at all
pub const DEFAULT_RESOLUTION: Resolution = Resolution::new(800, 480);

/// Outcome of negotiation, fixed until the camera is reopened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenCameraConfig {
    pub preview_resolution: Resolution,
    pub picture_resolution: Resolution,
    /// Preview resolution with its axes matched to the screen's shape
    pub preview_size_on_screen: Resolution,
    pub clockwise_rotation_needed: Orientation,
    pub screen: ScreenGeometry,
    pub facing: Facing,
}

/// Pick sizes and compute the upright rotation for this camera and screen
pub fn negotiate(
    capabilities: &CameraCapabilities,
    screen: &ScreenGeometry,
    facing: Facing,
) -> ChosenCameraConfig {
    let preview_resolution = find_closely_size(screen.resolution, &capabilities.preview_sizes);
    let picture_resolution = find_closely_size(screen.resolution, &capabilities.picture_sizes);

    let preview_size_on_screen =
        if screen.resolution.is_portrait() == preview_resolution.is_portrait() {
            preview_resolution
        } else {
            preview_resolution.swapped()
        };

    let clockwise_rotation_needed =
        clockwise_rotation_needed(capabilities.mount_orientation, screen.rotation, facing);

    info!(
        preview = %preview_resolution,
        picture = %picture_resolution,
        on_screen = %preview_size_on_screen,
        rotation = %clockwise_rotation_needed,
        "Negotiated camera configuration"
    );

    ChosenCameraConfig {
        preview_resolution,
        picture_resolution,
        preview_size_on_screen,
        clockwise_rotation_needed,
        screen: *screen,
        facing,
    }
}

/// `(360 + mount - screen) % 360`, negated for front cameras
pub fn clockwise_rotation_needed(
    mount: Orientation,
    screen_rotation: Orientation,
    facing: Facing,
) -> Orientation {
    let rotation = mount.minus(screen_rotation);
    match facing {
        Facing::Back => rotation,
        Facing::Front => rotation.inverse(),
    }
}

/// Candidate closest to `target`: aspect ratio first, then Manhattan distance.
///
/// Both target and candidates are compared in landscape form, so a portrait
/// screen matches sensor sizes reported long-edge first. The candidate is
/// returned as the hardware reported it.
pub fn find_closely_size(target: Resolution, candidates: &[Resolution]) -> Resolution {
    let target = target.landscape();
    let chosen = candidates
        .iter()
        .copied()
        .min_by(|a, b| compare_closeness(target, *a, *b));

    match chosen {
        Some(size) => {
            debug!(target = %target, chosen = %size, "Closest supported size");
            size
        }
        None => {
            debug!("No sizes reported, using {}", DEFAULT_RESOLUTION);
            DEFAULT_RESOLUTION
        }
    }
}

fn compare_closeness(target: Resolution, a: Resolution, b: Resolution) -> Ordering {
    let target_ratio = aspect(target);
    let ratio_a = (aspect(a.landscape()) - target_ratio).abs();
    let ratio_b = (aspect(b.landscape()) - target_ratio).abs();
    ratio_a
        .total_cmp(&ratio_b)
        .then_with(|| manhattan(target, a.landscape()).cmp(&manhattan(target, b.landscape())))
}

/// Height over width; zero-width sizes sort last
fn aspect(size: Resolution) -> f32 {
    if size.width == 0 {
        return f32::INFINITY;
    }
    size.height as f32 / size.width as f32
}

fn manhattan(a: Resolution, b: Resolution) -> u64 {
    (a.width as i64 - b.width as i64).unsigned_abs()
        + (a.height as i64 - b.height as i64).unsigned_abs()
}
