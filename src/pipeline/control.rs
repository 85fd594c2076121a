//! Settings shared between the camera session and the decode thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use tracing::debug;

use crate::decode::dispatcher::ScanGeometry;
use crate::decode::DecodeModePolicy;

/// Cloneable handle to the scan settings read on every frame.
///
/// Written only by the session (open, reframe, close) and by pause/resume
/// callers; the worker reads lock-free.
#[derive(Clone, Default)]
pub struct ScanControl {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    paused: AtomicBool,
    policy: ArcSwap<DecodeModePolicy>,
    geometry: ArcSwapOption<ScanGeometry>,
}

impl ScanControl {
    pub fn new(policy: DecodeModePolicy) -> Self {
        let control = Self::default();
        control.set_policy(policy);
        control
    }

    /// Drop delivered frames without decoding them until resumed
    pub fn pause(&self) {
        debug!("Scanning paused");
        self.inner.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        debug!("Scanning resumed");
        self.inner.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> DecodeModePolicy {
        **self.inner.policy.load()
    }

    pub fn set_policy(&self, policy: DecodeModePolicy) {
        self.inner.policy.store(Arc::new(policy));
    }

    pub fn geometry(&self) -> Option<Arc<ScanGeometry>> {
        self.inner.geometry.load_full()
    }

    pub fn publish_geometry(&self, geometry: Option<ScanGeometry>) {
        self.inner.geometry.store(geometry.map(Arc::new));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    #[test]
    fn test_clones_share_state() {
        let control = ScanControl::new(DecodeModePolicy::ZbarOnly);
        let worker_side = control.clone();

        control.pause();
        control.set_policy(DecodeModePolicy::DualRace);
        control.publish_geometry(Some(ScanGeometry {
            crop: Rect::new(1, 2, 3, 4),
            rotate_upright: true,
            mirror: false,
        }));

        assert!(worker_side.is_paused());
        assert_eq!(worker_side.policy(), DecodeModePolicy::DualRace);
        assert_eq!(worker_side.geometry().unwrap().crop, Rect::new(1, 2, 3, 4));

        control.resume();
        control.publish_geometry(None);
        assert!(!worker_side.is_paused());
        assert!(worker_side.geometry().is_none());
    }
}
