//! Viewport state preservation.
//!
//! Keeps the user's camera across scene rebuilds. Without a saved camera each
//! rebuild falls back to a default derived from the bin geometry.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::Dimensions;
use crate::render::RenderSurface;
use crate::types::Vec3;

/// Relative change of any bin axis above which a saved camera is dropped.
const RESIZE_RESET_THRESHOLD: f64 = 0.5;

/// An axis dominates when it exceeds the others by this factor.
const DOMINANT_AXIS_FACTOR: f64 = 1.5;

const DEFAULT_EYE_DISTANCE: f64 = 1.5;
const EYE_RATIO_SCALE: f64 = 1.2;

/// Position, look-at target and up direction of the 3-D camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CameraTransform {
    pub eye: Vec3,
    pub center: Vec3,
    pub up: Vec3,
}

impl CameraTransform {
    pub fn is_finite(&self) -> bool {
        self.eye.is_finite() && self.center.is_finite() && self.up.is_finite()
    }
}

impl Default for CameraTransform {
    fn default() -> Self {
        Self {
            eye: Vec3::new(DEFAULT_EYE_DISTANCE, DEFAULT_EYE_DISTANCE, DEFAULT_EYE_DISTANCE),
            center: Vec3::new(0.5, 0.5, 0.5),
            up: Vec3::new(0.0, 0.0, 1.0),
        }
    }
}

/// Holds the last known camera, `None` meaning unset.
#[derive(Clone, Debug, Default)]
pub struct ViewportPreserver {
    saved: Option<CameraTransform>,
}

impl ViewportPreserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a camera reported by the user. Non-finite transforms are ignored.
    pub fn record_external_change(&mut self, transform: CameraTransform) -> bool {
        if !transform.is_finite() {
            eprintln!("⚠️ Ignoring camera transform with non-finite components");
            return false;
        }
        self.saved = Some(transform);
        true
    }

    /// Copies the live camera of the surface, if it reports one.
    pub fn snapshot_from_live_surface(&mut self, surface: &dyn RenderSurface) -> bool {
        match surface.current_camera() {
            Some(camera) => self.record_external_change(camera),
            None => false,
        }
    }

    /// Default camera for a bin, pulled back along a dominant axis.
    pub fn derive_default(bin: &Dimensions) -> CameraTransform {
        let mut camera = CameraTransform::default();
        let max = bin.max_axis();
        let min = bin.min_axis();
        if min <= 0.0 {
            return camera;
        }
        let distance = DEFAULT_EYE_DISTANCE.max(max / min * EYE_RATIO_SCALE);

        let is_wide = bin.width == max && bin.width > bin.length * DOMINANT_AXIS_FACTOR;
        let is_tall =
            bin.height == max && bin.height > bin.length.max(bin.width) * DOMINANT_AXIS_FACTOR;
        let is_long =
            bin.length == max && bin.length > bin.width.max(bin.height) * DOMINANT_AXIS_FACTOR;

        if is_wide {
            camera.eye.y = distance;
        } else if is_tall {
            camera.eye.z = distance;
        } else if is_long {
            camera.eye.x = distance;
        }
        camera
    }

    /// Camera to use for the next rebuild: the saved one or the bin default.
    pub fn camera_for_rebuild(&self, bin: &Dimensions) -> CameraTransform {
        self.saved.unwrap_or_else(|| Self::derive_default(bin))
    }

    /// True when any bin axis changed by more than half its previous size.
    pub fn should_reset_on_resize(old: &Dimensions, new: &Dimensions) -> bool {
        [
            (old.length, new.length),
            (old.width, new.width),
            (old.height, new.height),
        ]
        .into_iter()
        .any(|(before, after)| {
            before <= 0.0 || ((after - before).abs() / before) > RESIZE_RESET_THRESHOLD
        })
    }

    pub fn clear(&mut self) {
        self.saved = None;
    }

    pub fn reset_to_default(&mut self, bin: &Dimensions) -> CameraTransform {
        let camera = Self::derive_default(bin);
        self.saved = Some(camera);
        camera
    }

    pub fn saved(&self) -> Option<CameraTransform> {
        self.saved
    }
}
