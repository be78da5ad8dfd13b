//! Common types and traits for 3D geometry.
//!
//! This module defines the small vector type used for camera transforms and
//! item positions, plus the `Dimensional` trait shared by items, placements
//! and bins.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::Dimensions;

/// Numerical tolerance for floating-point comparisons in tests.
#[cfg(test)]
pub(crate) const EPSILON_GENERAL: f64 = 1e-6;

/// Represents a 3D vector or point in space.
///
/// Used for positions and camera vectors.
///
/// # Examples
/// ```
/// use packing_dashboard::types::Vec3;
///
/// let eye = Vec3::new(1.5, 1.5, 1.5);
/// assert!(eye.is_finite());
/// assert!(!Vec3::new(f64::NAN, 0.0, 0.0).is_finite());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Creates a new 3D vector.
    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Checks that no component is NaN or infinite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Trait for objects with 3D extent (length, width, height).
pub trait Dimensional {
    /// Returns the dimensions of the object.
    fn dimensions(&self) -> Dimensions;

    /// Calculates the volume.
    fn volume(&self) -> f64 {
        let d = self.dimensions();
        d.length * d.width * d.height
    }

    /// Checks axis by axis whether this object exceeds the given bin.
    ///
    /// No rotation is attempted; rotation feasibility belongs to the packing service.
    fn exceeds(&self, bin: &Dimensions) -> bool {
        let d = self.dimensions();
        d.length > bin.length || d.width > bin.width || d.height > bin.height
    }
}

impl Dimensional for Dimensions {
    fn dimensions(&self) -> Dimensions {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_is_finite() {
        assert!(Vec3::new(0.0, 0.0, 0.0).is_finite());
        assert!(!Vec3::new(f64::NAN, 0.0, 0.0).is_finite());
        assert!(!Vec3::new(0.0, f64::INFINITY, 0.0).is_finite());
    }

    #[test]
    fn test_dimensional_volume_and_exceeds() {
        let item = Dimensions::new(4.0, 3.0, 2.0);
        let bin = Dimensions::new(10.0, 8.0, 6.0);

        assert!((item.volume() - 24.0).abs() < EPSILON_GENERAL);
        assert!(!item.exceeds(&bin));
        assert!(Dimensions::new(12.0, 3.0, 2.0).exceeds(&bin));
        // Equal edges still fit.
        assert!(!Dimensions::new(10.0, 8.0, 6.0).exceeds(&bin));
    }
}
