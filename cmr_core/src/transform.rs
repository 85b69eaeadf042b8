//! World/object coordinate transformations for rectilinear grids.
//!
//! Collapses the original codebase's deep transformation class hierarchy
//! (`NoTransformation`, `TranslationTransformation`, `TransformationBase`,
//! see `original_source/include/bkDataset/transformation/`) into a single
//! tagged enum with static dispatch, which is the shape used
//! here. Every grid-backed type (`Scalar3DImage`, `FlowImage4D`) owns one
//! [`Transform3`] per spatial axis set.

use nalgebra::Vector3;

/// World/object transformation for a rectilinear (axis-aligned) 3D grid.
///
/// Axes may have independent per-axis scale but never rotate relative to
/// each other.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Transform3 {
    /// Identity: object coordinates equal world coordinates.
    NoTransformation,
    /// Pure translation by `origin`.
    Translation(Vector3<f64>),
    /// Pure per-axis scale.
    Scale(Vector3<f64>),
    /// General rectilinear affine: `world = origin + scale.component_mul(object)`.
    Affine {
        origin: Vector3<f64>,
        scale: Vector3<f64>,
    },
}

impl Default for Transform3 {
    fn default() -> Self {
        Transform3::NoTransformation
    }
}

impl Transform3 {
    /// Builds the general affine case from an origin and per-axis scale.
    pub fn new(origin: Vector3<f64>, scale: Vector3<f64>) -> Self {
        Transform3::Affine { origin, scale }
    }

    /// Per-axis scale, `1.0` for axes that have none (matches `area_per_cell`/
    /// `MeasuringPlane::area_per_cell` style accessors in the original source).
    pub fn scale(&self) -> Vector3<f64> {
        match self {
            Transform3::NoTransformation => Vector3::new(1.0, 1.0, 1.0),
            Transform3::Translation(_) => Vector3::new(1.0, 1.0, 1.0),
            Transform3::Scale(s) => *s,
            Transform3::Affine { scale, .. } => *scale,
        }
    }

    /// Origin of the transform in world coordinates.
    pub fn origin(&self) -> Vector3<f64> {
        match self {
            Transform3::NoTransformation => Vector3::zeros(),
            Transform3::Translation(o) => *o,
            Transform3::Scale(_) => Vector3::zeros(),
            Transform3::Affine { origin, .. } => *origin,
        }
    }

    /// Converts an object-space (grid index, possibly fractional) point to world coordinates.
    #[inline]
    pub fn to_world(&self, p: Vector3<f64>) -> Vector3<f64> {
        match self {
            Transform3::NoTransformation => p,
            Transform3::Translation(origin) => p + origin,
            Transform3::Scale(scale) => p.component_mul(scale),
            Transform3::Affine { origin, scale } => origin + p.component_mul(scale),
        }
    }

    /// Converts a world-space point back to object (grid index) coordinates.
    ///
    /// This is the exact inverse of [`to_world`](Self::to_world); callers rely
    /// on `to_world(to_object(p)) == p` to within `1e-9`.
    #[inline]
    pub fn to_object(&self, p: Vector3<f64>) -> Vector3<f64> {
        match self {
            Transform3::NoTransformation => p,
            Transform3::Translation(origin) => p - origin,
            Transform3::Scale(scale) => {
                Vector3::new(p.x / scale.x, p.y / scale.y, p.z / scale.z)
            }
            Transform3::Affine { origin, scale } => {
                let d = p - origin;
                Vector3::new(d.x / scale.x, d.y / scale.y, d.z / scale.z)
            }
        }
    }

    /// Builds a new transform rescaled uniformly on every axis, used to upscale a
    /// segmentation grid for the intravascular distance map.
    pub fn upscaled(&self, upscale: Vector3<f64>) -> Self {
        let scale = self.scale();
        Transform3::Affine {
            origin: self.origin(),
            scale: Vector3::new(
                scale.x / upscale.x,
                scale.y / upscale.y,
                scale.z / upscale.z,
            ),
        }
    }
}

/// Oriented 2D+time measuring-plane transform.
///
/// Unlike [`Transform3`] this is not one of the rectilinear
/// `NoTransformation | Translation | Scale | Affine` cases: a measuring
/// plane is rotated to be perpendicular to the centerline tangent, so its
/// spatial basis is a genuine (non axis-aligned) orthonormal frame. It is
/// kept as its own small type rather than folded into `Transform3` to
/// avoid smuggling rotation into the rectilinear-grid abstraction that the
/// rest of the crate deliberately restrict to
/// orthogonal axes.
#[derive(Clone, Copy, Debug)]
pub struct PlaneTransform {
    /// World position corresponding to object coordinate (0, 0).
    pub origin: Vector3<f64>,
    /// World-space direction of +1 step along object x, already scaled by `sx` (mm).
    pub x_axis: Vector3<f64>,
    /// World-space direction of +1 step along object y, already scaled by `sy` (mm).
    pub y_axis: Vector3<f64>,
    /// Unit plane normal, i.e. the third column of the plane's rotation matrix.
    pub normal: Vector3<f64>,
    /// Time-axis scale Δt (ms) mapping object time index to world time.
    pub dt_ms: f64,
}

impl PlaneTransform {
    /// Maps object pixel coordinates `(x, y)` to a 3D world point.
    #[inline]
    pub fn to_world_space(&self, x: f64, y: f64) -> Vector3<f64> {
        self.origin + self.x_axis * x + self.y_axis * y
    }

    /// Maps an object time index to world time in milliseconds.
    #[inline]
    pub fn to_world_time(&self, t: f64) -> f64 {
        t * self.dt_ms
    }

    /// Area (mm²) covered by one plane cell, used for flow-rate integration.
    pub fn area_per_cell(&self) -> f64 {
        self.x_axis.norm() * self.y_axis.norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_object_roundtrip_is_involution() {
        let t = Transform3::new(Vector3::new(1.0, -2.0, 0.5), Vector3::new(0.5, 2.0, 1.5));
        let p = Vector3::new(3.0, 4.0, 5.0);
        let back = t.to_object(t.to_world(p));
        assert!((back - p).norm() < 1e-9);
        let world = t.to_world(t.to_object(p));
        assert!((world - p).norm() < 1e-9);
    }

    #[test]
    fn no_transformation_is_identity() {
        let t = Transform3::NoTransformation;
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(t.to_world(p), p);
        assert_eq!(t.to_object(p), p);
    }
}
