//! Dense 3D scalar grids.

use crate::transform::Transform3;
use nalgebra::Vector3;

/// A dense grid of double-precision scalars with a rectilinear world transform.
///
/// Used for the segmentation mask fed into [`crate::marching_cubes`] and
/// [`crate::centerline`], and as the generic lattice type for
/// [`crate::graphcut`] (via its own `values()` accessor).
#[derive(Clone, Debug)]
pub struct Scalar3DImage {
    size: [usize; 3],
    values: Vec<f64>,
    transform: Transform3,
}

impl Scalar3DImage {
    /// Creates a new image of the given size, filled with `fill_value`.
    pub fn new(size: [usize; 3], fill_value: f64, transform: Transform3) -> Self {
        let num_values = size[0] * size[1] * size[2];
        Self {
            size,
            values: vec![fill_value; num_values],
            transform,
        }
    }

    /// Size of the grid along each axis `(nx, ny, nz)`.
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// Total number of voxels. Invariant: `num_values == nx * ny * nz`.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn transform(&self) -> &Transform3 {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut Transform3 {
        &mut self.transform
    }

    #[inline]
    fn list_id(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.size[1] + y) * self.size[0] + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f64 {
        self.values[self.list_id(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, v: f64) {
        let idx = self.list_id(x, y, z);
        self.values[idx] = v;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Minimum voxel value, used by marching cubes to fill padding.
    pub fn min_value(&self) -> f64 {
        self.values.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    /// World-space position of voxel `(x, y, z)`.
    pub fn world_position(&self, x: usize, y: usize, z: usize) -> Vector3<f64> {
        self.transform
            .to_world(Vector3::new(x as f64, y as f64, z as f64))
    }

    /// Object-space (fractional grid index) coordinate of a world point.
    pub fn object_position(&self, world: Vector3<f64>) -> Vector3<f64> {
        self.transform.to_object(world)
    }

    /// Nearest-voxel lookup of the grid value at a world position, clamped to bounds.
    pub fn nearest_value_at_world(&self, world: Vector3<f64>) -> f64 {
        let obj = self.object_position(world);
        let x = (obj.x.round() as isize).clamp(0, self.size[0] as isize - 1) as usize;
        let y = (obj.y.round() as isize).clamp(0, self.size[1] as isize - 1) as usize;
        let z = (obj.z.round() as isize).clamp(0, self.size[2] as isize - 1) as usize;
        self.get(x, y, z)
    }

    /// Trilinear interpolation of the grid value at a world position.
    ///
    /// Out-of-bounds object coordinates are clamped to the valid range, the
    /// same policy `original_source`'s `interpolate()` uses for segmentation
    /// probing in `MeasuringPlane::sample_segmentation_from_vessel_segmentation`.
    pub fn interpolate(&self, world: Vector3<f64>) -> f64 {
        let obj = self.object_position(world);

        let nx = self.size[0] as f64 - 1.0;
        let ny = self.size[1] as f64 - 1.0;
        let nz = self.size[2] as f64 - 1.0;

        let ox = obj.x.clamp(0.0, nx.max(0.0));
        let oy = obj.y.clamp(0.0, ny.max(0.0));
        let oz = obj.z.clamp(0.0, nz.max(0.0));

        let x0 = ox.floor() as usize;
        let y0 = oy.floor() as usize;
        let z0 = oz.floor() as usize;
        let x1 = (x0 + 1).min(self.size[0] - 1);
        let y1 = (y0 + 1).min(self.size[1] - 1);
        let z1 = (z0 + 1).min(self.size[2] - 1);

        let tx = ox - x0 as f64;
        let ty = oy - y0 as f64;
        let tz = oz - z0 as f64;

        let c00 = self.get(x0, y0, z0) * (1.0 - tx) + self.get(x1, y0, z0) * tx;
        let c10 = self.get(x0, y1, z0) * (1.0 - tx) + self.get(x1, y1, z0) * tx;
        let c01 = self.get(x0, y0, z1) * (1.0 - tx) + self.get(x1, y0, z1) * tx;
        let c11 = self.get(x0, y1, z1) * (1.0 - tx) + self.get(x1, y1, z1) * tx;

        let c0 = c00 * (1.0 - ty) + c10 * ty;
        let c1 = c01 * (1.0 - ty) + c11 * ty;

        c0 * (1.0 - tz) + c1 * tz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_world_object_involution() {
        let img = Scalar3DImage::new(
            [4, 4, 4],
            0.0,
            Transform3::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.5, 0.5, 1.0)),
        );
        let w = img.world_position(2, 1, 3);
        let obj = img.object_position(w);
        assert!((obj - Vector3::new(2.0, 1.0, 3.0)).norm() < 1e-9);
    }

    #[test]
    fn trilinear_interpolation_is_exact_on_lattice_points() {
        let mut img = Scalar3DImage::new([3, 3, 3], 0.0, Transform3::NoTransformation);
        img.set(1, 1, 1, 5.0);
        let v = img.interpolate(Vector3::new(1.0, 1.0, 1.0));
        assert!((v - 5.0).abs() < 1e-12);
    }
}
