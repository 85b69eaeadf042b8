//! Time-resolved 3D velocity field.

use crate::transform::Transform3;
use nalgebra::Vector3;

/// A dense 4D grid whose voxel value is a 3-vector velocity in world
/// coordinates (mm/s); the fourth axis is time with scale `dt_ms`.
///
/// Immutable during analysis: every mutating operation on a
/// `FlowImage4D` should instead produce a new instance.
#[derive(Clone, Debug)]
pub struct FlowImage4D {
    size: [usize; 3],
    num_times: usize,
    values: Vec<Vector3<f64>>,
    transform: Transform3,
    dt_ms: f64,
}

impl FlowImage4D {
    pub fn new(size: [usize; 3], num_times: usize, transform: Transform3, dt_ms: f64) -> Self {
        let num_values = size[0] * size[1] * size[2] * num_times;
        Self {
            size,
            num_times,
            values: vec![Vector3::zeros(); num_values],
            transform,
            dt_ms,
        }
    }

    pub fn spatial_size(&self) -> [usize; 3] {
        self.size
    }

    pub fn num_times(&self) -> usize {
        self.num_times
    }

    pub fn dt_ms(&self) -> f64 {
        self.dt_ms
    }

    pub fn transform(&self) -> &Transform3 {
        &self.transform
    }

    #[inline]
    fn list_id(&self, x: usize, y: usize, z: usize, t: usize) -> usize {
        ((t * self.size[2] + z) * self.size[1] + y) * self.size[0] + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize, t: usize) -> Vector3<f64> {
        self.values[self.list_id(x, y, z, t)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, t: usize, v: Vector3<f64>) {
        let idx = self.list_id(x, y, z, t);
        self.values[idx] = v;
    }

    fn nearest_time_index(&self, world_time_ms: f64) -> usize {
        if self.dt_ms <= 0.0 || self.num_times <= 1 {
            return 0;
        }
        let t = (world_time_ms / self.dt_ms).round();
        (t.max(0.0) as usize).min(self.num_times - 1)
    }

    /// Trilinear (space) + nearest-neighbor (time) interpolation of the flow
    /// vector at a world point and world time.
    pub fn flow_vector_at(&self, world_point: Vector3<f64>, world_time_ms: f64) -> Vector3<f64> {
        let t = self.nearest_time_index(world_time_ms);
        let obj = self.transform.to_object(world_point);

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

        let lerp =
            |a: Vector3<f64>, b: Vector3<f64>, s: f64| a * (1.0 - s) + b * s;

        let c00 = lerp(self.get(x0, y0, z0, t), self.get(x1, y0, z0, t), tx);
        let c10 = lerp(self.get(x0, y1, z0, t), self.get(x1, y1, z0, t), tx);
        let c01 = lerp(self.get(x0, y0, z1, t), self.get(x1, y0, z1, t), tx);
        let c11 = lerp(self.get(x0, y1, z1, t), self.get(x1, y1, z1, t), tx);

        let c0 = lerp(c00, c10, ty);
        let c1 = lerp(c01, c11, ty);

        lerp(c0, c1, tz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_time_index_clamps_to_bounds() {
        let img = FlowImage4D::new([2, 2, 2], 4, Transform3::NoTransformation, 10.0);
        assert_eq!(img.nearest_time_index(-5.0), 0);
        assert_eq!(img.nearest_time_index(1000.0), 3);
        assert_eq!(img.nearest_time_index(21.0), 2);
    }

    #[test]
    fn flow_vector_is_exact_on_lattice_points() {
        let mut img = FlowImage4D::new([3, 3, 3], 2, Transform3::NoTransformation, 1.0);
        img.set(1, 1, 1, 0, Vector3::new(1.0, 2.0, 3.0));
        let v = img.flow_vector_at(Vector3::new(1.0, 1.0, 1.0), 0.0);
        assert!((v - Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-12);
    }
}
