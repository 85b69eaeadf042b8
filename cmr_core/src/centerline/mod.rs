//! Centerline extraction through a vessel lumen, grounded in
//! `original_source/src/bkCMR/CenterlineExtractor.cpp` and
//! `original_source/include/bkDataset/line/Line3D.h`.

use crate::image::Scalar3DImage;
use crate::mesh::TriMesh3d;
use crate::mesh::attributes::{AttributeData, AttributeKind};
use crate::new_map;
use crate::smoothing::{smooth_binomial, smooth_lambda_mu};
use crate::transform::Transform3;
use crate::MapType;
use log::warn;
use nalgebra::{Matrix3, Rotation3, Unit, Vector3};
use std::collections::VecDeque;

/// Tunable knobs for [`extract`].
#[derive(Clone, Copy, Debug)]
pub struct CenterlineParameters {
    pub image_upscale: u32,
    pub distance_penalty_exponent: i32,
    pub num_smooth_iterations: u32,
    pub smooth_kernel_size: u32,
    pub smooth_relaxation: f64,
}

impl Default for CenterlineParameters {
    fn default() -> Self {
        Self {
            image_upscale: 3,
            distance_penalty_exponent: 5,
            num_smooth_iterations: 500,
            smooth_kernel_size: 3,
            smooth_relaxation: 0.1,
        }
    }
}

/// A densely sampled centerline with a per-point radius and rotation-minimizing
/// local coordinate frame.
#[derive(Clone, Debug, Default)]
pub struct Line3D {
    points: Vec<Vector3<f64>>,
    attributes: MapType<String, AttributeData>,
}

impl Line3D {
    fn new(points: Vec<Vector3<f64>>) -> Self {
        Self {
            points,
            attributes: new_map(),
        }
    }

    /// Rebuilds a line from decoded geometry and attributes, used by
    /// [`crate::io::line_format`].
    pub(crate) fn from_parts(points: Vec<Vector3<f64>>, attributes: MapType<String, AttributeData>) -> Self {
        Self { points, attributes }
    }

    pub(crate) fn attributes(&self) -> &MapType<String, AttributeData> {
        &self.attributes
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    pub fn radius(&self) -> Option<&[f64]> {
        self.attributes
            .get(AttributeKind::Radius.name())
            .and_then(AttributeData::as_scalar)
    }

    pub fn local_frame(&self, point_index: usize) -> Option<Matrix3<f64>> {
        self.attributes
            .get(AttributeKind::LocalCoordinateSystem.name())
            .and_then(AttributeData::as_frame3)
            .map(|frames| frames[point_index])
    }

    pub fn tangent(&self, point_index: usize) -> Vector3<f64> {
        self.local_frame(point_index)
            .map(|f| f.column(2).into_owned())
            .unwrap_or_else(|| point_tangent(&self.points, point_index))
    }
}

/// Result of [`extract`]: one [`Line3D`] per target that was successfully
/// reached, in the same order as the `targets` slice.
#[derive(Clone, Debug, Default)]
pub struct CenterlineExtractionResult {
    pub lines: Vec<Line3D>,
    pub success: bool,
}

/// Extracts one centerline per target vertex, seeded at `seed` and densely
/// sampled through the lumen described by `segmentation`.
pub fn extract(
    mesh: &mut TriMesh3d,
    segmentation: &Scalar3DImage,
    seed: u32,
    targets: &[u32],
    params: &CenterlineParameters,
) -> CenterlineExtractionResult {
    if targets.is_empty() {
        return CenterlineExtractionResult {
            lines: Vec::new(),
            success: false,
        };
    }
    if !mesh.has_kdtree() {
        mesh.construct_kd_tree();
    }

    let field = DistanceField::build(mesh, segmentation, params);

    let mut lines = Vec::with_capacity(targets.len());
    for &target in targets {
        let seed_world = mesh.point(seed);
        let target_world = mesh.point(target);

        match field.shortest_path(seed_world, target_world) {
            Some(mut points) => {
                smooth_lambda_mu(
                    &mut points,
                    params.num_smooth_iterations,
                    params.smooth_kernel_size,
                    params.smooth_relaxation,
                    params.smooth_relaxation,
                );

                let radius = field.radius_at(&points);
                let frames = rotation_minimizing_frames(&points);

                let mut line = Line3D::new(points);
                line.attributes
                    .insert(AttributeKind::Radius.name().to_string(), AttributeData::Scalar(radius));
                line.attributes.insert(
                    AttributeKind::LocalCoordinateSystem.name().to_string(),
                    AttributeData::Frame3(frames),
                );
                lines.push(line);
            }
            None => {
                warn!("centerline target {} unreachable from seed {}", target, seed);
            }
        }
    }

    CenterlineExtractionResult {
        success: !lines.is_empty(),
        lines,
    }
}

/// 26-connected neighbor offsets (excludes the zero offset).
fn neighbor_offsets() -> impl Iterator<Item = (i64, i64, i64)> {
    (-1..=1)
        .flat_map(|dx| (-1..=1).flat_map(move |dy| (-1..=1).map(move |dz| (dx, dy, dz))))
        .filter(|&(dx, dy, dz)| !(dx == 0 && dy == 0 && dz == 0))
}

struct DistanceField {
    size: [usize; 3],
    transform: Transform3,
    cost: Vec<f64>,
    in_segmentation: Vec<bool>,
    dmax: f64,
    exponent: i32,
}

impl DistanceField {
    fn build(mesh: &TriMesh3d, segmentation: &Scalar3DImage, params: &CenterlineParameters) -> Self {
        let up = params.image_upscale.max(1) as usize;
        let base_size = segmentation.size();
        let size = [base_size[0] * up, base_size[1] * up, base_size[2] * up];
        let transform = segmentation
            .transform()
            .upscaled(Vector3::new(up as f64, up as f64, up as f64));

        let num_cells = size[0] * size[1] * size[2];
        let mut raw_distance = vec![0.0_f64; num_cells];
        let mut in_segmentation = vec![false; num_cells];
        let mut dmax = 0.0_f64;

        for z in 0..size[2] {
            for y in 0..size[1] {
                for x in 0..size[0] {
                    let idx = (z * size[1] + y) * size[0] + x;
                    let world = transform.to_world(Vector3::new(x as f64, y as f64, z as f64));
                    let dist = mesh.closest_point(world).distance_to_query;
                    raw_distance[idx] = dist;

                    let inside = segmentation.nearest_value_at_world(world) >= 0.5;
                    in_segmentation[idx] = inside;
                    if inside && dist > dmax {
                        dmax = dist;
                    }
                }
            }
        }

        let exponent = params.distance_penalty_exponent;
        let mut cost = vec![1.0_f64; num_cells];
        for idx in 0..num_cells {
            if in_segmentation[idx] && dmax > 0.0 {
                let ratio = ((dmax - raw_distance[idx]) / dmax).max(0.0);
                cost[idx] = ratio.powi(exponent);
            } else if in_segmentation[idx] {
                cost[idx] = 0.0;
            }
        }

        Self {
            size,
            transform,
            cost,
            in_segmentation,
            dmax,
            exponent,
        }
    }

    #[inline]
    fn list_id(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.size[1] + y) * self.size[0] + x
    }

    fn cell_of_world(&self, world: Vector3<f64>) -> (usize, usize, usize) {
        let obj = self.transform.to_object(world);
        let nx = self.size[0] as f64 - 1.0;
        let ny = self.size[1] as f64 - 1.0;
        let nz = self.size[2] as f64 - 1.0;
        (
            obj.x.round().clamp(0.0, nx.max(0.0)) as usize,
            obj.y.round().clamp(0.0, ny.max(0.0)) as usize,
            obj.z.round().clamp(0.0, nz.max(0.0)) as usize,
        )
    }

    fn world_of_cell(&self, x: usize, y: usize, z: usize) -> Vector3<f64> {
        self.transform
            .to_world(Vector3::new(x as f64, y as f64, z as f64))
    }

    /// Nearest in-segmentation cell to `(x, y, z)`, expanding outward ring by
    /// ring.
    fn nearest_in_segmentation(&self, x: usize, y: usize, z: usize) -> (usize, usize, usize) {
        if self.in_segmentation[self.list_id(x, y, z)] {
            return (x, y, z);
        }
        let max_radius = self.size.iter().copied().max().unwrap_or(1) as i64;
        for radius in 1..=max_radius {
            for dz in -radius..=radius {
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        if dx.abs().max(dy.abs()).max(dz.abs()) != radius {
                            continue;
                        }
                        let (nx, ny, nz) = (x as i64 + dx, y as i64 + dy, z as i64 + dz);
                        if nx < 0
                            || ny < 0
                            || nz < 0
                            || nx as usize >= self.size[0]
                            || ny as usize >= self.size[1]
                            || nz as usize >= self.size[2]
                        {
                            continue;
                        }
                        let idx = self.list_id(nx as usize, ny as usize, nz as usize);
                        if self.in_segmentation[idx] {
                            return (nx as usize, ny as usize, nz as usize);
                        }
                    }
                }
            }
        }
        (x, y, z)
    }

    fn neighbors(&self, x: usize, y: usize, z: usize) -> Vec<(usize, usize, usize)> {
        let mut out = Vec::with_capacity(26);
        for (dx, dy, dz) in neighbor_offsets() {
            let (nx, ny, nz) = (x as i64 + dx, y as i64 + dy, z as i64 + dz);
            if nx < 0
                || ny < 0
                || nz < 0
                || nx as usize >= self.size[0]
                || ny as usize >= self.size[1]
                || nz as usize >= self.size[2]
            {
                continue;
            }
            out.push((nx as usize, ny as usize, nz as usize));
        }
        out
    }

    /// Queue-based Bellman-Ford (SPFA) relaxation from `seed` to `target`,
    /// with a frontier-expansion fallback when the target is unreachable
    /// under the in-segmentation restriction.
    fn shortest_path(&self, seed_world: Vector3<f64>, target_world: Vector3<f64>) -> Option<Vec<Vector3<f64>>> {
        let num_cells = self.cost.len();
        let mut dist = vec![f64::INFINITY; num_cells];
        let mut parent: Vec<Option<usize>> = vec![None; num_cells];
        let mut in_queue = vec![false; num_cells];

        let seed_cell = self.cell_of_world(seed_world);
        let seed_cell = self.nearest_in_segmentation(seed_cell.0, seed_cell.1, seed_cell.2);
        let seed_idx = self.list_id(seed_cell.0, seed_cell.1, seed_cell.2);
        let target_cell = self.cell_of_world(target_world);
        let target_idx = self.list_id(target_cell.0, target_cell.1, target_cell.2);

        dist[seed_idx] = self.cost[seed_idx];
        let mut queue = VecDeque::new();
        queue.push_back(seed_idx);
        in_queue[seed_idx] = true;

        self.relax(&mut dist, &mut parent, &mut in_queue, &mut queue, true);

        if dist[target_idx].is_finite() {
            return Some(self.trace_back(&parent, seed_idx, target_idx));
        }

        // Frontier expansion: re-seed from every visited cell bordering an
        // unvisited one, this time ignoring the in-segmentation restriction.
        let mut frontier = Vec::new();
        for idx in 0..num_cells {
            if !dist[idx].is_finite() {
                continue;
            }
            let (x, y, z) = (
                idx % self.size[0],
                (idx / self.size[0]) % self.size[1],
                idx / (self.size[0] * self.size[1]),
            );
            let borders_unvisited = self
                .neighbors(x, y, z)
                .into_iter()
                .any(|(nx, ny, nz)| !dist[self.list_id(nx, ny, nz)].is_finite());
            if borders_unvisited {
                frontier.push(idx);
            }
        }

        let mut queue = VecDeque::new();
        for idx in frontier {
            queue.push_back(idx);
            in_queue[idx] = true;
        }
        self.relax(&mut dist, &mut parent, &mut in_queue, &mut queue, false);

        if dist[target_idx].is_finite() {
            Some(self.trace_back(&parent, seed_idx, target_idx))
        } else {
            None
        }
    }

    fn relax(
        &self,
        dist: &mut [f64],
        parent: &mut [Option<usize>],
        in_queue: &mut [bool],
        queue: &mut VecDeque<usize>,
        respect_segmentation: bool,
    ) {
        const EPS: f64 = 1e-12;
        while let Some(idx) = queue.pop_front() {
            in_queue[idx] = false;
            let (x, y, z) = (
                idx % self.size[0],
                (idx / self.size[0]) % self.size[1],
                idx / (self.size[0] * self.size[1]),
            );
            for (nx, ny, nz) in self.neighbors(x, y, z) {
                let nidx = self.list_id(nx, ny, nz);
                if respect_segmentation && !self.in_segmentation[nidx] {
                    continue;
                }
                let candidate = dist[idx] + self.cost[nidx];
                if candidate + EPS < dist[nidx] {
                    dist[nidx] = candidate;
                    parent[nidx] = Some(idx);
                    if !in_queue[nidx] {
                        in_queue[nidx] = true;
                        queue.push_back(nidx);
                    }
                }
            }
        }
    }

    fn trace_back(&self, parent: &[Option<usize>], seed_idx: usize, target_idx: usize) -> Vec<Vector3<f64>> {
        let mut cells = vec![target_idx];
        let mut cur = target_idx;
        while cur != seed_idx {
            match parent[cur] {
                Some(p) => {
                    cells.push(p);
                    cur = p;
                }
                None => break,
            }
        }
        cells.reverse();
        cells
            .into_iter()
            .map(|idx| {
                let (x, y, z) = (
                    idx % self.size[0],
                    (idx / self.size[0]) % self.size[1],
                    idx / (self.size[0] * self.size[1]),
                );
                self.world_of_cell(x, y, z)
            })
            .collect()
    }

    /// Inverts the distance-penalty formula at each smoothed point
    ///.
    fn radius_at(&self, points: &[Vector3<f64>]) -> Vec<f64> {
        points
            .iter()
            .map(|&p| {
                let (x, y, z) = self.cell_of_world(p);
                let idx = self.list_id(x, y, z);
                let d_cell = self.cost[idx].max(0.0);
                let inv = if self.exponent != 0 {
                    d_cell.powf(1.0 / self.exponent as f64)
                } else {
                    d_cell
                };
                ((1.0 - inv) * self.dmax).max(0.0)
            })
            .collect()
    }
}

fn point_tangent(points: &[Vector3<f64>], i: usize) -> Vector3<f64> {
    let n = points.len();
    let dir = if n < 2 {
        Vector3::new(0.0, 0.0, 1.0)
    } else if i == 0 {
        points[1] - points[0]
    } else if i == n - 1 {
        points[n - 1] - points[n - 2]
    } else {
        points[i + 1] - points[i - 1]
    };
    let norm = dir.norm();
    if norm > 1e-12 {
        dir / norm
    } else {
        Vector3::new(0.0, 0.0, 1.0)
    }
}

/// Builds an arbitrary orthonormal frame whose z-axis is `tangent`
///.
fn initial_frame(tangent: Vector3<f64>) -> Matrix3<f64> {
    let candidates = [
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ];
    let mut x_axis = None;
    for c in candidates {
        let cross = c.cross(&tangent);
        if cross.norm() > 1e-6 {
            x_axis = Some(cross.normalize());
            break;
        }
    }
    let x_axis = x_axis.unwrap_or_else(|| {
        let arbitrary = Vector3::new(0.1234, 0.5678, 0.9101);
        arbitrary.cross(&tangent).normalize()
    });
    let y_axis = tangent.cross(&x_axis).normalize();
    Matrix3::from_columns(&[x_axis, y_axis, tangent])
}

/// Builds the rotation-minimizing frame sequence and binomial-smooths it
///.
fn rotation_minimizing_frames(points: &[Vector3<f64>]) -> Vec<Matrix3<f64>> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }

    let mut frames = Vec::with_capacity(n);
    let tangent0 = point_tangent(points, 0);
    frames.push(initial_frame(tangent0));

    for i in 1..n {
        let prev = frames[i - 1];
        let z_prev = prev.column(2).into_owned();
        let z_cur = point_tangent(points, i);

        let axis = z_prev.cross(&z_cur);
        let cos_angle = z_prev.dot(&z_cur).clamp(-1.0, 1.0);

        let next = if axis.norm() < 1e-9 {
            if cos_angle > 0.0 {
                // Same direction: frame carries over unchanged except z.
                let x_axis = prev.column(0).into_owned();
                let y_axis = z_cur.cross(&x_axis).normalize();
                Matrix3::from_columns(&[x_axis, y_axis, z_cur])
            } else {
                // Opposite direction: rebuild from scratch.
                initial_frame(z_cur)
            }
        } else {
            let angle = cos_angle.acos();
            let rotation = Rotation3::from_axis_angle(&Unit::new_normalize(axis), angle);
            let x_axis = rotation * prev.column(0).into_owned();
            let y_axis = z_cur.cross(&x_axis).normalize();
            Matrix3::from_columns(&[x_axis, y_axis, z_cur])
        };

        let is_valid = next.iter().all(|v| v.is_finite());
        frames.push(if is_valid {
            next
        } else {
            let x_axis = prev.column(0).into_owned();
            let y_axis = z_cur.cross(&x_axis).normalize();
            Matrix3::from_columns(&[x_axis, y_axis, z_cur])
        });
    }

    smooth_binomial(&mut frames, 25, 5);

    for frame in &mut frames {
        for mut col in frame.column_iter_mut() {
            let norm = col.norm();
            if norm > 1e-12 {
                col /= norm;
            }
        }
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marching_cubes;

    fn straight_tube_segmentation(n: usize, radius: f64) -> Scalar3DImage {
        let center = (n as f64 - 1.0) / 2.0;
        let mut img = Scalar3DImage::new([n, n, n], 0.0, Transform3::NoTransformation);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let r = ((x as f64 - center).powi(2) + (y as f64 - center).powi(2)).sqrt();
                    img.set(x, y, z, if r <= radius { 1.0 } else { 0.0 });
                }
            }
        }
        img
    }

    #[test]
    fn straight_tube_centerline_stays_near_axis() {
        let seg = straight_tube_segmentation(16, 5.0);
        let mesh_seg = straight_tube_segmentation(16, 5.0);
        let mut mesh = marching_cubes::apply(&mesh_seg, 0.5).unwrap();
        mesh.construct_kd_tree();

        let center = (16.0 - 1.0) / 2.0;
        let seed = mesh
            .points()
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.z).partial_cmp(&b.z).unwrap()
            })
            .map(|(i, _)| i as u32)
            .unwrap();
        let target = mesh
            .points()
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| (a.z).partial_cmp(&b.z).unwrap())
            .map(|(i, _)| i as u32)
            .unwrap();

        let params = CenterlineParameters {
            num_smooth_iterations: 10,
            ..Default::default()
        };
        let result = extract(&mut mesh, &seg, seed, &[target], &params);
        assert!(result.success);
        let line = &result.lines[0];
        for p in line.points() {
            let r = ((p.x - center).powi(2) + (p.y - center).powi(2)).sqrt();
            assert!(r < 3.0, "centerline point strayed from axis: r={}", r);
        }
    }

    #[test]
    fn empty_targets_reports_failure() {
        let seg = straight_tube_segmentation(8, 3.0);
        let mesh_seg = straight_tube_segmentation(8, 3.0);
        let mut mesh = marching_cubes::apply(&mesh_seg, 0.5).unwrap();
        let result = extract(&mut mesh, &seg, 0, &[], &CenterlineParameters::default());
        assert!(!result.success);
        assert!(result.lines.is_empty());
    }
}
