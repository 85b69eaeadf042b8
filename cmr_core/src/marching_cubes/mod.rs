//! Marching cubes surface extraction from a dense scalar grid.
//!
//! The 256-entry triangulation table in [`lut`] is carried over unmodified;
//! only the corner classification, padding, dedup, and the generic `Real`
//! type were specific to the SPH density map it was originally written
//! for, and are replaced here by a concrete `f64` traversal over
//! [`Scalar3DImage`].

pub mod lut;

use crate::error::{CmrError, Result};
use crate::image::Scalar3DImage;
use crate::mesh::TriMesh3d;
use crate::ParallelMapType;
use nalgebra::Vector3;
use parking_lot::Mutex;
use rayon::prelude::*;

const EPS: f64 = 1e-9;

/// Local cube corner coordinates, matching the vertex numbering in the
/// diagram documented in [`lut`].
const CORNER_OFFSETS: [(i64, i64, i64); 8] = [
    (0, 0, 0),
    (1, 0, 0),
    (1, 1, 0),
    (0, 1, 0),
    (0, 0, 1),
    (1, 0, 1),
    (1, 1, 1),
    (0, 1, 1),
];

/// `(local vertex a, local vertex b)` endpoints of each of the 12 cube edges.
const EDGE_VERTICES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Dedup key for an iso-crossing vertex: either a point on an edge interior,
/// or a lattice point the crossing snapped onto exactly.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum VertexKey {
    Edge(i64, i64),
    Lattice(i64),
}

/// Padded view over a [`Scalar3DImage`]: every coordinate outside the
/// original bounds reads as the image's minimum value, and padded indices
/// `1..=size[axis]` line up with the original voxel at `index - 1`.
struct PaddedGrid<'a> {
    image: &'a Scalar3DImage,
    min_value: f64,
    size: [usize; 3],
}

impl<'a> PaddedGrid<'a> {
    fn new(image: &'a Scalar3DImage) -> Self {
        Self {
            image,
            min_value: image.min_value(),
            size: image.size(),
        }
    }

    fn padded_size(&self) -> [usize; 3] {
        [self.size[0] + 2, self.size[1] + 2, self.size[2] + 2]
    }

    fn lattice_id(&self, px: i64, py: i64, pz: i64) -> i64 {
        let [nx, ny, _] = self.padded_size();
        px + py * nx as i64 + pz * (nx as i64) * (ny as i64)
    }

    fn get(&self, px: i64, py: i64, pz: i64) -> f64 {
        let [nx, ny, nz] = self.size;
        if px < 1 || py < 1 || pz < 1 || px as usize > nx || py as usize > ny || pz as usize > nz
        {
            self.min_value
        } else {
            self.image
                .get((px - 1) as usize, (py - 1) as usize, (pz - 1) as usize)
        }
    }

    /// World position of a padded lattice point, already translated back to
    /// the unpadded image's coordinate system.
    fn world_position(&self, px: i64, py: i64, pz: i64) -> Vector3<f64> {
        self.image.transform().to_world(Vector3::new(
            (px - 1) as f64,
            (py - 1) as f64,
            (pz - 1) as f64,
        ))
    }
}

struct VertexPool {
    ids: ParallelMapType<VertexKey, u32>,
    points: Mutex<Vec<Vector3<f64>>>,
}

impl VertexPool {
    fn new() -> Self {
        Self {
            ids: ParallelMapType::default(),
            points: Mutex::new(Vec::new()),
        }
    }

    fn vertex_for(&self, key: VertexKey, pos: Vector3<f64>) -> u32 {
        if let Some(existing) = self.ids.get(&key) {
            return *existing;
        }
        *self.ids.entry(key).or_insert_with(|| {
            let mut points = self.points.lock();
            points.push(pos);
            (points.len() - 1) as u32
        })
    }

    fn into_points(self) -> Vec<Vector3<f64>> {
        self.points.into_inner()
    }
}

/// Extracts a triangle mesh approximating the `iso_value` level-set of
/// `image`, with outward-facing normals.
///
/// Returns [`CmrError::InputDimensionMismatch`] if any axis of `image` has
/// fewer than 2 voxels, since a marching cubes cube needs two lattice points
/// per axis.
pub fn apply(image: &Scalar3DImage, iso_value: f64) -> Result<TriMesh3d> {
    let size = image.size();
    if size.iter().any(|&s| s < 2) {
        return Err(CmrError::InputDimensionMismatch {
            expected: "3D grid with at least 2 voxels per axis",
            actual: format!("{:?}", size),
        });
    }

    let grid = PaddedGrid::new(image);
    let [px, py, pz] = grid.padded_size();
    let pool = VertexPool::new();

    // One cube per interior lattice cell of the padded grid; cube (x, y, z)
    // has corners at padded coordinates (x..=x+1, y..=y+1, z..=z+1).
    let num_cubes_x = px - 1;
    let num_cubes_y = py - 1;
    let num_cubes_z = pz - 1;

    let triangles: Vec<[u32; 3]> = (0..num_cubes_z as i64)
        .into_par_iter()
        .flat_map_iter(|z| {
            let mut slice_triangles = Vec::new();
            for y in 0..num_cubes_y as i64 {
                for x in 0..num_cubes_x as i64 {
                    classify_cube(&grid, &pool, x, y, z, iso_value, &mut slice_triangles);
                }
            }
            slice_triangles
        })
        .collect();

    let points = pool.into_points();
    let mut mesh = TriMesh3d::with_geometry(points, triangles);
    mesh.recompute_vertex_normals();
    Ok(mesh)
}

fn classify_cube(
    grid: &PaddedGrid,
    pool: &VertexPool,
    x: i64,
    y: i64,
    z: i64,
    iso: f64,
    out: &mut Vec<[u32; 3]>,
) {
    let mut corner_value = [0.0_f64; 8];
    let mut corner_pos = [(0i64, 0i64, 0i64); 8];
    let mut inside = [false; 8];

    for (i, &(ox, oy, oz)) in CORNER_OFFSETS.iter().enumerate() {
        let (cx, cy, cz) = (x + ox, y + oy, z + oz);
        corner_value[i] = grid.get(cx, cy, cz);
        corner_pos[i] = (cx, cy, cz);
        inside[i] = corner_value[i] >= iso;
    }

    if inside.iter().all(|&b| b) || inside.iter().all(|&b| !b) {
        return;
    }

    for tri in lut::marching_cubes_triangulation_iter(&inside) {
        let mut ids = [0u32; 3];
        for (slot, &edge) in tri.iter().enumerate() {
            let (a, b) = EDGE_VERTICES[edge as usize];
            let (key, pos) = edge_crossing(grid, corner_pos, corner_value, a, b, iso);
            ids[slot] = pool.vertex_for(key, pos);
        }
        if ids[0] != ids[1] && ids[1] != ids[2] && ids[0] != ids[2] {
            out.push(ids);
        }
    }
}

fn edge_crossing(
    grid: &PaddedGrid,
    corner_pos: [(i64, i64, i64); 8],
    corner_value: [f64; 8],
    a: usize,
    b: usize,
    iso: f64,
) -> (VertexKey, Vector3<f64>) {
    let (ax, ay, az) = corner_pos[a];
    let (bx, by, bz) = corner_pos[b];
    let va = corner_value[a];
    let vb = corner_value[b];
    let id_a = grid.lattice_id(ax, ay, az);
    let id_b = grid.lattice_id(bx, by, bz);

    if (iso - va).abs() < EPS {
        return (VertexKey::Lattice(id_a), grid.world_position(ax, ay, az));
    }
    if (iso - vb).abs() < EPS {
        return (VertexKey::Lattice(id_b), grid.world_position(bx, by, bz));
    }
    if (va - vb).abs() < EPS {
        return (VertexKey::Lattice(id_a), grid.world_position(ax, ay, az));
    }

    let t = (iso - va) / (vb - va);
    let pa = grid.world_position(ax, ay, az);
    let pb = grid.world_position(bx, by, bz);
    let pos = pa + (pb - pa) * t;

    let key = if id_a < id_b {
        VertexKey::Edge(id_a, id_b)
    } else {
        VertexKey::Edge(id_b, id_a)
    };
    (key, pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Transform3;

    fn sphere_image(n: usize, radius: f64) -> Scalar3DImage {
        let center = (n as f64 - 1.0) / 2.0;
        let mut img = Scalar3DImage::new([n, n, n], 0.0, Transform3::NoTransformation);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let d = ((x as f64 - center).powi(2)
                        + (y as f64 - center).powi(2)
                        + (z as f64 - center).powi(2))
                    .sqrt();
                    img.set(x, y, z, radius - d);
                }
            }
        }
        img
    }

    #[test]
    fn sphere_level_set_has_vertices_near_radius() {
        let img = sphere_image(32, 8.0);
        let mesh = apply(&img, 0.0).unwrap();
        assert!(mesh.num_triangles() > 0);

        let center = Vector3::new(15.5, 15.5, 15.5);
        for p in mesh.points() {
            let d = (p - center).norm();
            assert!((d - 8.0).abs() < 1.0, "vertex too far from radius 8: {}", d);
        }
    }

    #[test]
    fn triangles_have_distinct_vertices() {
        let img = sphere_image(16, 5.0);
        let mesh = apply(&img, 0.0).unwrap();
        for tri in mesh.triangles() {
            assert!(tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2]);
        }
    }

    #[test]
    fn rejects_degenerate_2d_input() {
        let img = Scalar3DImage::new([4, 4, 1], 0.0, Transform3::NoTransformation);
        assert!(apply(&img, 0.0).is_err());
    }

    #[test]
    fn shared_edges_produce_single_vertex() {
        // Two adjacent cubes sharing a face must not duplicate the vertex
        // on their shared edge.
        let img = sphere_image(8, 3.0);
        let mesh = apply(&img, 0.0).unwrap();
        let mut seen = std::collections::HashSet::new();
        for p in mesh.points() {
            let key = (
                (p.x * 1e6).round() as i64,
                (p.y * 1e6).round() as i64,
                (p.z * 1e6).round() as i64,
            );
            assert!(seen.insert(key), "duplicate vertex position at {:?}", p);
        }
    }
}
